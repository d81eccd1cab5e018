//! Provides platform-specific functionality.
//!
//! This module contains the logic for talking to real hardware on the host:
//! discovering removable block devices, bringing an SD card up and down through
//! the kernel, and reading flash exposed as a device node or image file.
//!
//! It uses conditional compilation (`#[cfg]`) to expose the implementation for
//! the target OS. Only Linux is supported; on other targets the rest of the
//! library still works against caller-provided backends and sources.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;
