//! The core, UI-agnostic library for the `flashdump` utility.
//!
//! `flashdump-core` copies a fixed window of a device's flash into a single file
//! on removable storage. It handles bringing the storage up and down, naming
//! the dump, and streaming the flash into it block by block, and reports its
//! progress via callbacks so any front-end can display it as it likes.
//!
//! The library is structured into several key modules:
//! - [`config`]: The build-time defaults and the [`config::DumpConfig`] value.
//! - [`storage`]: Mounting and unmounting removable storage through a
//!   [`storage::StorageBackend`].
//! - [`flash`]: The [`flash::FlashSource`] abstraction and its address-range and
//!   offset-primitive implementations.
//! - [`engine`]: The block copy loop.
//! - [`output`]: Naming and writing the dump file.
//! - [`mod@dump`]: The pipeline tying the stages together.
//! - [`report`]: Fatal error reporting.
//! - [`platform`]: Linux host support: device discovery, the SD card backend
//!   and a device-node flash reader.
//!
//! The primary entry point is [`dump::run`]. It releases any storage it
//! acquired before returning, so an `Err` from it can go straight to
//! [`report::FatalErrorReporter::fatal`].
//!
//! ## Example: Dumping Flash from an Image File
//!
//! ```rust,no_run
//! use flashdump_core::config::DumpConfig;
//! use flashdump_core::flash::{FlashRegion, OffsetSource};
//! use flashdump_core::platform::{DeviceFlashReader, SdCardBackend};
//! use flashdump_core::report::FatalErrorReporter;
//! use flashdump_core::dump;
//! use std::path::Path;
//!
//! let config = DumpConfig::default();
//! let reader = DeviceFlashReader::open(Path::new("/dev/mtdblock0")).unwrap();
//! let size = reader.size().unwrap();
//! let mut source = OffsetSource::new(FlashRegion::new(0, size), reader).unwrap();
//! let mut card = SdCardBackend::new("/dev/mmcblk0");
//!
//! match dump::run(
//!     &config,
//!     Some(&mut card),
//!     &mut source,
//!     1_700_000_000,
//!     |path, len| println!("Dumping {} bytes to {}", len, path.display()),
//!     |block| println!("{} bytes written", block.progress.bytes_written),
//! ) {
//!     Ok(report) => println!("Dumped {} bytes", report.outcome.progress.bytes_written),
//!     Err(e) => FatalErrorReporter::new().with_stderr().fatal(&e.to_string()),
//! }
//! ```

pub mod config;
pub mod device;
pub mod dump;
pub mod engine;
pub mod error;
pub mod flash;
pub mod mbr;
pub mod output;
pub mod platform;
pub mod report;
pub mod storage;

pub use error::DumpError;
