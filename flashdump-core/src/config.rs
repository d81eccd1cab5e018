//! Build-time defaults and the explicit configuration value handed to the
//! storage and flash stages.
use crate::error::DumpError;
use crate::flash::{BLOCK_SIZE, FlashRegion};
use std::path::PathBuf;

/// Mount point used when `FLASHDUMP_MOUNT_POINT` is not set at build time.
const DEFAULT_MOUNT_POINT: &str = "/sd";

/// The mount point baked into this build.
pub const MOUNT_POINT: &str = match option_env!("FLASHDUMP_MOUNT_POINT") {
    Some(path) => path,
    None => DEFAULT_MOUNT_POINT,
};

/// Start of the flash window, as seen through the privileged, uncached
/// address space (`0xA` prefix on the physical address `0x0020_0000`).
pub const FLASH_ADDR_START: u64 = 0xA020_0000;

/// One past the last byte of the flash window (128 KiB).
pub const FLASH_ADDR_END: u64 = 0xA022_0000;

/// MBR type tag of a Linux native (ext2) partition.
pub const LINUX_PARTITION_TYPE: u8 = 0x83;

/// Filesystem driver used to mount the card.
pub const FILESYSTEM: &str = "ext2";

/// Device node exposing physical memory, mapped to read the flash window on a
/// host with an MMU.
pub const MEMORY_DEVICE: &str = "/dev/mem";

/// Strips the segment bits of an uncached (`0xA`) or cached (`0x8`) segment
/// address, leaving the physical address.
pub const SEGMENT_MASK: u64 = 0x1FFF_FFFF;

/// Everything the pipeline needs to know about its environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpConfig {
    /// Where the removable storage is (or will be) mounted.
    pub mount_point: PathBuf,
    /// The flash window read by the address-range source.
    pub flash_window: FlashRegion,
    /// The type tag partition 0 must carry before it is mounted.
    pub partition_type: u8,
    /// Name of the filesystem driver to initialize and mount with.
    pub filesystem: String,
    /// Where physical memory is mapped from when the flash window is read on
    /// a host.
    pub memory_device: PathBuf,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from(MOUNT_POINT),
            flash_window: FlashRegion::new(FLASH_ADDR_START, FLASH_ADDR_END),
            partition_type: LINUX_PARTITION_TYPE,
            filesystem: FILESYSTEM.to_string(),
            memory_device: PathBuf::from(MEMORY_DEVICE),
        }
    }
}

impl DumpConfig {
    /// The flash window at its physical address, i.e. where it sits in
    /// [`DumpConfig::memory_device`].
    pub fn physical_window(&self) -> FlashRegion {
        let start = self.flash_window.start() & SEGMENT_MASK;
        FlashRegion::new(start, start + self.flash_window.len())
    }

    /// Checks the configuration before any resource is acquired.
    pub fn validate(&self) -> Result<(), DumpError> {
        if self.mount_point.as_os_str().is_empty() {
            return Err(DumpError::InvalidConfig("mount point is empty".into()));
        }
        if self.filesystem.is_empty() {
            return Err(DumpError::InvalidConfig("filesystem name is empty".into()));
        }

        let window = self.flash_window;
        if window.is_empty() {
            return Err(DumpError::InvalidConfig(format!(
                "flash window 0x{:X} - 0x{:X} is empty",
                window.start(),
                window.end()
            )));
        }
        if window.len() % BLOCK_SIZE as u64 != 0 {
            return Err(DumpError::InvalidConfig(format!(
                "flash window length 0x{:X} is not a multiple of the {} byte block size",
                window.len(),
                BLOCK_SIZE
            )));
        }
        Ok(())
    }
}
