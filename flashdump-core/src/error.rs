//! The error type shared by every stage of a dump.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop a dump.
///
/// The storage variants and [`DumpError::OutputCreateFailed`] are fatal for
/// the process. [`DumpError::WriteFailed`] is recovered inside the copy loop
/// and travels in [`crate::engine::TransferState::WriteFailed`] instead.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "could not initialize the storage device {}. Please make sure an SD card is inserted",
        device.display()
    )]
    StorageInitFailed {
        device: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not find partition {index} on the storage device")]
    NoPartitionFound {
        index: usize,
        #[source]
        source: Option<io::Error>,
    },

    #[error("partition table declares type 0x{found:02X}, expected 0x{expected:02X}")]
    WrongPartitionType { expected: u8, found: u8 },

    #[error("could not initialize the {filesystem} filesystem driver")]
    FilesystemInitFailed {
        filesystem: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "could not mount the storage device at {} as {filesystem}. Please make sure the card has been properly formatted",
        mount_point.display()
    )]
    MountFailed {
        mount_point: PathBuf,
        filesystem: String,
        #[source]
        source: io::Error,
    },

    #[error("could not open {} for writing", path.display())]
    OutputCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not write to the output file at offset 0x{offset:X}")]
    WriteFailed {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("could not read flash at offset 0x{offset:X}")]
    ReadFailed {
        offset: u64,
        #[source]
        source: io::Error,
    },
}
