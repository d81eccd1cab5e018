//! Runs a whole dump: mount, open, copy, close, unmount.
use crate::config::DumpConfig;
use crate::engine::{self, BlockProgress, TransferOutcome, TransferState};
use crate::error::DumpError;
use crate::flash::FlashSource;
use crate::output::{DumpSink, OutputTarget, name_for};
use crate::storage::{StorageBackend, StorageMount};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What a finished dump produced.
#[derive(Debug)]
pub struct DumpReport {
    pub path: PathBuf,
    pub outcome: TransferOutcome,
    /// SHA-256 of the file contents, if it was closed cleanly.
    pub sha256: Option<String>,
}

/// Dumps `source` into a new file on the configured storage.
///
/// With `storage` set, the card behind it is brought up and mounted first and
/// torn down before returning, on every path. With `storage` unset, the mount
/// point is expected to be usable as is.
///
/// An `Err` means the dump could not happen or a flash read failed; storage
/// has been released by the time it is returned. A failed write is not an
/// `Err`: the report carries [`TransferState::WriteFailed`] and the bytes that
/// made it.
///
/// # Arguments
///
/// * `timestamp` - Unix seconds used to name the output file.
/// * `on_start` - Called once the output file is open, with its path and the
///   number of bytes the source covers.
/// * `on_progress` - Called after every block written.
pub fn run<S, F>(
    config: &DumpConfig,
    storage: Option<&mut dyn StorageBackend>,
    source: &mut S,
    timestamp: i64,
    on_start: impl FnOnce(&Path, u64),
    on_progress: F,
) -> Result<DumpReport, DumpError>
where
    S: FlashSource + ?Sized,
    F: FnMut(&BlockProgress),
{
    run_with_output(
        config,
        storage,
        source,
        timestamp,
        OutputTarget::create,
        on_start,
        on_progress,
    )
}

/// Like [`run`], with `open` creating the output at the derived path instead
/// of [`OutputTarget::create`].
pub fn run_with_output<S, K, F>(
    config: &DumpConfig,
    storage: Option<&mut dyn StorageBackend>,
    source: &mut S,
    timestamp: i64,
    open: impl FnOnce(&Path) -> Result<OutputTarget<K>, DumpError>,
    on_start: impl FnOnce(&Path, u64),
    on_progress: F,
) -> Result<DumpReport, DumpError>
where
    S: FlashSource + ?Sized,
    K: DumpSink,
    F: FnMut(&BlockProgress),
{
    config.validate()?;

    let mount = match storage {
        Some(backend) => StorageMount::acquire(backend, config)?,
        None => StorageMount::unmanaged(&config.mount_point),
    };

    let path = name_for(mount.mount_point(), timestamp);
    info!(path = %path.display(), "Opening outfile");
    // The mount is dropped, and so torn down, if this fails.
    let mut output = open(&path)?;

    on_start(&path, source.region().len());
    let mut outcome = engine::run(source, &mut output, on_progress)?;

    let sha256 = match output.close() {
        Ok(digest) => Some(digest),
        Err(source) => {
            warn!(error = %source, "Could not close the output file cleanly");
            if outcome.is_complete() {
                outcome.state = TransferState::WriteFailed(DumpError::WriteFailed {
                    offset: outcome.cursor,
                    source,
                });
            }
            None
        }
    };

    if let Err(e) = mount.release() {
        warn!(error = %e, "Storage was not released cleanly");
    }

    info!(
        bytes = outcome.progress.bytes_written,
        path = %path.display(),
        "Dumped {} bytes to {}",
        outcome.progress.bytes_written,
        path.display()
    );
    Ok(DumpReport {
        path,
        outcome,
        sha256,
    })
}
