//! The block copy loop.
use crate::error::DumpError;
use crate::flash::{BLOCK_SIZE, BlockRead, FlashSource};
use std::io::Write;
use std::ops::Range;
use tracing::{debug, warn};

/// Running totals for a transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Handed to the progress callback after each block lands in the output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockProgress {
    /// The flash range that was just copied.
    pub range: Range<u64>,
    pub progress: TransferProgress,
}

/// How the loop ended.
#[derive(Debug)]
pub enum TransferState {
    /// The source ran out; everything was copied.
    Exhausted,
    /// Writing a block failed. Blocks before it are in the output.
    WriteFailed(DumpError),
}

#[derive(Debug)]
pub struct TransferOutcome {
    pub state: TransferState,
    pub progress: TransferProgress,
    /// The read cursor when the loop stopped.
    pub cursor: u64,
}

impl TransferOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.state, TransferState::Exhausted)
    }
}

/// Copies `source` into `output`, one block at a time.
///
/// The loop stops when the source is exhausted, when the cursor reaches the
/// end of the source's region, or when a write fails. A write failure is not
/// an error: it ends the transfer with [`TransferState::WriteFailed`] and keeps
/// what was already written. A read failure is returned as an error.
///
/// `on_progress` is called after every block that was written.
pub fn run<S, W, F>(source: &mut S, output: &mut W, mut on_progress: F) -> Result<TransferOutcome, DumpError>
where
    S: FlashSource + ?Sized,
    W: Write + ?Sized,
    F: FnMut(&BlockProgress),
{
    let region = source.region();
    let mut cursor = region.start();
    let mut progress = TransferProgress::default();
    let mut block = [0u8; BLOCK_SIZE];

    let state = loop {
        // Hard stop at the end of the window, whatever the source says.
        if cursor >= region.end() {
            break TransferState::Exhausted;
        }

        let len = match source.read_block(cursor, &mut block)? {
            BlockRead::Data(len) => len.get(),
            BlockRead::Exhausted => break TransferState::Exhausted,
        };
        progress.bytes_read += len as u64;

        if let Err(source) = output.write_all(&block[..len]) {
            warn!(offset = cursor, error = %source, "Could not write to file");
            break TransferState::WriteFailed(DumpError::WriteFailed {
                offset: cursor,
                source,
            });
        }

        let range = cursor..cursor + len as u64;
        progress.bytes_written += len as u64;
        cursor = range.end;

        debug!(
            "0x{:X} - 0x{:X} dumped, bytes written: {}",
            range.start, range.end, progress.bytes_written
        );
        on_progress(&BlockProgress { range, progress });
    };

    Ok(TransferOutcome {
        state,
        progress,
        cursor,
    })
}
