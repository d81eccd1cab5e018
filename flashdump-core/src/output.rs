//! The dump file: where it goes and how it is written.
use crate::error::DumpError;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Derives the dump file path for an invocation at `timestamp` (Unix seconds).
///
/// Two dumps started within the same second get the same name, and the later
/// one overwrites the earlier.
pub fn name_for(mount_point: &Path, timestamp: i64) -> PathBuf {
    mount_point.join(format!("flash_{timestamp}"))
}

/// Somewhere a dump can be written and then forced out to the media.
pub trait DumpSink: Write {
    fn sync(&mut self) -> io::Result<()>;
}

impl DumpSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// An open dump file.
///
/// Everything written through it is also hashed, so the digest of what
/// actually landed in the file is available once it is closed.
pub struct OutputTarget<K = File> {
    path: PathBuf,
    sink: K,
    hasher: Sha256,
}

impl OutputTarget {
    /// Creates (or truncates) the file at `path`, opened for reading and
    /// writing.
    pub fn create(path: &Path) -> Result<Self, DumpError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| DumpError::OutputCreateFailed {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::with_sink(path, file))
    }
}

impl<K: DumpSink> OutputTarget<K> {
    /// Wraps an already opened `sink` standing for the file at `path`.
    pub fn with_sink(path: &Path, sink: K) -> Self {
        Self {
            path: path.to_path_buf(),
            sink,
            hasher: Sha256::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the file to the media and closes it, returning the hex SHA-256
    /// of its contents.
    pub fn close(mut self) -> io::Result<String> {
        self.sink.flush()?;
        self.sink.sync()?;
        Ok(format!("{:x}", self.hasher.finalize()))
    }
}

impl<K: DumpSink> Write for OutputTarget<K> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}
