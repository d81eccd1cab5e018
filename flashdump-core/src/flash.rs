//! Sources of flash contents.
//!
//! The copy engine is written once against [`FlashSource`]. Two sources are
//! provided:
//! - [`AddressRangeSource`] copies straight out of a memory window holding the
//!   flash, such as a mapping of the physical flash window.
//! - [`OffsetSource`] drives a [`FlashReader`] primitive that reads a number of
//!   bytes at an offset and says explicitly when there is nothing left.
use crate::error::DumpError;
use std::io;
use std::num::NonZeroUsize;

/// Number of bytes moved per iteration of the copy loop.
pub const BLOCK_SIZE: usize = 2048;

/// The buffer one block is read into. A single block is reused for the whole
/// transfer.
pub type Block = [u8; BLOCK_SIZE];

const FULL_BLOCK: NonZeroUsize = match NonZeroUsize::new(BLOCK_SIZE) {
    Some(n) => n,
    None => panic!("block size must not be zero"),
};

/// A half-open address or offset range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlashRegion {
    start: u64,
    end: u64,
}

impl FlashRegion {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub const fn start(&self) -> u64 {
        self.start
    }

    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes in the region. A region whose end lies before its start
    /// is empty.
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// Result of asking a source for the block at a given offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockRead {
    /// This many bytes at the front of the block are valid.
    Data(NonZeroUsize),
    /// The source has nothing more to give.
    Exhausted,
}

/// Something the copy engine can pull blocks from.
pub trait FlashSource {
    /// The window this source reads from. The engine never asks for an offset
    /// outside of it.
    fn region(&self) -> FlashRegion;

    /// Fills the front of `block` with the bytes starting at `offset`.
    fn read_block(&mut self, offset: u64, block: &mut Block) -> Result<BlockRead, DumpError>;
}

impl<S: FlashSource + ?Sized> FlashSource for &mut S {
    fn region(&self) -> FlashRegion {
        (**self).region()
    }

    fn read_block(&mut self, offset: u64, block: &mut Block) -> Result<BlockRead, DumpError> {
        (**self).read_block(offset, block)
    }
}

impl<S: FlashSource + ?Sized> FlashSource for Box<S> {
    fn region(&self) -> FlashRegion {
        (**self).region()
    }

    fn read_block(&mut self, offset: u64, block: &mut Block) -> Result<BlockRead, DumpError> {
        (**self).read_block(offset, block)
    }
}

/// Reads the flash by copying out of a memory window, one full block at a
/// time.
///
/// The window is anything that exposes the flash bytes as a slice: a buffer in
/// tests, a mapping of physical memory on a host. The only terminating
/// condition is reaching the end of the window; the copy itself cannot fail.
pub struct AddressRangeSource<W> {
    region: FlashRegion,
    window: W,
}

impl<W: AsRef<[u8]>> AddressRangeSource<W> {
    /// Creates a source over `window`, whose first byte lives at
    /// `region.start()`.
    ///
    /// The region must be a whole number of blocks and exactly as long as the
    /// window.
    pub fn new(region: FlashRegion, window: W) -> Result<Self, DumpError> {
        if region.is_empty() || region.len() % BLOCK_SIZE as u64 != 0 {
            return Err(DumpError::InvalidConfig(format!(
                "address window 0x{:X} - 0x{:X} is not a whole number of {} byte blocks",
                region.start(),
                region.end(),
                BLOCK_SIZE
            )));
        }
        let mapped = window.as_ref().len() as u64;
        if mapped != region.len() {
            return Err(DumpError::InvalidConfig(format!(
                "address window is 0x{:X} bytes but the mapped memory is 0x{:X} bytes",
                region.len(),
                mapped
            )));
        }
        Ok(Self { region, window })
    }
}

impl<W: AsRef<[u8]>> FlashSource for AddressRangeSource<W> {
    fn region(&self) -> FlashRegion {
        self.region
    }

    fn read_block(&mut self, offset: u64, block: &mut Block) -> Result<BlockRead, DumpError> {
        if !self.region.contains(offset) {
            return Ok(BlockRead::Exhausted);
        }
        let at = (offset - self.region.start()) as usize;
        // Never copy past the end of the window, even for a misaligned offset.
        let Some(chunk) = self.window.as_ref().get(at..at + BLOCK_SIZE) else {
            return Ok(BlockRead::Exhausted);
        };
        block.copy_from_slice(chunk);
        Ok(BlockRead::Data(FULL_BLOCK))
    }
}

/// What a read primitive returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chunk {
    /// This many bytes were read into the front of the buffer.
    Data(NonZeroUsize),
    /// There is no data at or past the requested offset.
    Exhausted,
}

/// A "read N bytes at offset O" primitive.
///
/// Success, exhaustion and failure are kept apart: a byte count never doubles
/// as an end-of-data or error signal.
pub trait FlashReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<Chunk>;
}

impl<R: FlashReader + ?Sized> FlashReader for &mut R {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<Chunk> {
        (**self).read_at(offset, buf)
    }
}

/// Reads the flash through a [`FlashReader`], one block (or less) at a time.
pub struct OffsetSource<R> {
    region: FlashRegion,
    reader: R,
}

impl<R: FlashReader> OffsetSource<R> {
    pub fn new(region: FlashRegion, reader: R) -> Result<Self, DumpError> {
        if region.is_empty() {
            return Err(DumpError::InvalidConfig(format!(
                "offset range 0x{:X} - 0x{:X} is empty",
                region.start(),
                region.end()
            )));
        }
        Ok(Self { region, reader })
    }
}

impl<R: FlashReader> FlashSource for OffsetSource<R> {
    fn region(&self) -> FlashRegion {
        self.region
    }

    fn read_block(&mut self, offset: u64, block: &mut Block) -> Result<BlockRead, DumpError> {
        if !self.region.contains(offset) {
            return Ok(BlockRead::Exhausted);
        }
        let remaining = std::cmp::min(BLOCK_SIZE as u64, self.region.end() - offset) as usize;
        let Some(want) = NonZeroUsize::new(remaining) else {
            return Ok(BlockRead::Exhausted);
        };

        match self.reader.read_at(offset, &mut block[..want.get()]) {
            // A reader reporting more than it was given is clamped to the request.
            Ok(Chunk::Data(n)) => Ok(BlockRead::Data(std::cmp::min(n, want))),
            Ok(Chunk::Exhausted) => Ok(BlockRead::Exhausted),
            Err(source) => Err(DumpError::ReadFailed { offset, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<io::Result<Chunk>>);

    impl FlashReader for Scripted {
        fn read_at(&mut self, _offset: u64, buf: &mut [u8]) -> io::Result<Chunk> {
            buf.fill(0xAB);
            self.0.remove(0)
        }
    }

    fn data(n: usize) -> io::Result<Chunk> {
        Ok(Chunk::Data(NonZeroUsize::new(n).unwrap()))
    }

    #[test]
    fn region_len_saturates() {
        assert_eq!(FlashRegion::new(10, 4).len(), 0);
        assert!(FlashRegion::new(10, 4).is_empty());
        assert!(FlashRegion::new(0, 4).contains(3));
        assert!(!FlashRegion::new(0, 4).contains(4));
    }

    #[test]
    fn address_source_copies_full_blocks_until_the_end() {
        let memory: Vec<u8> = (0..2 * BLOCK_SIZE).map(|i| (i / BLOCK_SIZE) as u8 + 1).collect();
        let region = FlashRegion::new(0x8000, 0x8000 + memory.len() as u64);
        let mut source = AddressRangeSource::new(region, &memory).unwrap();
        let mut block = [0u8; BLOCK_SIZE];

        let read = source.read_block(0x8000 + BLOCK_SIZE as u64, &mut block).unwrap();
        assert_eq!(read, BlockRead::Data(NonZeroUsize::new(BLOCK_SIZE).unwrap()));
        assert!(block.iter().all(|&b| b == 2));

        let read = source.read_block(region.end(), &mut block).unwrap();
        assert_eq!(read, BlockRead::Exhausted);
    }

    #[test]
    fn address_source_refuses_a_block_straddling_the_end() {
        let memory = vec![0u8; BLOCK_SIZE];
        let region = FlashRegion::new(0, BLOCK_SIZE as u64);
        let mut source = AddressRangeSource::new(region, &memory).unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        assert_eq!(source.read_block(1, &mut block).unwrap(), BlockRead::Exhausted);
    }

    #[test]
    fn address_source_rejects_mismatched_window() {
        let memory = vec![0u8; BLOCK_SIZE];
        let region = FlashRegion::new(0, 2 * BLOCK_SIZE as u64);
        assert!(AddressRangeSource::new(region, &memory).is_err());

        let region = FlashRegion::new(0, BLOCK_SIZE as u64 - 1);
        assert!(AddressRangeSource::new(region, &memory[..BLOCK_SIZE - 1]).is_err());
    }

    #[test]
    fn offset_source_passes_through_short_reads_and_exhaustion() {
        let reader = Scripted(vec![data(100), Ok(Chunk::Exhausted)]);
        let mut source = OffsetSource::new(FlashRegion::new(0, 1 << 20), reader).unwrap();
        let mut block = [0u8; BLOCK_SIZE];

        assert_eq!(
            source.read_block(0, &mut block).unwrap(),
            BlockRead::Data(NonZeroUsize::new(100).unwrap())
        );
        assert_eq!(source.read_block(100, &mut block).unwrap(), BlockRead::Exhausted);
    }

    #[test]
    fn offset_source_limits_the_last_request_to_the_region() {
        struct Greedy;
        impl FlashReader for Greedy {
            fn read_at(&mut self, _offset: u64, buf: &mut [u8]) -> io::Result<Chunk> {
                assert_eq!(buf.len(), 16);
                Ok(Chunk::Data(NonZeroUsize::new(4096).unwrap()))
            }
        }

        let region = FlashRegion::new(0, BLOCK_SIZE as u64 + 16);
        let mut source = OffsetSource::new(region, Greedy).unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        assert_eq!(
            source.read_block(BLOCK_SIZE as u64, &mut block).unwrap(),
            BlockRead::Data(NonZeroUsize::new(16).unwrap())
        );
    }

    #[test]
    fn offset_source_reports_read_failure_with_offset() {
        let reader = Scripted(vec![Err(io::Error::other("ecc"))]);
        let mut source = OffsetSource::new(FlashRegion::new(0x40, 0x4000), reader).unwrap();
        let mut block = [0u8; BLOCK_SIZE];

        match source.read_block(0x40, &mut block) {
            Err(DumpError::ReadFailed { offset, .. }) => assert_eq!(offset, 0x40),
            other => panic!("expected a read failure, got {other:?}"),
        }
    }
}
