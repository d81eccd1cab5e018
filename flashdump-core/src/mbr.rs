//! Just enough of the MBR partition table to find and identify a partition.
use std::io;

/// Size of the boot sector holding the partition table.
pub const SECTOR_SIZE: usize = 512;

const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
const PARTITION_COUNT: usize = 4;
const SIGNATURE_OFFSET: usize = 510;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// A primary partition as described by the partition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionInfo {
    /// Zero-based index into the partition table.
    pub index: usize,
    /// The declared filesystem type tag (e.g. `0x83` for Linux).
    pub type_tag: u8,
    pub start_lba: u32,
    pub sectors: u32,
}

impl PartitionInfo {
    /// Human-readable name for the type tag.
    pub fn type_name(&self) -> &'static str {
        type_name(self.type_tag)
    }
}

/// Decodes entry `index` of the partition table in `sector`.
///
/// Returns `Ok(None)` when the entry is unused. A sector without the boot
/// signature is invalid data.
pub fn parse_partition(sector: &[u8; SECTOR_SIZE], index: usize) -> io::Result<Option<PartitionInfo>> {
    if sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] != SIGNATURE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing MBR boot signature",
        ));
    }
    if index >= PARTITION_COUNT {
        return Ok(None);
    }

    let at = PARTITION_TABLE_OFFSET + index * PARTITION_ENTRY_SIZE;
    let entry = &sector[at..at + PARTITION_ENTRY_SIZE];
    let type_tag = entry[4];
    if type_tag == 0 {
        return Ok(None);
    }

    Ok(Some(PartitionInfo {
        index,
        type_tag,
        start_lba: u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]),
        sectors: u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]),
    }))
}

pub fn type_name(type_tag: u8) -> &'static str {
    match type_tag {
        0x01 => "FAT12",
        0x04 | 0x06 | 0x0E => "FAT16",
        0x07 => "NTFS/exFAT",
        0x0B | 0x0C => "FAT32",
        0x82 => "Linux swap",
        0x83 => "Linux",
        0x8E => "Linux LVM",
        0xEE => "GPT protective",
        0xEF => "EFI System",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_with(entries: &[(usize, u8, u32, u32)]) -> [u8; SECTOR_SIZE] {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[510] = 0x55;
        sector[511] = 0xAA;
        for &(index, tag, lba, len) in entries {
            let at = PARTITION_TABLE_OFFSET + index * PARTITION_ENTRY_SIZE;
            sector[at + 4] = tag;
            sector[at + 8..at + 12].copy_from_slice(&lba.to_le_bytes());
            sector[at + 12..at + 16].copy_from_slice(&len.to_le_bytes());
        }
        sector
    }

    #[test]
    fn decodes_first_linux_partition() {
        let sector = sector_with(&[(0, 0x83, 2048, 1_000_000)]);
        let part = parse_partition(&sector, 0).unwrap().unwrap();
        assert_eq!(
            part,
            PartitionInfo {
                index: 0,
                type_tag: 0x83,
                start_lba: 2048,
                sectors: 1_000_000,
            }
        );
        assert_eq!(part.type_name(), "Linux");
    }

    #[test]
    fn empty_entry_is_none() {
        let sector = sector_with(&[(1, 0x0C, 63, 100)]);
        assert_eq!(parse_partition(&sector, 0).unwrap(), None);
        assert_eq!(parse_partition(&sector, 1).unwrap().unwrap().type_tag, 0x0C);
        assert_eq!(parse_partition(&sector, 4).unwrap(), None);
    }

    #[test]
    fn missing_signature_is_invalid_data() {
        let mut sector = sector_with(&[(0, 0x83, 1, 1)]);
        sector[511] = 0;
        let err = parse_partition(&sector, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
