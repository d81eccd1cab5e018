use crate::device::Device;
use crate::flash::{Chunk, FlashReader, FlashRegion};
use crate::mbr::{self, PartitionInfo, SECTOR_SIZE};
use crate::storage::StorageBackend;
use anyhow::{Result, anyhow};
use memmap2::{Mmap, MmapOptions};
use nix::ioctl_read;
use nix::mount::{MsFlags, mount, umount};
use std::fs::{self, File};
use std::io;
use std::num::NonZeroUsize;
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Helper to find the parent device of a partition (e.g., /dev/sda1 -> /dev/sda).
/// This is used to find the system drive's parent for exclusion.
fn get_parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") {
        if let Some(index) = path_str.rfind(|c: char| c.is_alphabetic()) {
            return PathBuf::from(&path_str[..=index]);
        }
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.rfind('p') {
            return PathBuf::from(&path_str[..index]);
        }
    }

    path.to_path_buf()
}

/// The device node of partition `number` (1-based) of a disk, e.g.
/// `/dev/sdb` -> `/dev/sdb1` and `/dev/mmcblk0` -> `/dev/mmcblk0p1`.
pub fn partition_device_path(disk: &Path, number: usize) -> PathBuf {
    let disk_str = disk.to_string_lossy();
    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{disk_str}p{number}"))
    } else {
        PathBuf::from(format!("{disk_str}{number}"))
    }
}

fn read_boot_sector(file: &File) -> io::Result<[u8; SECTOR_SIZE]> {
    let mut sector = [0u8; SECTOR_SIZE];
    file.read_exact_at(&mut sector, 0)?;
    Ok(sector)
}

/// Type tag of partition 0, if the device can be opened and carries an MBR.
fn read_partition_type(device_path: &Path) -> Option<u8> {
    let file = File::open(device_path).ok()?;
    let sector = read_boot_sector(&file).ok()?;
    mbr::parse_partition(&sector, 0)
        .ok()
        .flatten()
        .map(|p| p.type_tag)
}

/// Size in bytes of a block device or regular file.
fn device_size(file: &File) -> io::Result<u64> {
    let metadata = file.metadata()?;
    if !metadata.file_type().is_block_device() {
        return Ok(metadata.len());
    }

    let mut size_bytes: u64 = 0;
    // SAFETY: `fd` is an open block device and `size_bytes` outlives the call.
    unsafe {
        blkgetsize64(file.as_raw_fd(), &mut size_bytes)?;
    }
    Ok(size_bytes)
}

/// Whether a `/proc/filesystems` listing includes `filesystem`.
fn filesystem_listed(listing: &str, filesystem: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .any(|name| name == filesystem)
}

/// Scans for all removable block devices on a Linux system.
///
/// This function discovers devices by iterating through the `/sys/block` directory.
/// It applies several filters to ensure that only suitable, removable devices are
/// returned, excluding the main system drive for safety.
///
/// The filtering logic is as follows:
/// 1.  Find the main system drive (e.g., `/dev/nvme0n1`) and exclude it.
/// 2.  Skip any loop devices (e.g., `loop0`).
/// 3.  Check the `/sys/block/<device>/removable` flag, which is the most reliable
///     indicator of a removable device like a USB drive or SD card.
/// 4.  Check the `/sys/block/<device>/size` to filter out devices that report a size
///     of zero, which often corresponds to empty card readers.
///
/// The type of partition 0 is read from the device's MBR when the device can
/// be opened; without permission it is left unknown.
pub fn get_removable_devices() -> Result<Vec<Device>> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut system_disk_parent = None;
    for disk in disks.iter() {
        if disk.mount_point() == Path::new("/") {
            let path = PathBuf::from("/dev/").join(disk.name());
            system_disk_parent = Some(get_parent_device_path(&path));
            break;
        }
    }
    let system_disk_parent =
        system_disk_parent.ok_or_else(|| anyhow!("Could not determine system drive."))?;

    let mut devices = Vec::new();
    let block_dir = fs::read_dir("/sys/block")?;

    for entry in block_dir.filter_map(Result::ok) {
        let device_name = entry.file_name().to_string_lossy().to_string();
        let device_path = PathBuf::from("/dev/").join(&device_name);

        if device_name.starts_with("loop") || device_path == system_disk_parent {
            continue;
        }

        let is_removable = read_sys_file(&device_name, "removable")
            .map(|s| s == "1")
            .unwrap_or(false);

        if !is_removable {
            continue;
        }

        let size_sectors = read_sys_file(&device_name, "size")
            .and_then(|s| {
                s.parse::<u64>()
                    .map_err(|_| io::Error::from(io::ErrorKind::InvalidData))
            })
            .unwrap_or(0);

        if size_sectors == 0 {
            continue;
        }

        let size_gb = (size_sectors * 512) as f64 / (1024.0 * 1024.0 * 1024.0);

        let mut mount_point = "".to_string();
        for disk in disks.iter() {
            if disk.name().to_string_lossy().starts_with(&device_name) {
                let mp = disk.mount_point().to_string_lossy().to_string();
                if !mp.is_empty() {
                    mount_point = mp;
                    break;
                }
            }
        }

        let partition_type = read_partition_type(&device_path);

        devices.push(Device {
            path: device_path,
            name: device_name,
            size_gb,
            mount_point,
            partition_type,
        });
    }

    Ok(devices)
}

/// An SD card (or any MBR-partitioned block device) mounted through the
/// kernel.
///
/// Initializing opens the disk, the partition table is read from its first
/// sector, and partition 0 is mounted with `mount(2)`. Shutdown syncs and
/// closes the disk again.
pub struct SdCardBackend {
    device_path: PathBuf,
    device: Option<File>,
}

impl SdCardBackend {
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
            device: None,
        }
    }

    fn opened(&self) -> io::Result<&File> {
        self.device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "storage is not initialized"))
    }
}

impl StorageBackend for SdCardBackend {
    fn device(&self) -> &Path {
        &self.device_path
    }

    fn init(&mut self) -> io::Result<()> {
        let file = File::open(&self.device_path)?;
        debug!(size = device_size(&file)?, "Opened {}", self.device_path.display());
        self.device = Some(file);
        Ok(())
    }

    fn partition(&mut self, index: usize) -> io::Result<Option<PartitionInfo>> {
        let sector = read_boot_sector(self.opened()?)?;
        mbr::parse_partition(&sector, index)
    }

    fn fs_init(&mut self, filesystem: &str) -> io::Result<()> {
        let listing = fs::read_to_string("/proc/filesystems")?;
        if filesystem_listed(&listing, filesystem) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("the kernel has no {filesystem} driver"),
            ))
        }
    }

    fn mount(&mut self, partition: &PartitionInfo, filesystem: &str, mount_point: &Path) -> io::Result<()> {
        let node = partition_device_path(&self.device_path, partition.index + 1);
        fs::create_dir_all(mount_point)?;
        debug!(node = %node.display(), "Mounting read-write");
        mount(
            Some(node.as_path()),
            mount_point,
            Some(filesystem),
            MsFlags::empty(),
            None::<&str>,
        )?;
        Ok(())
    }

    fn unmount(&mut self, mount_point: &Path) -> io::Result<()> {
        umount(mount_point)?;
        Ok(())
    }

    fn fs_shutdown(&mut self) -> io::Result<()> {
        nix::unistd::sync();
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.device.take();
        Ok(())
    }
}

/// Reads flash exposed as a device node (e.g. `/dev/mtdblock0`) or as an
/// image file, with positioned reads.
pub struct DeviceFlashReader {
    file: File,
}

impl DeviceFlashReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Total size of the flash behind the reader.
    pub fn size(&self) -> io::Result<u64> {
        device_size(&self.file)
    }
}

impl FlashReader for DeviceFlashReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<Chunk> {
        // A positioned read returning zero bytes means end of device.
        match NonZeroUsize::new(self.file.read_at(buf, offset)?) {
            Some(n) => Ok(Chunk::Data(n)),
            None => Ok(Chunk::Exhausted),
        }
    }
}

/// Maps `window` of the physical memory behind `memory_device` (normally
/// `/dev/mem`) read-only, so the flash can be copied out of it on a host with
/// an MMU.
///
/// A regular file standing in for the memory device must cover the whole
/// window; touching a mapped page past its end would kill the process.
pub fn map_physical_window(memory_device: &Path, window: FlashRegion) -> io::Result<Mmap> {
    let len = usize::try_from(window.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "flash window exceeds the address space"))?;
    let file = File::open(memory_device)?;

    let metadata = file.metadata()?;
    if metadata.is_file() && metadata.len() < window.end() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "{} is 0x{:X} bytes and does not cover 0x{:X} - 0x{:X}",
                memory_device.display(),
                metadata.len(),
                window.start(),
                window.end()
            ),
        ));
    }

    debug!(
        device = %memory_device.display(),
        start = window.start(),
        len,
        "Mapping physical flash window"
    );
    // SAFETY: the mapping is read-only and nothing in this process writes the
    // flash window while it is mapped. Its extent was checked above for files.
    unsafe { MmapOptions::new().offset(window.start()).len(len).map(&file) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partition_nodes_follow_kernel_naming() {
        assert_eq!(partition_device_path(Path::new("/dev/sdb"), 1), PathBuf::from("/dev/sdb1"));
        assert_eq!(
            partition_device_path(Path::new("/dev/mmcblk0"), 1),
            PathBuf::from("/dev/mmcblk0p1")
        );
        assert_eq!(
            partition_device_path(Path::new("/dev/nvme0n1"), 2),
            PathBuf::from("/dev/nvme0n1p2")
        );
    }

    #[test]
    fn parent_of_a_partition_is_its_disk() {
        assert_eq!(get_parent_device_path(Path::new("/dev/sda1")), PathBuf::from("/dev/sda"));
        assert_eq!(
            get_parent_device_path(Path::new("/dev/mmcblk0p1")),
            PathBuf::from("/dev/mmcblk0")
        );
    }

    #[test]
    fn proc_filesystems_listing_is_matched_by_name() {
        let listing = "nodev\tsysfs\nnodev\tproc\n\text3\n\text2\n\text4\n";
        assert!(filesystem_listed(listing, "ext2"));
        assert!(!filesystem_listed(listing, "vfat"));
        assert!(!filesystem_listed(listing, "nodev"));
    }

    #[test]
    fn image_file_reader_reports_exhaustion_at_the_end() {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(&[7u8; 3000]).unwrap();
        image.flush().unwrap();

        let mut reader = DeviceFlashReader::open(image.path()).unwrap();
        assert_eq!(reader.size().unwrap(), 3000);

        let mut buf = [0u8; 2048];
        assert_eq!(
            reader.read_at(2048, &mut buf).unwrap(),
            Chunk::Data(NonZeroUsize::new(952).unwrap())
        );
        assert_eq!(reader.read_at(3000, &mut buf).unwrap(), Chunk::Exhausted);
    }

    #[test]
    fn physical_window_maps_the_requested_offset() {
        let mut memory = tempfile::NamedTempFile::new().unwrap();
        let mut contents = vec![0u8; 3 * 4096];
        contents[4096..2 * 4096].fill(0xA5);
        memory.write_all(&contents).unwrap();
        memory.flush().unwrap();

        let mapped = map_physical_window(memory.path(), FlashRegion::new(4096, 2 * 4096)).unwrap();
        assert_eq!(mapped.len(), 4096);
        assert!(mapped.iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn physical_window_past_the_end_of_a_file_is_refused() {
        let mut memory = tempfile::NamedTempFile::new().unwrap();
        memory.write_all(&[0u8; 4096]).unwrap();
        memory.flush().unwrap();

        let err = map_physical_window(memory.path(), FlashRegion::new(0, 2 * 4096)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn backend_reads_the_partition_table_of_an_image() {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[446 + 4] = 0x83;
        sector[446 + 8..446 + 12].copy_from_slice(&2048u32.to_le_bytes());
        sector[510] = 0x55;
        sector[511] = 0xAA;
        let mut disk = tempfile::NamedTempFile::new().unwrap();
        disk.write_all(&sector).unwrap();
        disk.flush().unwrap();

        let mut backend = SdCardBackend::new(disk.path());
        assert!(backend.partition(0).is_err());
        backend.init().unwrap();
        let part = backend.partition(0).unwrap().unwrap();
        assert_eq!(part.type_tag, 0x83);
        assert_eq!(part.start_lba, 2048);
        backend.shutdown().unwrap();
    }
}
