use crate::mbr;
use std::fmt;
use std::path::PathBuf;

/// Represents a removable block device that can take a dump.
///
/// This struct holds information about a device, such as its system path,
/// size, mount point and the type of its first partition. It is populated by
/// the platform-specific discovery functions in the [`crate::platform`] module.
#[derive(Clone, Debug)]
pub struct Device {
    /// The system path to the device (e.g., `/dev/sdb` or `/dev/mmcblk0`).
    pub path: PathBuf,
    /// The kernel-provided name of the device (e.g., "sdb").
    pub name: String,
    /// The total size of the device in gigabytes (GB).
    pub size_gb: f64,
    /// The primary mount point of the device, if any.
    pub mount_point: String,
    /// Type tag of partition 0, if the partition table could be read.
    pub partition_type: Option<u8>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount_info = if !self.mount_point.is_empty() {
            format!("[Mounted at {}]", self.mount_point)
        } else {
            "[Not mounted]".to_string()
        };
        let partition_info = match self.partition_type {
            Some(tag) => format!("0x{:02X} {}", tag, mbr::type_name(tag)),
            None => "no partition table".to_string(),
        };

        write!(
            f,
            "{:<15} {:.1} GB ({}) {}",
            self.path.display(),
            self.size_gb,
            partition_info,
            mount_info
        )
    }
}
