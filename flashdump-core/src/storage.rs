//! Bringing removable storage up and down.
//!
//! [`StorageMount::acquire`] walks the backend through init, partition lookup,
//! type check, filesystem init and mount. The returned [`MountHandle`] owns the
//! mounted state: releasing it (or dropping it) unmounts, shuts the filesystem
//! driver down and shuts the storage subsystem down, in that order.
use crate::config::DumpConfig;
use crate::error::DumpError;
use crate::mbr::PartitionInfo;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The storage driver and filesystem driver underneath a mount.
///
/// Each call is a single blocking step; none of them retry.
pub trait StorageBackend {
    /// Human-readable name of the device, used in logs and errors.
    fn device(&self) -> &Path;

    /// Brings the storage subsystem up.
    fn init(&mut self) -> io::Result<()>;

    /// Looks up partition `index`. `Ok(None)` means there is no such partition.
    fn partition(&mut self, index: usize) -> io::Result<Option<PartitionInfo>>;

    /// Brings the filesystem driver up.
    fn fs_init(&mut self, filesystem: &str) -> io::Result<()>;

    /// Mounts `partition` read-write at `mount_point`.
    fn mount(&mut self, partition: &PartitionInfo, filesystem: &str, mount_point: &Path) -> io::Result<()>;

    fn unmount(&mut self, mount_point: &Path) -> io::Result<()>;

    fn fs_shutdown(&mut self) -> io::Result<()>;

    fn shutdown(&mut self) -> io::Result<()>;
}

/// Entry point for mounting removable storage.
pub struct StorageMount;

impl StorageMount {
    /// Initializes the storage behind `backend` and mounts partition 0 at the
    /// configured mount point.
    ///
    /// The first failing step ends the sequence. Nothing is torn down on
    /// failure, and no handle exists to tear down with.
    pub fn acquire<'b>(
        backend: &'b mut dyn StorageBackend,
        config: &DumpConfig,
    ) -> Result<MountHandle<'b>, DumpError> {
        let device = backend.device().to_path_buf();
        info!(device = %device.display(), "Initializing storage");
        backend
            .init()
            .map_err(|source| DumpError::StorageInitFailed { device, source })?;

        let partition = match backend.partition(0) {
            Ok(Some(partition)) => partition,
            Ok(None) => return Err(DumpError::NoPartitionFound { index: 0, source: None }),
            Err(source) => {
                return Err(DumpError::NoPartitionFound {
                    index: 0,
                    source: Some(source),
                });
            }
        };
        debug!(
            type_tag = partition.type_tag,
            start_lba = partition.start_lba,
            sectors = partition.sectors,
            "Found partition 0 ({})",
            partition.type_name()
        );

        if partition.type_tag != config.partition_type {
            return Err(DumpError::WrongPartitionType {
                expected: config.partition_type,
                found: partition.type_tag,
            });
        }

        backend
            .fs_init(&config.filesystem)
            .map_err(|source| DumpError::FilesystemInitFailed {
                filesystem: config.filesystem.clone(),
                source,
            })?;

        backend
            .mount(&partition, &config.filesystem, &config.mount_point)
            .map_err(|source| DumpError::MountFailed {
                mount_point: config.mount_point.clone(),
                filesystem: config.filesystem.clone(),
                source,
            })?;
        info!(mount_point = %config.mount_point.display(), "Mounted {}", config.filesystem);

        Ok(MountHandle {
            backend: Some(backend),
            mount_point: config.mount_point.clone(),
            partition: Some(partition),
        })
    }

    /// A handle for storage that is already available at `mount_point` and
    /// needs no bring-up. Acquiring and releasing it do nothing.
    pub fn unmanaged<'b>(mount_point: &Path) -> MountHandle<'b> {
        MountHandle {
            backend: None,
            mount_point: mount_point.to_path_buf(),
            partition: None,
        }
    }
}

/// Proof that a filesystem is mounted at [`MountHandle::mount_point`].
///
/// Dropping the handle tears the mount down; [`MountHandle::release`] does the
/// same and reports the first failure.
pub struct MountHandle<'b> {
    backend: Option<&'b mut dyn StorageBackend>,
    mount_point: PathBuf,
    partition: Option<PartitionInfo>,
}

impl MountHandle<'_> {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// The partition that was mounted, if storage was brought up by this
    /// handle.
    pub fn partition(&self) -> Option<&PartitionInfo> {
        self.partition.as_ref()
    }

    /// Unmounts, shuts down the filesystem driver and shuts down the storage
    /// subsystem. Every step runs even if an earlier one fails.
    pub fn release(mut self) -> io::Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> io::Result<()> {
        let Some(backend) = self.backend.take() else {
            return Ok(());
        };

        info!(mount_point = %self.mount_point.display(), "Unmounting storage");
        let steps = [
            ("unmount", backend.unmount(&self.mount_point)),
            ("filesystem shutdown", backend.fs_shutdown()),
            ("storage shutdown", backend.shutdown()),
        ];

        let mut first_error = None;
        for (step, result) in steps {
            if let Err(e) = result {
                warn!(error = %e, "Storage {} failed", step);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for MountHandle<'_> {
    fn drop(&mut self) {
        // Errors were already logged by `teardown`.
        let _ = self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LINUX_PARTITION_TYPE;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        type_tag: Option<u8>,
        fail: Option<&'static str>,
    }

    impl Recorder {
        fn step(&mut self, name: &'static str) -> io::Result<()> {
            self.calls.push(name);
            if self.fail == Some(name) {
                Err(io::Error::other(format!("{name} failed")))
            } else {
                Ok(())
            }
        }
    }

    impl StorageBackend for Recorder {
        fn device(&self) -> &Path {
            Path::new("/dev/fake")
        }
        fn init(&mut self) -> io::Result<()> {
            self.step("init")
        }
        fn partition(&mut self, index: usize) -> io::Result<Option<PartitionInfo>> {
            self.step("partition")?;
            Ok(self.type_tag.map(|type_tag| PartitionInfo {
                index,
                type_tag,
                start_lba: 2048,
                sectors: 4096,
            }))
        }
        fn fs_init(&mut self, _filesystem: &str) -> io::Result<()> {
            self.step("fs_init")
        }
        fn mount(&mut self, _: &PartitionInfo, _: &str, _: &Path) -> io::Result<()> {
            self.step("mount")
        }
        fn unmount(&mut self, _: &Path) -> io::Result<()> {
            self.step("unmount")
        }
        fn fs_shutdown(&mut self) -> io::Result<()> {
            self.step("fs_shutdown")
        }
        fn shutdown(&mut self) -> io::Result<()> {
            self.step("shutdown")
        }
    }

    fn linux_card() -> Recorder {
        Recorder {
            type_tag: Some(LINUX_PARTITION_TYPE),
            ..Default::default()
        }
    }

    #[test]
    fn acquire_then_release_runs_every_step_in_order() {
        let mut backend = linux_card();
        let handle = StorageMount::acquire(&mut backend, &DumpConfig::default()).unwrap();
        assert_eq!(handle.mount_point(), Path::new(crate::config::MOUNT_POINT));
        assert_eq!(handle.partition().map(|p| p.type_tag), Some(0x83));
        handle.release().unwrap();

        assert_eq!(
            backend.calls,
            ["init", "partition", "fs_init", "mount", "unmount", "fs_shutdown", "shutdown"]
        );
    }

    #[test]
    fn dropping_the_handle_tears_down_once() {
        let mut backend = linux_card();
        {
            let _handle = StorageMount::acquire(&mut backend, &DumpConfig::default()).unwrap();
        }
        assert_eq!(backend.calls.iter().filter(|c| **c == "unmount").count(), 1);
        assert_eq!(backend.calls.last(), Some(&"shutdown"));
    }

    #[test]
    fn wrong_partition_type_stops_before_fs_init() {
        let mut backend = Recorder {
            type_tag: Some(0x0C),
            ..Default::default()
        };
        let err = StorageMount::acquire(&mut backend, &DumpConfig::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            DumpError::WrongPartitionType {
                expected: 0x83,
                found: 0x0C
            }
        ));
        assert_eq!(backend.calls, ["init", "partition"]);
    }

    #[test]
    fn missing_partition_is_reported() {
        let mut backend = Recorder::default();
        let err = StorageMount::acquire(&mut backend, &DumpConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, DumpError::NoPartitionFound { index: 0, .. }));
    }

    #[test]
    fn failed_mount_leaves_teardown_to_the_caller() {
        let mut backend = Recorder {
            fail: Some("mount"),
            ..linux_card()
        };
        let err = StorageMount::acquire(&mut backend, &DumpConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, DumpError::MountFailed { .. }));
        assert_eq!(backend.calls, ["init", "partition", "fs_init", "mount"]);
    }

    #[test]
    fn release_keeps_going_after_a_failed_unmount() {
        let mut backend = Recorder {
            fail: Some("unmount"),
            ..linux_card()
        };
        let handle = StorageMount::acquire(&mut backend, &DumpConfig::default()).unwrap();
        assert!(handle.release().is_err());
        assert_eq!(&backend.calls[4..], ["unmount", "fs_shutdown", "shutdown"]);
    }

    #[test]
    fn unmanaged_handle_is_a_no_op() {
        let handle = StorageMount::unmanaged(Path::new("/pc"));
        assert_eq!(handle.mount_point(), Path::new("/pc"));
        assert!(handle.partition().is_none());
        handle.release().unwrap();
    }
}
