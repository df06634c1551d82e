//! Per-drive state machine: `empty → loaded → mounted`, with
//! `failed` reachable from any state on an unrecoverable adapter error.
//!
//! A small struct owns the transition logic and the one piece of state
//! (`DeviceRuntime`) that only makes sense while a medium is attached,
//! while the caller (the scheduler) owns the index rows the agent reads
//! and writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{error, info, warn};

use crate::adapters::{FilesystemAdapter, LibraryAdapter};
use crate::config::Config;
use crate::error::{PhoError, PhoResult};
use crate::model::device::PendingRelease;
use crate::model::{AdmStatus, Device, DeviceRuntime, FsStatus, Lock, Medium, MediumFamily, OpStatus};

/// Which medium models a device model accepts, keyed by
/// `(family, device_model)`. A family with no entry for a given device
/// model accepts any medium of that family — restriction is opt-in.
#[derive(Debug, Clone, Default)]
pub struct CompatibilityTable {
    rules: HashMap<(MediumFamily, String), Vec<String>>,
}

impl CompatibilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restrict(
        &mut self,
        device_family: MediumFamily,
        device_model: impl Into<String>,
        medium_models: Vec<String>,
    ) {
        self.rules.insert((device_family, device_model.into()), medium_models);
    }

    pub fn is_compatible(
        &self,
        device_family: MediumFamily,
        device_model: &str,
        medium_family: MediumFamily,
        medium_model: &str,
    ) -> bool {
        if device_family != medium_family {
            return false;
        }
        match self.rules.get(&(device_family, device_model.to_string())) {
            Some(allowed) => allowed.iter().any(|m| m == medium_model),
            None => true,
        }
    }
}

/// The in-process half of one drive: the transition logic and runtime
/// accounting that has no place on the persisted [`Device`] row.
#[derive(Debug, Default)]
pub struct DeviceAgent {
    pub op_status: OpStatus,
    pub runtime: DeviceRuntime,
}

impl DeviceAgent {
    pub fn new() -> Self {
        DeviceAgent {
            op_status: OpStatus::Empty,
            runtime: DeviceRuntime::default(),
        }
    }

    /// `empty → loaded`.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        &mut self,
        library: &mut dyn LibraryAdapter,
        compat: &CompatibilityTable,
        device: &mut Device,
        drive_addr: &str,
        medium: &mut Medium,
        medium_addr: &str,
        hostname: &str,
        owner_pid: u32,
    ) -> PhoResult<()> {
        if self.op_status != OpStatus::Empty {
            return Err(PhoError::Invalid(format!(
                "device '{}' is not empty (state: {:?})",
                device.id, self.op_status
            )));
        }
        if device.adm_status == AdmStatus::Locked {
            return Err(PhoError::Busy(format!("device '{}' is administratively locked", device.id)));
        }
        if !compat.is_compatible(device.id.family, &device.model, medium.id.family, &medium.model) {
            return Err(PhoError::Invalid(format!(
                "medium model '{}' is not compatible with device model '{}'",
                medium.model, device.model
            )));
        }

        library.move_medium(medium_addr, drive_addr)?;

        let now = SystemTime::now();
        medium.lock = Some(Lock::new(hostname, owner_pid, now));
        device.lock = Some(Lock::new(hostname, owner_pid, now));
        self.runtime.medium = Some(medium.id.clone());
        self.op_status = OpStatus::Loaded;
        device.op_status = OpStatus::Loaded;
        info!("device {} loaded medium {}", device.id, medium.id);
        Ok(())
    }

    /// `loaded → mounted`.
    pub fn mount(
        &mut self,
        fs: &mut dyn FilesystemAdapter,
        device: &mut Device,
        medium: &mut Medium,
        mount_prefix: &str,
    ) -> PhoResult<PathBuf> {
        if self.op_status != OpStatus::Loaded {
            return Err(PhoError::Invalid(format!(
                "device '{}' is not loaded (state: {:?})",
                device.id, self.op_status
            )));
        }

        let drive_basename = Path::new(&device.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&device.id.serial);
        let expected_root = PathBuf::from(format!("{mount_prefix}{drive_basename}"));
        let label = medium.id.to_string();

        let already_mounted = fs.mounted_at(&device.path)?;
        let adopted = already_mounted.as_deref() == Some(expected_root.as_path());
        if !adopted {
            if let Err(e) = fs.mount(&device.path, &expected_root, &label) {
                self.fail(device, Some(medium), format!("mount failed: {e}"));
                return Err(e);
            }
        }

        match fs.get_label(&expected_root) {
            Ok(actual) if actual == label => {}
            Ok(actual) => {
                self.fail(
                    device,
                    Some(medium),
                    format!("label mismatch on mount: expected '{label}', found '{actual}'"),
                );
                return Err(PhoError::Fatal(format!(
                    "label mismatch on device '{}': expected '{label}'",
                    device.id
                )));
            }
            Err(e) => {
                self.fail(device, Some(medium), format!("failed to read label: {e}"));
                return Err(e);
            }
        }

        self.runtime.mount_path = Some(expected_root.display().to_string());
        self.op_status = OpStatus::Mounted;
        device.op_status = OpStatus::Mounted;
        info!("device {} mounted at {}", device.id, expected_root.display());
        Ok(expected_root)
    }

    /// `mounted → loaded`.
    pub fn umount(&mut self, fs: &mut dyn FilesystemAdapter, device: &mut Device) -> PhoResult<()> {
        if self.op_status != OpStatus::Mounted {
            return Err(PhoError::Invalid(format!(
                "device '{}' is not mounted (state: {:?})",
                device.id, self.op_status
            )));
        }
        let root = self
            .runtime
            .mount_path
            .clone()
            .ok_or_else(|| PhoError::Fatal("mounted device has no recorded mount path".into()))?;
        fs.umount(&device.path, Path::new(&root))?;
        self.runtime.mount_path = None;
        self.op_status = OpStatus::Loaded;
        device.op_status = OpStatus::Loaded;
        Ok(())
    }

    /// `loaded → empty`.
    pub fn unload(
        &mut self,
        library: &mut dyn LibraryAdapter,
        device: &mut Device,
        medium: &mut Medium,
        drive_addr: &str,
        free_slot_addr: &str,
    ) -> PhoResult<()> {
        if self.op_status != OpStatus::Loaded {
            return Err(PhoError::Invalid(format!(
                "device '{}' is not loaded (state: {:?})",
                device.id, self.op_status
            )));
        }
        match library.move_medium(drive_addr, free_slot_addr) {
            Ok(()) => {}
            Err(e @ PhoError::Busy(_)) => return Err(e),
            Err(e) => return Err(e),
        }
        medium.lock = None;
        device.lock = None;
        self.runtime.medium = None;
        self.op_status = OpStatus::Empty;
        device.op_status = OpStatus::Empty;
        Ok(())
    }

    /// Any state → `failed`: releases both locks and refuses further
    /// operations until an admin `notify(unlock)` calls [`Self::revive`].
    pub fn fail(&mut self, device: &mut Device, medium: Option<&mut Medium>, reason: impl Into<String>) {
        let reason = reason.into();
        error!("device {} failed: {reason}", device.id);
        if let Some(m) = medium {
            m.lock = None;
        }
        device.lock = None;
        self.op_status = OpStatus::Failed;
        device.op_status = OpStatus::Failed;
        self.runtime = DeviceRuntime::default();
    }

    /// Admin `notify(unlock)` on a `failed` device: returns it to `empty`.
    pub fn revive(&mut self, device: &mut Device) -> PhoResult<()> {
        if self.op_status != OpStatus::Failed {
            return Err(PhoError::Invalid(format!(
                "device '{}' is not failed (state: {:?})",
                device.id, self.op_status
            )));
        }
        self.op_status = OpStatus::Empty;
        device.op_status = OpStatus::Empty;
        warn!("device {} revived by admin unlock", device.id);
        Ok(())
    }

    pub fn record_release(&mut self, requester: u64, size_written: u64, now: SystemTime) {
        self.runtime.record_release(requester, size_written, now);
    }

    /// `true` once any of the three sync thresholds is crossed.
    pub fn should_sync(&self, cfg: &Config, family: MediumFamily, now: SystemTime) -> bool {
        if self.runtime.is_idle() {
            return false;
        }
        if let Some(&bytes_threshold) = cfg.sync_bytes_threshold.get(&family) {
            if self.runtime.pending_bytes >= bytes_threshold {
                return true;
            }
        }
        if let Some(&count_threshold) = cfg.sync_nb_req_threshold.get(&family) {
            if self.runtime.release_queue.len() as u32 >= count_threshold {
                return true;
            }
        }
        if let (Some(oldest), Some(&time_threshold)) =
            (self.runtime.oldest_pending_ts, cfg.sync_time_threshold.get(&family))
        {
            if now.duration_since(oldest).unwrap_or_default() >= time_threshold {
                return true;
            }
        }
        false
    }

    /// Flushes the mounted medium and updates its usage stats and
    /// `fs_status` (blank→empty, empty→used, or →full on out-of-space).
    /// Returns the batch of releases that are now covered by the sync,
    /// for the caller to turn into `release_ack` responses.
    pub fn sync(
        &mut self,
        io: &mut dyn crate::adapters::IoAdapter,
        medium: &mut Medium,
    ) -> PhoResult<Vec<PendingRelease>> {
        if self.op_status != OpStatus::Mounted {
            return Err(PhoError::Invalid(format!("device is not mounted (state: {:?})", self.op_status)));
        }
        let root = self
            .runtime
            .mount_path
            .clone()
            .ok_or_else(|| PhoError::Fatal("mounted device has no recorded mount path".into()))?;

        io.medium_sync(Path::new(&root))?;

        let (pending, bytes) = self.runtime.take_pending();
        medium.stats.nb_obj += pending.len() as u64;
        medium.stats.logical_used += bytes;
        medium.stats.phys_used += bytes;
        medium.stats.phys_free = medium.stats.phys_free.saturating_sub(bytes);
        medium.fs_status = if medium.stats.phys_free == 0 {
            FsStatus::Full
        } else {
            match medium.fs_status {
                FsStatus::Blank => FsStatus::Empty,
                other => {
                    if matches!(other, FsStatus::Empty) {
                        FsStatus::Used
                    } else {
                        other
                    }
                }
            }
        };
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake::{FakeFilesystem, FakeLibrary};
    use crate::model::{AdmStatus, DeviceId, MediumFlags, MediumId, MediumStats};

    fn test_device() -> Device {
        Device::new(
            DeviceId {
                family: MediumFamily::Dir,
                serial: "drv0".into(),
            },
            "host1",
            "dir-drive",
            "/dev/fake0",
        )
    }

    fn test_medium() -> Medium {
        Medium {
            id: MediumId {
                family: MediumFamily::Dir,
                name: "med0".into(),
            },
            model: "dir-medium".into(),
            fs_type: "posix".into(),
            addr_type: "path".into(),
            adm_status: AdmStatus::Unlocked,
            fs_status: FsStatus::Empty,
            flags: MediumFlags::default(),
            tags: vec![],
            stats: MediumStats::default(),
            lock: None,
        }
    }

    #[test]
    fn load_then_mount_then_unload_round_trips() {
        let mut library = FakeLibrary::new();
        library.add_drive("drive-addr");
        library.add_slot("slot-addr", "med0");
        let mut fs = FakeFilesystem::new(1 << 30);
        fs.format("/dev/fake0", "dir:med0").unwrap();

        let mut agent = DeviceAgent::new();
        let compat = CompatibilityTable::new();
        let mut device = test_device();
        let mut medium = test_medium();

        agent
            .load(
                &mut library,
                &compat,
                &mut device,
                "drive-addr",
                &mut medium,
                "slot-addr",
                "host1",
                123,
            )
            .unwrap();
        assert_eq!(agent.op_status, OpStatus::Loaded);
        assert!(device.lock.is_some());

        agent.mount(&mut fs, &mut device, &mut medium, "/mnt/phobos-").unwrap();
        assert_eq!(agent.op_status, OpStatus::Mounted);

        agent.umount(&mut fs, &mut device).unwrap();
        assert_eq!(agent.op_status, OpStatus::Loaded);

        agent
            .unload(&mut library, &mut device, &mut medium, "drive-addr", "slot-addr")
            .unwrap();
        assert_eq!(agent.op_status, OpStatus::Empty);
        assert!(device.lock.is_none());
        assert!(medium.lock.is_none());
    }

    #[test]
    fn incompatible_model_is_rejected_before_any_move() {
        let mut library = FakeLibrary::new();
        library.add_drive("drive-addr");
        library.add_slot("slot-addr", "med0");

        let mut compat = CompatibilityTable::new();
        compat.restrict(MediumFamily::Dir, "dir-drive", vec!["other-medium".into()]);

        let mut agent = DeviceAgent::new();
        let mut device = test_device();
        let mut medium = test_medium();

        let err = agent
            .load(
                &mut library,
                &compat,
                &mut device,
                "drive-addr",
                &mut medium,
                "slot-addr",
                "host1",
                1,
            )
            .unwrap_err();
        assert!(matches!(err, PhoError::Invalid(_)));
        assert_eq!(agent.op_status, OpStatus::Empty);
    }

    #[test]
    fn fail_releases_both_locks_and_blocks_further_ops() {
        let mut agent = DeviceAgent::new();
        let mut device = test_device();
        let mut medium = test_medium();
        device.lock = Some(Lock::new("host1", 1, SystemTime::now()));
        medium.lock = Some(Lock::new("host1", 1, SystemTime::now()));
        agent.op_status = OpStatus::Mounted;

        agent.fail(&mut device, Some(&mut medium), "simulated adapter error");
        assert_eq!(agent.op_status, OpStatus::Failed);
        assert!(device.lock.is_none());
        assert!(medium.lock.is_none());

        let err = agent.mount(&mut FakeFilesystem::new(0), &mut device, &mut medium, "/mnt/").unwrap_err();
        assert!(matches!(err, PhoError::Invalid(_)));
    }
}
