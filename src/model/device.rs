//! Device: a drive (or directory mount-host) on one host.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::lock::Lock;
use crate::model::medium::{AdmStatus, MediumFamily, MediumId};

/// Identity of a device: unique within a family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub family: MediumFamily,
    pub serial: String,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.serial)
    }
}

/// In-memory operational state of a drive. `mounted ⇒ loaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Empty,
    Loaded,
    Mounted,
    Failed,
    Unknown,
}

impl Default for OpStatus {
    fn default() -> Self {
        OpStatus::Empty
    }
}

/// A drive on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub host: String,
    pub model: String,
    pub path: String,
    pub adm_status: AdmStatus,
    pub op_status: OpStatus,
    pub lock: Option<Lock>,
}

impl Device {
    pub fn new(id: DeviceId, host: impl Into<String>, model: impl Into<String>, path: impl Into<String>) -> Self {
        Device {
            id,
            host: host.into(),
            model: model.into(),
            path: path.into(),
            adm_status: AdmStatus::Unlocked,
            op_status: OpStatus::Empty,
            lock: None,
        }
    }
}

/// Runtime state attached to a device agent while a medium is loaded on
/// it: the associated medium id, mount path (once mounted), and
/// sync-batching accounting.
#[derive(Debug, Clone, Default)]
pub struct DeviceRuntime {
    pub medium: Option<MediumId>,
    pub mount_path: Option<String>,
    pub release_queue: Vec<PendingRelease>,
    pub oldest_pending_ts: Option<std::time::SystemTime>,
    pub pending_bytes: u64,
}

/// One not-yet-synced release waiting to be acknowledged.
#[derive(Debug, Clone)]
pub struct PendingRelease {
    pub requester: u64,
    pub size_written: u64,
}

impl DeviceRuntime {
    pub fn record_release(&mut self, requester: u64, size_written: u64, now: std::time::SystemTime) {
        if self.oldest_pending_ts.is_none() {
            self.oldest_pending_ts = Some(now);
        }
        self.pending_bytes += size_written;
        self.release_queue.push(PendingRelease {
            requester,
            size_written,
        });
    }

    pub fn take_pending(&mut self) -> (Vec<PendingRelease>, u64) {
        let bytes = self.pending_bytes;
        self.pending_bytes = 0;
        self.oldest_pending_ts = None;
        (std::mem::take(&mut self.release_queue), bytes)
    }

    pub fn is_idle(&self) -> bool {
        self.release_queue.is_empty()
    }
}
