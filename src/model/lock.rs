//! Advisory row lock shared by device and medium rows.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// `{hostname, owner_pid, acquired_at}`. Ownership is renewed in place
/// when the owner pid changes for the same hostname; a lock held by
/// another hostname is never silently stolen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub hostname: String,
    pub owner_pid: u32,
    #[serde(with = "crate::model::time_serde")]
    pub acquired_at: SystemTime,
}

impl Lock {
    pub fn new(hostname: impl Into<String>, owner_pid: u32, acquired_at: SystemTime) -> Self {
        Lock {
            hostname: hostname.into(),
            owner_pid,
            acquired_at,
        }
    }

    /// Whether `hostname` may take this lock over: either it is free, or
    /// already held by the very same (hostname, pid) pair.
    pub fn held_by(&self, hostname: &str) -> bool {
        self.hostname == hostname
    }
}
