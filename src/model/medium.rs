//! Medium: a cartridge or directory that holds extents.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::model::lock::Lock;

/// The physical family a medium (and the devices that take it) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediumFamily {
    /// Tape cartridge, handled by a robotic library.
    Tape,
    /// Directory on a locally-mounted filesystem.
    Dir,
}

impl fmt::Display for MediumFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediumFamily::Tape => write!(f, "tape"),
            MediumFamily::Dir => write!(f, "dir"),
        }
    }
}

/// Identity of a medium: unique within a family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediumId {
    pub family: MediumFamily,
    pub name: String,
}

impl fmt::Display for MediumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.name)
    }
}

/// Filesystem-level lifecycle of a medium's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsStatus {
    /// Never formatted.
    Blank,
    /// Formatted, carries no live extents.
    Empty,
    /// Formatted, carries some extents, still has space.
    Used,
    /// Formatted, out of usable space.
    Full,
    /// Currently being imported (e.g. freshly discovered by inventory).
    Importing,
}

bitflags! {
    /// Administrative capability flags on a medium.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MediumFlags: u8 {
        const GET    = 0b001;
        const PUT    = 0b010;
        const DELETE = 0b100;
    }
}

impl Default for MediumFlags {
    fn default() -> Self {
        MediumFlags::GET | MediumFlags::PUT | MediumFlags::DELETE
    }
}

/// Administrative status of a medium or device row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmStatus {
    Locked,
    Unlocked,
}

/// Usage counters carried on a medium row. 64-bit counters are kept as
/// `u64` here; the on-disk/wire encoding of the state index stores them
/// as decimal strings, handled at the
/// index boundary rather than in this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediumStats {
    pub nb_obj: u64,
    pub logical_used: u64,
    pub phys_used: u64,
    pub phys_free: u64,
}

/// A cartridge or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medium {
    pub id: MediumId,
    pub model: String,
    pub fs_type: String,
    pub addr_type: String,
    pub adm_status: AdmStatus,
    pub fs_status: FsStatus,
    pub flags: MediumFlags,
    pub tags: Vec<String>,
    pub stats: MediumStats,
    pub lock: Option<Lock>,
}

impl Medium {
    /// `true` if this medium is not locked by anyone else and carries all
    /// the requested `tags`.
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }

    /// Free space a caller can still write into this medium.
    pub fn free_space(&self) -> u64 {
        self.stats.phys_free
    }

    /// `true` if a write could land at least one byte here. Whether this
    /// medium can take an entire requested size whole, or only a split of
    /// it, is a placement preference for the caller to weigh, not a gate.
    pub fn is_writable(&self, tags: &[String]) -> bool {
        self.adm_status == AdmStatus::Unlocked
            && matches!(self.fs_status, FsStatus::Empty | FsStatus::Used)
            && self.flags.contains(MediumFlags::PUT)
            && self.has_tags(tags)
            && self.free_space() > 0
    }
}
