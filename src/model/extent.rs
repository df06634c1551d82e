//! Extent: one chunk of one object version as stored on one medium.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::medium::MediumId;

/// Durability state of an extent. `sync` is only reached after the
/// medium has been successfully flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtentState {
    Pending,
    Sync,
    Orphan,
}

/// A chunk of one object written to one medium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub oid: String,
    pub uuid: Uuid,
    pub version: u32,
    pub layout_index: u32,
    pub size: u64,
    pub media_id: MediumId,
    pub address: String,
    pub state: ExtentState,
    /// `xxh3_64` checksum of the bytes stored in this extent.
    pub xxh: u64,
}

impl Extent {
    pub fn is_live(&self) -> bool {
        !matches!(self.state, ExtentState::Orphan)
    }
}
