//! Layout: the ordered set of extents reconstituting one object version.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::extent::{Extent, ExtentState};

/// Named composition rule a layout's extents obey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutType {
    Raid1,
    /// See `DESIGN.md`: present for schema extensibility, not implemented.
    Raid5,
}

/// Durability state of a layout, mirroring the owning object's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutState {
    Pending,
    Sync,
}

/// The ordered list of extents that, under `layout_type`'s rules,
/// reconstitutes the object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    pub oid: String,
    pub uuid: Uuid,
    pub version: u32,
    pub layout_type: LayoutType,
    pub params: HashMap<String, String>,
    pub extents: Vec<Extent>,
    pub state: LayoutState,
}

impl Layout {
    pub fn new(oid: impl Into<String>, uuid: Uuid, version: u32, layout_type: LayoutType) -> Self {
        Layout {
            oid: oid.into(),
            uuid,
            version,
            layout_type,
            params: HashMap::new(),
            extents: Vec::new(),
            state: LayoutState::Pending,
        }
    }

    /// `true` once every extent in the layout has reached `sync`.
    pub fn all_synced(&self) -> bool {
        !self.extents.is_empty() && self.extents.iter().all(|e| e.state == ExtentState::Sync)
    }
}
