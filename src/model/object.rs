//! Object: the user-visible unit of storage.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durability state of an object. `pending → sync` once every extent of
/// its current layout reports sync; `deprecated` once superseded or
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    Pending,
    Sync,
    Deprecated,
}

/// `{oid, uuid, version, user_md, deprecated?}`. Identity is
/// `(uuid, version)`; `oid` is a mutable human name. At most one live
/// `oid` exists across living objects, but multiple deprecated
/// generations may share a `uuid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub oid: String,
    pub uuid: Uuid,
    pub version: u32,
    pub user_md: HashMap<String, String>,
    pub state: ObjectState,
}

impl Object {
    pub fn new(oid: impl Into<String>, uuid: Uuid, version: u32) -> Self {
        Object {
            oid: oid.into(),
            uuid,
            version,
            user_md: HashMap::new(),
            state: ObjectState::Pending,
        }
    }

    /// Compact, key-sorted JSON encoding of `user_md`, as stored in the
    /// `user.user_md` xattr on each extent.
    pub fn user_md_json(&self) -> String {
        let sorted: std::collections::BTreeMap<_, _> = self.user_md.iter().collect();
        serde_json::to_string(&sorted).expect("BTreeMap<String, String> always serializes")
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.state, ObjectState::Deprecated)
    }
}
