//! Data model
//!
//! Plain value types for the five row kinds the rest of this crate
//! tracks: object, extent, layout, medium, device (plus the `lock`
//! type shared by the latter two). These carry no behavior beyond
//! small predicates; the state machines and algorithms that operate on
//! them live in `device_agent`, `scheduler`, and `layout`.

pub mod device;
pub mod extent;
pub mod layout;
pub mod lock;
pub mod medium;
pub mod object;

pub use device::{Device, DeviceId, DeviceRuntime, OpStatus};
pub use extent::{Extent, ExtentState};
pub use layout::{Layout, LayoutState, LayoutType};
pub use lock::Lock;
pub use medium::{AdmStatus, FsStatus, Medium, MediumFamily, MediumFlags, MediumId, MediumStats};
pub use object::{Object, ObjectState};

/// `serde_with`-style helper for `SystemTime` fields, encoded as
/// milliseconds since the Unix epoch on the wire and in the state index.
pub(crate) mod time_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, ser: S) -> Result<S::Ok, S::Error> {
        let millis = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        ser.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SystemTime, D::Error> {
        let millis = u64::deserialize(de)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}
