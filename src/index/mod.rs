//! State index: typed filter DSL plus an in-memory reference
//! implementation used by the core's own tests and by `phobos-tests`.

pub mod filter;
pub mod memory;

pub use filter::Filter;
pub use memory::{classify_storage_error, IndexRow, StateIndex, StorageErrorKind};

use crate::model::{Device, Extent, Layout, Medium, Object};

macro_rules! json_attrs {
    ($ty:ty) => {
        impl IndexRow for $ty {
            fn attrs(&self) -> serde_json::Value {
                serde_json::to_value(self).expect("model type always serializes to JSON")
            }
        }
    };
}

json_attrs!(Object);
json_attrs!(Layout);
json_attrs!(Medium);
json_attrs!(Device);
json_attrs!(Extent);
