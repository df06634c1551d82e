//! `raid5`: present in the layout type schema for forward compatibility,
//! not implemented (see `DESIGN.md`). There is no erasure-coding
//! algorithm backing this variant yet, so every entry point here
//! returns [`PhoError::NotSupported`] rather than silently mapping onto
//! `raid1`'s behavior under a different name.

use crate::error::{PhoError, PhoResult};
use crate::model::{Layout, LayoutType};

pub struct Raid5Layouter;

impl super::Layouter for Raid5Layouter {
    fn name(&self) -> &'static str {
        "raid5"
    }
}

/// Always fails: no write path exists for this layout type.
pub fn write_object() -> PhoResult<Layout> {
    Err(PhoError::NotSupported("raid5 layout is not implemented".into()))
}

/// Always fails: no read path exists for this layout type.
pub fn read_object(layout: &Layout) -> PhoResult<()> {
    if layout.layout_type != LayoutType::Raid5 {
        return Err(PhoError::Invalid("not a raid5 layout".into()));
    }
    Err(PhoError::NotSupported("raid5 layout is not implemented".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn read_and_write_both_report_not_supported() {
        assert!(matches!(write_object(), Err(PhoError::NotSupported(_))));
        let layout = Layout::new("oid", Uuid::nil(), 1, LayoutType::Raid5);
        assert!(matches!(read_object(&layout), Err(PhoError::NotSupported(_))));
    }
}
