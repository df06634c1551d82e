//! Deterministic, collision-resistant extent path naming.
//!
//! A two-level hex-prefix directory fanout derived from a hash of the
//! key, followed by a sanitized, length-clamped file name built from
//! the same key, keeps paths human-inspectable while still spreading
//! extents evenly across a medium's directory tree and staying within
//! `NAME_MAX`.

use std::path::PathBuf;

use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

/// Linux's `NAME_MAX`: the longest a single path component may be.
const NAME_MAX: usize = 255;

/// Characters allowed unescaped in a path component; anything else is
/// replaced with `_`.
fn is_mapper_char_valid(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_mapper_char_valid(c) { c } else { '_' })
        .collect()
}

/// Builds the key identifying one extent: `(object_uuid, version,
/// extent_tag)` concatenated in a fixed order so two extents can only
/// collide on this key if every field matches.
fn extent_key(object_uuid: Uuid, version: u32, extent_tag: &str) -> String {
    format!("{object_uuid}_{version}_{extent_tag}")
}

/// Maps `(object_uuid, version, extent_tag)` to the regular-file path
/// an extent is stored at, relative to its medium's mount root.
///
/// The two leading directory components are the first two bytes of an
/// `xxh3_64` hash of the key, each rendered as two lowercase hex
/// digits — the same `xx/yy/` fanout shape as `pho_mapper_hash1`. The
/// file name is the sanitized key itself, clamped to fit `NAME_MAX`
/// with a hash suffix appended so truncation can't introduce a
/// collision.
pub fn extent_path(object_uuid: Uuid, version: u32, extent_tag: &str) -> PathBuf {
    let key = extent_key(object_uuid, version, extent_tag);
    let hash = xxh3_64(key.as_bytes());
    let prefix1 = format!("{:02x}", (hash >> 56) as u8);
    let prefix2 = format!("{:02x}", (hash >> 48) as u8);

    let clean = sanitize(&key);
    let suffix = format!(".{hash:016x}");
    let budget = NAME_MAX.saturating_sub(suffix.len());
    let file_name = if clean.len() > budget {
        format!("{}{}", &clean[..budget], suffix)
    } else {
        clean
    };

    PathBuf::from(prefix1).join(prefix2).join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_always_map_to_the_same_path() {
        let uuid = Uuid::nil();
        let a = extent_path(uuid, 1, "r1-2_0");
        let b = extent_path(uuid, 1, "r1-2_0");
        assert_eq!(a, b);
    }

    #[test]
    fn different_extent_tags_map_to_different_paths() {
        let uuid = Uuid::nil();
        let a = extent_path(uuid, 1, "r1-2_0");
        let b = extent_path(uuid, 1, "r1-2_1");
        assert_ne!(a, b);
    }

    #[test]
    fn path_has_two_level_hex_fanout_prefix() {
        let path = extent_path(Uuid::nil(), 3, "r1-1_0");
        let mut components = path.components();
        let first = components.next().unwrap().as_os_str().to_str().unwrap();
        let second = components.next().unwrap().as_os_str().to_str().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(second.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn long_inputs_are_clamped_to_name_max() {
        let tag = "r1-2_0".repeat(100);
        let path = extent_path(Uuid::nil(), 1, &tag);
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.len() <= NAME_MAX);
    }
}
