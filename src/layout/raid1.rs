//! `raid1`: replicates each split of an object across `repl_count`
//! independent media.
//!
//! A write re-allocates its targets one split at a time: each split is
//! sized against the free space of the media just allocated for it, not
//! the whole object up front, so an object can land across media that
//! individually have less free space than its total size. Every split's
//! bytes are written identically to each of its replicas and tagged
//! `r1-{repl_count}_{layout_index}`, where `layout_index` flattens
//! `(split, replica)` as `split * repl_count + replica`, so a reader can
//! tell which replica of which split it is looking at without
//! consulting anything but the extent itself. A read tolerates up to
//! `repl_count - 1` missing replicas per split and retries a short read
//! up to `MAX_NULL_READ_TRY` times before giving up on that replica.

use uuid::Uuid;

use crate::adapters::{IoAdapter, IoDescriptor};
use crate::error::{PhoError, PhoResult};
use crate::model::{Extent, ExtentState, Layout, LayoutType, MediumId};
use crate::name_mapper::extent_path;

/// Matches `raid1.c`'s retry budget for a replica that keeps returning
/// short reads before it is given up on.
pub const MAX_NULL_READ_TRY: u32 = 10;

/// One candidate medium a write may land a replica on.
#[derive(Debug, Clone)]
pub struct WriteTarget {
    pub medium: MediumId,
    pub mount_path: String,
    pub avail_size: u64,
}

/// One replica-set member to read from, in preference order.
#[derive(Debug, Clone)]
pub struct ReadSource {
    pub medium: MediumId,
    pub mount_path: String,
}

/// Builds the `r1-{repl_count}_{idx}` tag `raid1.c` uses to name one
/// replica of one chunk.
pub fn extent_tag(repl_count: usize, idx: usize) -> String {
    format!("r1-{repl_count}_{idx}")
}

/// Sizes one split against a freshly-allocated set of targets: no larger
/// than the smallest target's free space, and no larger than what's left
/// of the object. The caller re-allocates targets for every split, so
/// this only ever sees the remaining bytes and that split's own targets.
pub fn split_chunk_size(remaining: u64, targets: &[WriteTarget]) -> PhoResult<u64> {
    let min_avail = targets.iter().map(|t| t.avail_size).min().ok_or_else(|| PhoError::Invalid("no write targets".into()))?;
    if min_avail == 0 {
        return Err(PhoError::NoSpace("every replica target is full".into()));
    }
    Ok(remaining.min(min_avail))
}

/// Writes one split's bytes to every replica target, producing that
/// split's extents. `split_index` is this split's position in the
/// object (0, 1, 2, ...); the resulting extents' `layout_index` values
/// follow the flattened convention `split_index * repl_count + replica`,
/// so a zero-byte object still produces one 0-sized extent per replica
/// at split 0.
pub fn write_split(
    oid: &str,
    uuid: Uuid,
    version: u32,
    split_index: usize,
    repl_count: usize,
    bytes: &[u8],
    targets: &[WriteTarget],
    io: &mut dyn IoAdapter,
) -> PhoResult<Vec<Extent>> {
    if targets.is_empty() {
        return Err(PhoError::Invalid("raid1 write requires at least one replica target".into()));
    }
    let checksum = xxhash_rust::xxh3::xxh3_64(bytes);
    let mut extents = Vec::with_capacity(targets.len());

    for (replica, target) in targets.iter().enumerate() {
        let layout_index = split_index * repl_count + replica;
        let tag = extent_tag(repl_count, layout_index);
        let path = extent_path(uuid, version, &tag);
        let iod = io.open(&path.to_string_lossy(), oid, true)?;
        let mut written = 0usize;
        while written < bytes.len() {
            written += io.write(iod, &bytes[written..])?;
        }
        io.set_xattr(iod, "id", oid.as_bytes())?;
        io.set_xattr(
            iod,
            "user_md",
            serde_json::json!({ "uuid": uuid, "version": version }).to_string().as_bytes(),
        )?;
        io.close(iod)?;

        extents.push(Extent {
            oid: oid.to_string(),
            uuid,
            version,
            layout_index: layout_index as u32,
            size: bytes.len() as u64,
            media_id: target.medium.clone(),
            address: path.to_string_lossy().into_owned(),
            state: ExtentState::Pending,
            xxh: checksum,
        });
    }

    Ok(extents)
}

/// Starts a fresh [`Layout`] for an object about to be written split by
/// split.
pub fn new_layout(oid: &str, uuid: Uuid, version: u32, repl_count: usize) -> Layout {
    let mut layout = Layout::new(oid, uuid, version, LayoutType::Raid1);
    layout.params.insert("repl_count".into(), repl_count.to_string());
    layout
}

/// Marks every extent (and the layout itself) `sync` once all of a
/// write's releases have been acknowledged as durable.
pub fn mark_synced(layout: &mut Layout) {
    for extent in &mut layout.extents {
        extent.state = ExtentState::Sync;
    }
    layout.state = crate::model::LayoutState::Sync;
}

/// Reads one chunk back, tolerating up to `repl_count - 1` missing or
/// failing replicas: tries sources in order, retrying a short read up to
/// [`MAX_NULL_READ_TRY`] times before moving to the next source.
pub fn read_chunk(sources: &[ReadSource], address_for: impl Fn(&MediumId) -> Option<String>, expected_len: u64, io: &mut dyn IoAdapter) -> PhoResult<Vec<u8>> {
    let mut last_err = PhoError::NotFound("no replica available for this chunk".into());

    for source in sources {
        let Some(address) = address_for(&source.medium) else {
            continue;
        };
        let iod = match io.open(&address, "", false) {
            Ok(iod) => iod,
            Err(e) => {
                last_err = e;
                continue;
            }
        };

        let mut buf = vec![0u8; expected_len as usize];
        let mut read = 0usize;
        let mut tries = 0u32;
        let result = loop {
            if read == buf.len() {
                break Ok(());
            }
            match io.read(iod, &mut buf[read..]) {
                Ok(0) => {
                    tries += 1;
                    if tries >= MAX_NULL_READ_TRY {
                        break Err(PhoError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "replica returned short reads beyond retry budget",
                        )));
                    }
                }
                Ok(n) => read += n,
                Err(e) => break Err(e),
            }
        };
        let _ = io.close(iod);

        match result {
            Ok(()) => return Ok(buf),
            Err(e) => last_err = e,
        }
    }

    Err(last_err)
}

/// Opens the medium's byte-level I/O descriptor for removing one extent,
/// as `raid1.c` does when rolling back a partially-written object.
pub fn delete_extent(address: &str, io: &mut dyn IoAdapter) -> PhoResult<()> {
    io.delete(address)
}

pub struct Raid1Layouter;

impl super::Layouter for Raid1Layouter {
    fn name(&self) -> &'static str {
        "raid1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake::FakeIo;
    use crate::model::MediumFamily;

    fn target(name: &str, avail: u64) -> WriteTarget {
        WriteTarget {
            medium: MediumId {
                family: MediumFamily::Dir,
                name: name.into(),
            },
            mount_path: "/mnt".into(),
            avail_size: avail,
        }
    }

    #[test]
    fn split_chunk_size_caps_at_the_smallest_targets_free_space() {
        let targets = vec![target("a", 100), target("b", 40)];
        assert_eq!(split_chunk_size(90, &targets).unwrap(), 40);
        assert_eq!(split_chunk_size(10, &targets).unwrap(), 10);
    }

    #[test]
    fn split_chunk_size_rejects_a_fully_saturated_target() {
        let targets = vec![target("a", 0)];
        assert!(split_chunk_size(10, &targets).is_err());
    }

    #[test]
    fn write_split_replicates_the_chunk_to_every_target_with_flattened_indices() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let mut io = FakeIo::new();
        let targets = vec![target("a", 1024), target("b", 1024)];

        let first = write_split("obj-1", Uuid::nil(), 1, 0, targets.len(), b"hello", &targets, &mut io).unwrap();
        let second = write_split("obj-1", Uuid::nil(), 1, 1, targets.len(), b"world", &targets, &mut io).unwrap();

        assert_eq!(first.iter().map(|e| e.layout_index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(second.iter().map(|e| e.layout_index).collect::<Vec<_>>(), vec![2, 3]);
        assert!(first.iter().all(|e| e.size == 5));
        assert_ne!(first[0].address, second[0].address);
        std::env::set_current_dir(original).unwrap();
    }

    #[test]
    fn extent_tag_matches_the_replica_count_and_flattened_index() {
        assert_eq!(extent_tag(2, 0), "r1-2_0");
        assert_eq!(extent_tag(2, 3), "r1-2_3");
    }
}
