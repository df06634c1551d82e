//! Client-side store library: turns PUT/GET/DELETE calls into
//! allocation requests against a scheduler, drives the `raid1` layout
//! engine's chunked I/O, and keeps the object/layout/extent catalog.
//!
//! Each `Xfer` (one `put`/`get`/`delete` call) is handled sequentially
//! and independently: nothing here is shared mutable state across
//! calls, so a caller is free to drive multiple `Xfer`s from different
//! threads as long as each uses its own [`Store`] handle (or externally
//! serializes access to a shared one).

use std::io::{Read, Write};
use std::time::SystemTime;

use log::info;
use uuid::Uuid;

use crate::adapters::IoAdapter;
use crate::codec::{
    MediumSpec, ReadAllocReq, ReleaseMedium, ReleaseReq, Request, RequestBody, ResponseBody,
    WriteAllocReq,
};
use crate::error::{PhoError, PhoResult};
use crate::index::{Filter, StateIndex};
use crate::layout::raid1::{self, ReadSource, WriteTarget};
use crate::layout::{locate, LocateResult, MediumLockView};
use crate::model::{Extent, ExtentState, Layout, MediumFamily, MediumId, Object, ObjectState};

/// Whatever a client is connected to that can answer a scheduler
/// [`Request`] and, separately, report a medium's current lock owner —
/// the two capabilities a store-library call needs from "the daemon"
/// without caring whether that daemon is reached in-process (tests,
/// `phobos-tests`) or over the wire codec and a socket (`phobosd`).
pub trait SchedulerClient {
    fn call(&mut self, body: RequestBody) -> PhoResult<ResponseBody>;
    fn medium_lock_owner(&self, id: &MediumId) -> PhoResult<Option<String>>;
}

/// Drives a [`crate::scheduler::Scheduler`] synchronously in the same
/// process: every `call` enqueues the request and runs scheduler passes
/// until a response with the matching id appears. Used by the core's own
/// tests and by `phobos-tests`.
pub struct InProcessClient<'a> {
    scheduler: &'a mut crate::scheduler::Scheduler,
    next_id: u64,
}

impl<'a> InProcessClient<'a> {
    pub fn new(scheduler: &'a mut crate::scheduler::Scheduler) -> Self {
        InProcessClient { scheduler, next_id: 1 }
    }
}

impl SchedulerClient for InProcessClient<'_> {
    fn call(&mut self, body: RequestBody) -> PhoResult<ResponseBody> {
        let id = self.next_id;
        self.next_id += 1;
        self.scheduler.enqueue(Request { id, body });
        loop {
            let responses = self.scheduler.run_once(SystemTime::now());
            if let Some(resp) = responses.into_iter().find(|r| r.id == id) {
                return match resp.body {
                    ResponseBody::Error(e) => Err(classify_rc(e.rc)),
                    other => Ok(other),
                };
            }
        }
    }

    fn medium_lock_owner(&self, id: &MediumId) -> PhoResult<Option<String>> {
        self.scheduler
            .mediums()
            .get_one(&id.to_string())
            .ok_or_else(|| PhoError::NotFound(id.to_string()))
            .map(|m| m.lock.map(|l| l.hostname))
    }
}

/// Drives a remote daemon over a Unix stream socket using the wire codec
/// One round trip per `call`: the blocking request/response shape
/// the store library uses, matching the daemon's one-request-per-frame
/// loop.
pub struct SocketClient<S> {
    stream: S,
    next_id: u64,
}

impl<S: Read + Write> SocketClient<S> {
    pub fn new(stream: S) -> Self {
        SocketClient { stream, next_id: 1 }
    }
}

impl<S: Read + Write> SchedulerClient for SocketClient<S> {
    fn call(&mut self, body: RequestBody) -> PhoResult<ResponseBody> {
        let id = self.next_id;
        self.next_id += 1;
        crate::codec::write_request(&mut self.stream, &Request { id, body })?;
        let resp = crate::codec::read_response(&mut self.stream)?;
        match resp.body {
            ResponseBody::Error(e) => Err(classify_rc(e.rc)),
            other => Ok(other),
        }
    }

    fn medium_lock_owner(&self, _id: &MediumId) -> PhoResult<Option<String>> {
        // A real deployment exposes lock ownership through the shared
        // state index the daemon and client both reach, not through a
        // scheduler request; nothing to query over this transport alone.
        Ok(None)
    }
}

fn classify_rc(rc: crate::error::ErrorCode) -> PhoError {
    use crate::error::ErrorCode;
    match rc {
        ErrorCode::Invalid => PhoError::Invalid("request rejected".into()),
        ErrorCode::NotFound => PhoError::NotFound("not found".into()),
        ErrorCode::AlreadyExists => PhoError::AlreadyExists("already exists".into()),
        ErrorCode::NoSpace => PhoError::NoSpace("no space".into()),
        ErrorCode::NoDevice => PhoError::NoDevice("no device".into()),
        ErrorCode::Busy => PhoError::Busy("busy".into()),
        ErrorCode::WouldBlock => PhoError::WouldBlock,
        ErrorCode::Comm => PhoError::Comm("comm failure".into()),
        ErrorCode::Io => PhoError::Io(std::io::Error::other("remote io error")),
        ErrorCode::ProtocolUnsupported => PhoError::ProtocolUnsupported,
        ErrorCode::NotSupported => PhoError::NotSupported("not supported".into()),
        ErrorCode::Fatal => PhoError::Fatal("fatal".into()),
    }
}

/// The client-visible catalog of objects, layouts and extents plus the
/// PUT/GET/DELETE entry points.
pub struct Store {
    pub objects: StateIndex<Object>,
    pub layouts: StateIndex<Layout>,
    pub extents: StateIndex<Extent>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            objects: StateIndex::new(),
            layouts: StateIndex::new(),
            extents: StateIndex::new(),
        }
    }

    /// Writes `data` as a new object under `oid`, replicated `repl_count`
    /// times with `raid1`'s write protocol.
    ///
    /// Allocates and writes one split at a time: each `write_alloc` asks
    /// only for whatever bytes are still unwritten, so an object can
    /// land across media that individually hold less than its total
    /// size. A zero-byte object still runs one split, producing one
    /// 0-sized extent per replica.
    pub fn put(
        &self,
        client: &mut dyn SchedulerClient,
        io: &mut dyn IoAdapter,
        oid: &str,
        family: MediumFamily,
        repl_count: u32,
        tags: Vec<String>,
        data: &[u8],
    ) -> PhoResult<Object> {
        let uuid = Uuid::new_v4();
        let version = 1;
        let total_size = data.len() as u64;

        let mut layout = raid1::new_layout(oid, uuid, version, repl_count as usize);
        let mut remaining = total_size;
        let mut offset = 0usize;
        let mut split_index = 0usize;

        loop {
            let resp = client.call(RequestBody::WriteAlloc(WriteAllocReq {
                n_media: repl_count,
                per_medium: MediumSpec {
                    size: remaining,
                    family,
                    tags: tags.clone(),
                    library: None,
                },
            }))?;
            let ResponseBody::WriteAlloc(alloc) = resp else {
                return Err(PhoError::Fatal("scheduler answered write_alloc with the wrong response kind".into()));
            };

            let targets: Vec<WriteTarget> = alloc
                .media
                .iter()
                .map(|m| WriteTarget {
                    medium: m.id.clone(),
                    mount_path: m.mount_path.clone(),
                    avail_size: m.avail_size,
                })
                .collect();

            let chunk_len = raid1::split_chunk_size(remaining, &targets)?;
            let bytes = &data[offset..offset + chunk_len as usize];
            let extents = raid1::write_split(oid, uuid, version, split_index, repl_count as usize, bytes, &targets, io)?;
            layout.extents.extend(extents);

            let release = ReleaseReq {
                media: targets
                    .iter()
                    .map(|t| ReleaseMedium {
                        id: t.medium.clone(),
                        rc: None,
                        size_written: chunk_len,
                        to_sync: true,
                    })
                    .collect(),
            };
            let resp = client.call(RequestBody::Release(release))?;
            let ResponseBody::ReleaseAck(ack) = resp else {
                return Err(PhoError::Fatal("scheduler answered release with the wrong response kind".into()));
            };
            if ack.media.len() != targets.len() {
                return Err(PhoError::Io(std::io::Error::other(
                    "not every replica acknowledged its release; object left pending",
                )));
            }

            offset += chunk_len as usize;
            remaining -= chunk_len;
            split_index += 1;
            if remaining == 0 {
                break;
            }
        }

        raid1::mark_synced(&mut layout);
        for extent in &layout.extents {
            self.extents.insert(extent_key(extent), extent.clone())?;
        }
        self.layouts.insert(oid.to_string(), layout)?;

        let mut object = Object::new(oid, uuid, version);
        object.state = ObjectState::Sync;
        self.objects.insert(oid.to_string(), object.clone())?;
        info!("put object '{oid}' ({total_size} bytes, {repl_count} replicas, {split_index} splits)");
        Ok(object)
    }

    /// Reads an object's bytes back, tolerating up to `repl_count - 1`
    /// missing replicas per split, per `raid1`'s read protocol.
    pub fn get(&self, client: &mut dyn SchedulerClient, io: &mut dyn IoAdapter, oid: &str) -> PhoResult<Vec<u8>> {
        let layout = self
            .layouts
            .get_one(oid)
            .ok_or_else(|| PhoError::NotFound(format!("no layout for object '{oid}'")))?;
        let repl_count: usize = layout
            .params
            .get("repl_count")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PhoError::Fatal("layout is missing its repl_count parameter".into()))?;

        if repl_count == 0 || layout.extents.is_empty() {
            return Ok(Vec::new());
        }

        let splits: Vec<&[Extent]> = layout.extents.chunks(repl_count).collect();
        let mut out = Vec::new();

        for split in &splits {
            let lock_views: Vec<MediumLockView> = split
                .iter()
                .map(|e| {
                    Ok(MediumLockView {
                        id: e.media_id.clone(),
                        locked_by: client.medium_lock_owner(&e.media_id)?,
                    })
                })
                .collect::<PhoResult<_>>()?;
            if let LocateResult::Host { hostname, .. } = locate(&[lock_views], "local")? {
                log::debug!("locate prefers host '{hostname}' for this split");
            }

            let candidates: Vec<MediumId> = split.iter().map(|e| e.media_id.clone()).collect();
            let resp = client.call(RequestBody::ReadAlloc(ReadAllocReq {
                n_required: 1,
                candidates,
            }))?;
            let ResponseBody::ReadAlloc(alloc) = resp else {
                return Err(PhoError::Fatal("scheduler answered read_alloc with the wrong response kind".into()));
            };
            let Some(allocated) = alloc.media.first() else {
                return Err(PhoError::NotFound(format!(
                    "no reachable replica for object '{oid}'"
                )));
            };
            let extent = split
                .iter()
                .find(|e| e.media_id == allocated.id)
                .ok_or_else(|| PhoError::Fatal("scheduler allocated a medium outside this split".into()))?;

            let sources = vec![ReadSource {
                medium: allocated.id.clone(),
                mount_path: allocated.mount_path.clone(),
            }];
            let address = extent.address.clone();
            let bytes = raid1::read_chunk(&sources, |_| Some(address.clone()), extent.size, io)?;
            out.extend_from_slice(&bytes);

            client.call(RequestBody::Release(ReleaseReq {
                media: vec![ReleaseMedium {
                    id: allocated.id.clone(),
                    rc: None,
                    size_written: 0,
                    to_sync: false,
                }],
            }))?;
        }

        Ok(out)
    }

    /// Marks an object `deprecated`. `hard` additionally deletes its
    /// extents from their media instead of leaving them for the scrubber
    /// to account for, since deletion never hard-deletes in place.
    pub fn delete(&self, io: &mut dyn IoAdapter, oid: &str, hard: bool) -> PhoResult<()> {
        self.objects.update(oid, |o| o.state = ObjectState::Deprecated)?;
        if !hard {
            return Ok(());
        }
        if let Some(layout) = self.layouts.get_one(oid) {
            for extent in &layout.extents {
                let _ = raid1::delete_extent(&extent.address, io);
                let _ = self.extents.update(&extent_key(extent), |e| e.state = ExtentState::Orphan);
            }
        }
        Ok(())
    }

    /// Lazily reclaims `orphan` extents: removes their rows from the
    /// catalog once the caller (the daemon's idle tick, on an interval of
    /// at least `grace`) decides enough time has passed since they were
    /// orphaned. The in-memory schema carries no per-extent timestamp, so
    /// the tick interval itself is the grace period; a durable backend
    /// would instead filter on an `orphaned_at` column here.
    pub fn scrub_orphans(&self) -> Vec<Extent> {
        let orphans = self.extents.get(&Filter::Eq(
            "state".into(),
            serde_json::to_value(ExtentState::Orphan).unwrap(),
        ));
        let mut reclaimed = Vec::new();
        for extent in orphans {
            let key = extent_key(&extent);
            if self.extents.delete(&key).is_ok() {
                info!("scrub reclaimed orphan extent '{key}'");
                reclaimed.push(extent);
            }
        }
        reclaimed
    }
}

fn extent_key(extent: &Extent) -> String {
    format!("{}:{}:{}", extent.uuid, extent.version, extent.layout_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake::{FakeDeviceAdapter, FakeFilesystem, FakeIo, FakeLibrary};
    use crate::adapters::AdapterRegistry;
    use crate::config::Config;
    use crate::model::{AdmStatus, Device, DeviceId, FsStatus, Medium, MediumFlags, MediumStats};
    use crate::scheduler::Scheduler;

    /// A scheduler with two `dir` devices, each carrying a formatted,
    /// already-`empty` medium with room to write, wired the way
    /// `device_agent`'s own tests wire a single drive.
    fn fixture_scheduler() -> Scheduler {
        let mut library = FakeLibrary::new();
        let mut fs = FakeFilesystem::new(1 << 30);

        for n in 0..2 {
            let drive_addr = format!("/dev/fake{n}");
            let medium_id = MediumId {
                family: MediumFamily::Dir,
                name: format!("med{n}"),
            };
            library.add_drive(&drive_addr);
            library.add_slot(format!("med{n}"), format!("slot{n}"));
            fs.format(&drive_addr, &medium_id.to_string()).unwrap();
        }

        let mut registry = AdapterRegistry::new();
        registry.register_library("fake", Box::new(library));
        registry.register_filesystem("fake", Box::new(fs));
        registry.register_io("fake", Box::new(FakeIo::new()));
        registry.register_device("fake", Box::new(FakeDeviceAdapter::new()));

        let mut scheduler = Scheduler::new("host1", 100, Config::default(), registry, "fake", "fake", "fake");

        for n in 0..2 {
            let device_id = DeviceId {
                family: MediumFamily::Dir,
                serial: format!("drv{n}"),
            };
            scheduler.register_device(Device::new(device_id, "host1", "dir-drive", format!("/dev/fake{n}")));

            let medium = Medium {
                id: MediumId {
                    family: MediumFamily::Dir,
                    name: format!("med{n}"),
                },
                model: "dir-medium".into(),
                fs_type: "posix".into(),
                addr_type: "path".into(),
                adm_status: AdmStatus::Unlocked,
                fs_status: FsStatus::Empty,
                flags: MediumFlags::default(),
                tags: vec![],
                stats: MediumStats {
                    phys_free: 1 << 20,
                    ..Default::default()
                },
                lock: None,
            };
            scheduler.mediums().insert(medium.id.to_string(), medium).unwrap();
        }
        scheduler
    }

    #[test]
    fn round_trips_a_small_object_through_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let mut scheduler = fixture_scheduler();
        let store = Store::new();
        let mut io = FakeIo::new();
        let data = b"hello phobos".to_vec();

        {
            let mut client = InProcessClient::new(&mut scheduler);
            let object = store
                .put(&mut client, &mut io, "obj-1", MediumFamily::Dir, 2, vec![], &data)
                .unwrap();
            assert_eq!(object.state, ObjectState::Sync);
        }

        let layout = store.layouts.get_one("obj-1").unwrap();
        assert_eq!(layout.extents.len(), 2);
        assert!(layout.extents.iter().all(|e| e.size == data.len() as u64));
        assert!(layout.all_synced());

        {
            let mut client = InProcessClient::new(&mut scheduler);
            let read_back = store.get(&mut client, &mut io, "obj-1").unwrap();
            assert_eq!(read_back, data);
        }

        std::env::set_current_dir(original).unwrap();
    }

    #[test]
    fn put_splits_an_object_across_media_that_individually_have_less_than_its_total_size() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let mut scheduler = fixture_scheduler();
        // Shrink both media to 20 bytes free each so a 30-byte object
        // can't be allocated whole against either one; the per-split
        // write loop has to re-allocate after the first split lands.
        for n in 0..2 {
            let id = MediumId {
                family: MediumFamily::Dir,
                name: format!("med{n}"),
            };
            scheduler.mediums().update(&id.to_string(), |m| m.stats.phys_free = 20).unwrap();
        }

        let store = Store::new();
        let mut io = FakeIo::new();
        let data = vec![7u8; 30];

        {
            let mut client = InProcessClient::new(&mut scheduler);
            let object = store
                .put(&mut client, &mut io, "obj-split", MediumFamily::Dir, 1, vec![], &data)
                .unwrap();
            assert_eq!(object.state, ObjectState::Sync);
        }

        let layout = store.layouts.get_one("obj-split").unwrap();
        assert_eq!(layout.extents.len(), 2, "a 30-byte object over two 20-byte-free media needs two splits");
        let sizes: Vec<u64> = layout.extents.iter().map(|e| e.size).collect();
        assert_eq!(sizes.iter().sum::<u64>(), 30);
        assert!(sizes.contains(&20) && sizes.contains(&10));

        {
            let mut client = InProcessClient::new(&mut scheduler);
            let read_back = store.get(&mut client, &mut io, "obj-split").unwrap();
            assert_eq!(read_back, data);
        }

        std::env::set_current_dir(original).unwrap();
    }

    #[test]
    fn delete_marks_the_object_deprecated_without_touching_extents_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let mut scheduler = fixture_scheduler();
        let store = Store::new();
        let mut io = FakeIo::new();
        {
            let mut client = InProcessClient::new(&mut scheduler);
            store
                .put(&mut client, &mut io, "obj-2", MediumFamily::Dir, 2, vec![], b"x")
                .unwrap();
        }

        store.delete(&mut io, "obj-2", false).unwrap();
        assert_eq!(store.objects.get_one("obj-2").unwrap().state, ObjectState::Deprecated);
        assert_eq!(store.layouts.get_one("obj-2").unwrap().extents.len(), 2);

        std::env::set_current_dir(original).unwrap();
    }

    #[test]
    fn scrub_orphans_removes_orphaned_extent_rows() {
        let store = Store::new();
        let extent = Extent {
            oid: "obj-3".into(),
            uuid: Uuid::nil(),
            version: 1,
            layout_index: 0,
            size: 10,
            media_id: MediumId {
                family: MediumFamily::Dir,
                name: "med0".into(),
            },
            address: "obj-3.0".into(),
            state: ExtentState::Orphan,
            xxh: 0,
        };
        store.extents.insert(extent_key(&extent), extent).unwrap();

        let reclaimed = store.scrub_orphans();
        assert_eq!(reclaimed.len(), 1);
        assert!(store.extents.get(&Filter::All).is_empty());
    }
}
