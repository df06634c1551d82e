//! LRS: the request scheduler.
//!
//! Owns the live set of [`DeviceAgent`]s on one host, a FIFO of pending
//! non-release requests, and a FIFO of releases that always bypasses it.
//! One `run_once` pass drains releases, then serves pending requests in
//! arrival order, requeuing the head of the line on `would_block` and
//! stopping the pass there: a cooperative, single-threaded scheduling
//! model with no background threads to coordinate with.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::SystemTime;

use log::{info, warn};

use crate::adapters::AdapterRegistry;
use crate::codec::{
    AllocatedMedium, ConfigureReq, ConfigureResp, FormatReq, FormatResp, MediumSpec, MonitorResp,
    NotifyOp, NotifyReq, NotifyResp, ReadAllocReq, ReadAllocResp, ReleaseAckResp, ReleaseReq,
    Request, RequestBody, Response, ResponseBody, WriteAllocReq, WriteAllocResp,
};
use crate::config::{AllocPolicy, Config};
use crate::device_agent::{CompatibilityTable, DeviceAgent};
use crate::error::{PhoError, PhoResult};
use crate::index::{Filter, StateIndex};
use crate::model::{AdmStatus, Device, DeviceId, FsStatus, Medium, MediumFamily, MediumId, OpStatus};

/// One host's scheduler: the device agents it owns plus the two FIFOs.
pub struct Scheduler {
    pub hostname: String,
    pub pid: u32,
    pub config: Config,
    pub compat: CompatibilityTable,
    pub registry: AdapterRegistry,
    pub library_name: String,
    pub filesystem_name: String,
    pub io_name: String,

    devices: HashMap<DeviceId, Device>,
    agents: HashMap<DeviceId, DeviceAgent>,
    mediums: StateIndex<Medium>,

    pending: VecDeque<Request>,
    releases: VecDeque<Request>,
}

impl Scheduler {
    pub fn new(
        hostname: impl Into<String>,
        pid: u32,
        config: Config,
        registry: AdapterRegistry,
        library_name: impl Into<String>,
        filesystem_name: impl Into<String>,
        io_name: impl Into<String>,
    ) -> Self {
        Scheduler {
            hostname: hostname.into(),
            pid,
            config,
            compat: CompatibilityTable::new(),
            registry,
            library_name: library_name.into(),
            filesystem_name: filesystem_name.into(),
            io_name: io_name.into(),
            devices: HashMap::new(),
            agents: HashMap::new(),
            mediums: StateIndex::new(),
            pending: VecDeque::new(),
            releases: VecDeque::new(),
        }
    }

    pub fn mediums(&self) -> &StateIndex<Medium> {
        &self.mediums
    }

    /// Seeds one device row and gives it an `empty` agent. Used by test
    /// fixtures to populate a scheduler before exercising it; a live
    /// deployment instead discovers devices through `notify{add}` once
    /// their row already exists in the shared inventory.
    pub fn register_device(&mut self, device: Device) {
        self.agents.entry(device.id.clone()).or_insert_with(DeviceAgent::new);
        self.devices.insert(device.id.clone(), device);
    }

    pub fn enqueue(&mut self, req: Request) {
        if matches!(req.body, RequestBody::Release(_)) {
            self.releases.push_back(req);
        } else {
            self.pending.push_back(req);
        }
    }

    /// One scheduler pass: drain releases, then serve pending requests in
    /// order until the queue is empty or a request yields `would_block`.
    pub fn run_once(&mut self, now: SystemTime) -> Vec<Response> {
        let mut out = Vec::new();

        while let Some(req) = self.releases.pop_front() {
            out.push(self.dispatch(req, now));
        }

        while let Some(req) = self.pending.pop_front() {
            let kind = req.kind();
            let id = req.id;
            match self.handle(&req, now) {
                Ok(body) => out.push(Response { id, for_kind: kind, body }),
                Err(PhoError::WouldBlock) => {
                    self.pending.push_front(req);
                    break;
                }
                Err(e) => out.push(Response::error(id, kind, e.rc())),
            }
        }
        out
    }

    fn dispatch(&mut self, req: Request, now: SystemTime) -> Response {
        let kind = req.kind();
        let id = req.id;
        match self.handle(&req, now) {
            Ok(body) => Response { id, for_kind: kind, body },
            Err(e) => Response::error(id, kind, e.rc()),
        }
    }

    fn handle(&mut self, req: &Request, now: SystemTime) -> PhoResult<ResponseBody> {
        match &req.body {
            RequestBody::WriteAlloc(r) => self.handle_write_alloc(r).map(ResponseBody::WriteAlloc),
            RequestBody::ReadAlloc(r) => self.handle_read_alloc(r).map(ResponseBody::ReadAlloc),
            RequestBody::Release(r) => self.handle_release(r, now).map(ResponseBody::ReleaseAck),
            RequestBody::Format(r) => self.handle_format(r).map(ResponseBody::Format),
            RequestBody::Notify(r) => self.handle_notify(r).map(ResponseBody::Notify),
            RequestBody::Ping => Ok(ResponseBody::Pong),
            RequestBody::Monitor => Ok(self.handle_monitor()),
            RequestBody::Configure(r) => self.handle_configure(r).map(ResponseBody::Configure),
        }
    }

    fn handle_monitor(&self) -> ResponseBody {
        let devices_loaded = self
            .agents
            .values()
            .filter(|a| matches!(a.op_status, OpStatus::Loaded))
            .count() as u32;
        let devices_mounted = self
            .agents
            .values()
            .filter(|a| matches!(a.op_status, OpStatus::Mounted))
            .count() as u32;
        ResponseBody::Monitor(MonitorResp {
            devices_loaded,
            devices_mounted,
            pending_requests: self.pending.len() as u32,
        })
    }

    fn handle_configure(&mut self, req: &ConfigureReq) -> PhoResult<ConfigureResp> {
        match req.key.as_str() {
            "policy" => {
                self.config.policy = req.value.parse()?;
                Ok(ConfigureResp { applied: true })
            }
            _ => Ok(ConfigureResp { applied: false }),
        }
    }

    // ---- notify ---------------------------------------------------

    fn handle_notify(&mut self, req: &NotifyReq) -> PhoResult<NotifyResp> {
        match req.op {
            NotifyOp::Add => {
                // Registering a device the host doesn't yet know about
                // is out of scope for the in-memory reference scheduler:
                // callers are expected to have inserted the `Device` row
                // (e.g. via `phobos-tests` fixtures) before `add`.
                let device = self
                    .devices
                    .get(&req.resource_id)
                    .ok_or_else(|| PhoError::NotFound(format!("device '{}' unknown", req.resource_id)))?;
                if device.adm_status != AdmStatus::Unlocked {
                    return Err(PhoError::Invalid(format!(
                        "device '{}' is administratively locked",
                        req.resource_id
                    )));
                }
                self.agents.entry(req.resource_id.clone()).or_insert_with(DeviceAgent::new);
                Ok(NotifyResp { ok: true })
            }
            NotifyOp::Lock => {
                if let Some(agent) = self.agents.get_mut(&req.resource_id) {
                    if agent.op_status != OpStatus::Empty {
                        let device_path = self
                            .devices
                            .get(&req.resource_id)
                            .map(|d| d.path.clone())
                            .unwrap_or_default();
                        self.evict(&req.resource_id, &device_path)?;
                    }
                }
                self.agents.remove(&req.resource_id);
                if let Some(device) = self.devices.get_mut(&req.resource_id) {
                    device.adm_status = AdmStatus::Locked;
                }
                Ok(NotifyResp { ok: true })
            }
            NotifyOp::Unlock => {
                if let Some(device) = self.devices.get_mut(&req.resource_id) {
                    device.adm_status = AdmStatus::Unlocked;
                }
                if let Some(agent) = self.agents.get_mut(&req.resource_id) {
                    if agent.op_status == OpStatus::Failed {
                        let device = self.devices.get_mut(&req.resource_id).unwrap();
                        agent.revive(device)?;
                    }
                } else {
                    self.agents.insert(req.resource_id.clone(), DeviceAgent::new());
                }
                Ok(NotifyResp { ok: true })
            }
        }
    }

    // ---- write_alloc -------------------------------------------------

    fn handle_write_alloc(&mut self, req: &WriteAllocReq) -> PhoResult<WriteAllocResp> {
        let mut assigned = Vec::new();
        let mut used: HashSet<MediumId> = HashSet::new();

        for _ in 0..req.n_media {
            let (device_id, medium_id, root, avail) = self.acquire_for_write(&req.per_medium, &used)?;
            used.insert(medium_id.clone());
            assigned.push(AllocatedMedium {
                id: medium_id,
                mount_path: root,
                avail_size: avail,
            });
            let _ = device_id;
        }
        Ok(WriteAllocResp { media: assigned })
    }

    fn acquire_for_write(
        &mut self,
        spec: &MediumSpec,
        exclude: &HashSet<MediumId>,
    ) -> PhoResult<(DeviceId, MediumId, String, u64)> {
        if let Some(found) = self.best_mounted_candidate(spec, exclude, true)? {
            return Ok(found);
        }
        if let Some(found) = self.best_loaded_candidate(spec, exclude)? {
            return Ok(found);
        }

        let candidates = self.mediums.get(&Filter::Eq(
            "fs_status".into(),
            serde_json::to_value(FsStatus::Empty).unwrap(),
        ));
        let mut candidates: Vec<Medium> = candidates
            .into_iter()
            .chain(self.mediums.get(&Filter::Eq(
                "fs_status".into(),
                serde_json::to_value(FsStatus::Used).unwrap(),
            )))
            .filter(|m| {
                m.id.family == spec.family
                    && m.adm_status == AdmStatus::Unlocked
                    && m.is_writable(&spec.tags)
                    && !exclude.contains(&m.id)
                    && m.lock.as_ref().is_none_or(|l| l.hostname == self.hostname)
            })
            .collect();

        if candidates.is_empty() {
            // Distinguish "no device can ever serve this" from "busy now".
            let structurally_possible = self
                .devices
                .values()
                .any(|d| d.id.family == spec.family);
            return Err(if structurally_possible {
                PhoError::NoSpace(format!("no medium with free space for family {:?}", spec.family))
            } else {
                PhoError::NoDevice(format!("no device of family {:?} on this host", spec.family))
            });
        }

        match self.config.policy {
            AllocPolicy::BestFit => candidates.sort_by_key(|m| candidate_rank(m.free_space(), spec.size)),
            AllocPolicy::FirstFit => {}
        }
        let medium = candidates.into_iter().next().unwrap();

        let empty_device_id = self
            .agents
            .iter()
            .find(|(id, a)| a.op_status == OpStatus::Empty && self.devices.get(*id).is_some_and(|d| d.id.family == spec.family))
            .map(|(id, _)| id.clone());

        let device_id = match empty_device_id {
            Some(id) => id,
            None => self.evict_least_free(spec.family)?,
        };

        self.load_and_mount(&device_id, &medium.id)
    }

    fn best_mounted_candidate(
        &mut self,
        spec: &MediumSpec,
        exclude: &HashSet<MediumId>,
        _for_write: bool,
    ) -> PhoResult<Option<(DeviceId, MediumId, String, u64)>> {
        let mut best: Option<(DeviceId, MediumId, String, u64)> = None;
        for (device_id, agent) in self.agents.iter() {
            if agent.op_status != OpStatus::Mounted {
                continue;
            }
            let Some(medium_id) = &agent.runtime.medium else { continue };
            if exclude.contains(medium_id) {
                continue;
            }
            let Some(medium) = self.mediums.get_one(&medium_id.to_string()) else { continue };
            if medium.id.family != spec.family || !medium.is_writable(&spec.tags) {
                continue;
            }
            if medium.lock.as_ref().is_some_and(|l| l.hostname != self.hostname) {
                continue;
            }
            let root = agent.runtime.mount_path.clone().unwrap_or_default();
            let avail = medium.free_space();
            best = Some(match (best, self.config.policy) {
                (None, _) => (device_id.clone(), medium_id.clone(), root, avail),
                (Some(b), AllocPolicy::BestFit) if candidate_rank(avail, spec.size) < candidate_rank(b.3, spec.size) => {
                    (device_id.clone(), medium_id.clone(), root, avail)
                }
                (Some(b), _) => b,
            });
            if matches!(self.config.policy, AllocPolicy::FirstFit) && best.is_some() {
                break;
            }
        }
        Ok(best)
    }

    fn best_loaded_candidate(
        &mut self,
        spec: &MediumSpec,
        exclude: &HashSet<MediumId>,
    ) -> PhoResult<Option<(DeviceId, MediumId, String, u64)>> {
        let candidate = self.agents.iter().find_map(|(device_id, agent)| {
            if agent.op_status != OpStatus::Loaded {
                return None;
            }
            let medium_id = agent.runtime.medium.as_ref()?;
            if exclude.contains(medium_id) {
                return None;
            }
            let medium = self.mediums.get_one(&medium_id.to_string())?;
            if medium.id.family != spec.family || !medium.is_writable(&spec.tags) {
                return None;
            }
            Some(device_id.clone())
        });
        let Some(device_id) = candidate else { return Ok(None) };
        let medium_id = self.agents[&device_id].runtime.medium.clone().unwrap();
        let (root, avail) = self.mount_loaded(&device_id, &medium_id)?;
        Ok(Some((device_id, medium_id, root, avail)))
    }

    fn mount_loaded(&mut self, device_id: &DeviceId, medium_id: &MediumId) -> PhoResult<(String, u64)> {
        let mount_prefix = self.config.mount_prefix.clone();
        let mut medium = self
            .mediums
            .get_one(&medium_id.to_string())
            .ok_or_else(|| PhoError::NotFound(medium_id.to_string()))?;
        let mut device = self
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| PhoError::NotFound(device_id.to_string()))?;
        let agent = self.agents.get_mut(device_id).unwrap();
        let fs = self.registry.filesystem_mut(&self.filesystem_name)?;
        let root = agent.mount(fs, &mut device, &mut medium, &mount_prefix)?;
        self.devices.insert(device_id.clone(), device);
        self.mediums.update(&medium_id.to_string(), |m| *m = medium.clone())?;
        Ok((root.display().to_string(), medium.free_space()))
    }

    fn load_and_mount(&mut self, device_id: &DeviceId, medium_id: &MediumId) -> PhoResult<(DeviceId, MediumId, String, u64)> {
        let mount_prefix = self.config.mount_prefix.clone();
        let hostname = self.hostname.clone();
        let pid = self.pid;
        let mut medium = self
            .mediums
            .get_one(&medium_id.to_string())
            .ok_or_else(|| PhoError::NotFound(medium_id.to_string()))?;
        let mut device = self
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| PhoError::NotFound(device_id.to_string()))?;

        let drive_addr = device.path.clone();
        let medium_addr = medium.id.name.clone();

        let agent = self.agents.get_mut(device_id).unwrap();
        {
            let library = self.registry.library_mut(&self.library_name)?;
            agent.load(
                library,
                &self.compat,
                &mut device,
                &drive_addr,
                &mut medium,
                &medium_addr,
                &hostname,
                pid,
            )?;
        }
        self.devices.insert(device_id.clone(), device);
        self.mediums.update(&medium_id.to_string(), |m| *m = medium.clone())?;

        let (root, avail) = self.mount_loaded(device_id, medium_id)?;
        Ok((device_id.clone(), medium_id.clone(), root, avail))
    }

    /// Evicts the idle mounted/loaded device of `family` with the least
    /// free space on its attached medium, freeing it for reuse as
    /// `empty`. Errors `no_device` if nothing is evictable.
    fn evict_least_free(&mut self, family: MediumFamily) -> PhoResult<DeviceId> {
        let candidate = self
            .agents
            .iter()
            .filter(|(id, a)| {
                self.devices.get(*id).is_some_and(|d| d.id.family == family)
                    && matches!(a.op_status, OpStatus::Mounted | OpStatus::Loaded)
                    && a.runtime.is_idle()
            })
            .filter_map(|(id, a)| {
                let medium_id = a.runtime.medium.as_ref()?;
                let free = self.mediums.get_one(&medium_id.to_string())?.free_space();
                Some((id.clone(), free))
            })
            .min_by_key(|(_, free)| *free)
            .map(|(id, _)| id);

        let device_id = candidate.ok_or_else(|| {
            PhoError::NoDevice(format!("no evictable device of family {family:?} on this host"))
        })?;
        let device_path = self.devices[&device_id].path.clone();
        self.evict(&device_id, &device_path)?;
        Ok(device_id)
    }

    fn evict(&mut self, device_id: &DeviceId, device_path: &str) -> PhoResult<()> {
        let agent = self.agents.get_mut(device_id).unwrap();
        let Some(medium_id) = agent.runtime.medium.clone() else { return Ok(()) };
        let mut medium = self
            .mediums
            .get_one(&medium_id.to_string())
            .ok_or_else(|| PhoError::NotFound(medium_id.to_string()))?;
        let mut device = self.devices[device_id].clone();

        if agent.op_status == OpStatus::Mounted {
            let fs = self.registry.filesystem_mut(&self.filesystem_name)?;
            agent.umount(fs, &mut device)?;
        }
        let library = self.registry.library_mut(&self.library_name)?;
        agent.unload(library, &mut device, &mut medium, device_path, &medium_id.name)?;

        self.devices.insert(device_id.clone(), device);
        self.mediums.update(&medium_id.to_string(), |m| *m = medium.clone())?;
        Ok(())
    }

    // ---- read_alloc ----------------------------------------------

    fn handle_read_alloc(&mut self, req: &ReadAllocReq) -> PhoResult<ReadAllocResp> {
        let mut media = Vec::new();
        for candidate in &req.candidates {
            if media.len() as u32 >= req.n_required {
                break;
            }
            let Some(medium) = self.mediums.get_one(&candidate.to_string()) else { continue };
            if medium.lock.as_ref().is_some_and(|l| l.hostname != self.hostname) {
                continue;
            }
            let spec = MediumSpec {
                size: 0,
                family: candidate.family,
                tags: vec![],
                library: None,
            };
            let exclude = HashSet::new();
            if let Ok(Some((_, medium_id, root, avail))) = self.best_mounted_candidate(&spec, &exclude, false) {
                if medium_id == *candidate {
                    media.push(AllocatedMedium {
                        id: medium_id,
                        mount_path: root,
                        avail_size: avail,
                    });
                    continue;
                }
            }

            // The candidate's device may already be `Loaded` (medium
            // attached, not yet mounted); mounting it is cheaper than
            // evicting an empty drive for a fresh `load`, and is what the
            // per-candidate "attempt to load+mount" order requires.
            let already_loaded_device = self.agents.iter().find_map(|(id, a)| {
                (a.op_status == OpStatus::Loaded && a.runtime.medium.as_ref() == Some(candidate)).then(|| id.clone())
            });
            if let Some(device_id) = already_loaded_device {
                if let Ok((root, avail)) = self.mount_loaded(&device_id, candidate) {
                    media.push(AllocatedMedium {
                        id: candidate.clone(),
                        mount_path: root,
                        avail_size: avail,
                    });
                }
                continue;
            }

            let Some(device_id) = self.agents.iter().find_map(|(id, a)| {
                (a.op_status == OpStatus::Empty && self.devices.get(id).is_some_and(|d| d.id.family == candidate.family))
                    .then(|| id.clone())
            }) else {
                continue;
            };
            if let Ok((_, medium_id, root, avail)) = self.load_and_mount(&device_id, candidate) {
                media.push(AllocatedMedium {
                    id: medium_id,
                    mount_path: root,
                    avail_size: avail,
                });
            }
            let _ = medium;
        }
        if media.is_empty() && req.n_required > 0 {
            return Err(PhoError::NoDevice("no candidate medium could be reached".into()));
        }
        Ok(ReadAllocResp { media })
    }

    // ---- release ----------------------------------------------------

    fn handle_release(&mut self, req: &ReleaseReq, now: SystemTime) -> PhoResult<ReleaseAckResp> {
        let mut acked = Vec::new();
        for rel in &req.media {
            let Some((device_id, _)) = self
                .agents
                .iter()
                .find(|(_, a)| a.runtime.medium.as_ref() == Some(&rel.id))
                .map(|(id, a)| (id.clone(), a))
            else {
                continue;
            };
            if let Some(agent) = self.agents.get_mut(&device_id) {
                agent.record_release(req_hash(&rel.id), rel.size_written, now);
            }
            if rel.to_sync {
                self.maybe_sync(&device_id, rel.id.family, now)?;
            }
            acked.push(rel.id.clone());
        }
        Ok(ReleaseAckResp { media: acked })
    }

    fn maybe_sync(&mut self, device_id: &DeviceId, family: MediumFamily, now: SystemTime) -> PhoResult<()> {
        let should = {
            let agent = &self.agents[device_id];
            agent.should_sync(&self.config, family, now)
        };
        if !should {
            return Ok(());
        }
        let medium_id = self.agents[device_id].runtime.medium.clone().unwrap();
        let mut medium = self
            .mediums
            .get_one(&medium_id.to_string())
            .ok_or_else(|| PhoError::NotFound(medium_id.to_string()))?;
        let agent = self.agents.get_mut(device_id).unwrap();
        let io = self.registry.io_mut(&self.io_name)?;
        agent.sync(io, &mut medium)?;
        self.mediums.update(&medium_id.to_string(), |m| *m = medium)?;
        info!("synced medium {medium_id} on device {device_id}");
        Ok(())
    }

    // ---- format -------------------------------------------------------

    fn handle_format(&mut self, req: &FormatReq) -> PhoResult<FormatResp> {
        let device_id = self
            .agents
            .iter()
            .find(|(id, a)| {
                a.op_status == OpStatus::Empty && self.devices.get(*id).is_some_and(|d| d.id.family == req.medium.family)
            })
            .map(|(id, _)| id.clone())
            .ok_or_else(|| PhoError::NoDevice(format!("no empty device of family {:?}", req.medium.family)))?;

        let (_, medium_id, root, _) = self.load_and_mount(&device_id, &req.medium)?;

        let device = self.devices.get(&device_id).unwrap().clone();
        let df = {
            let fs = self.registry.filesystem_mut(&self.filesystem_name)?;
            fs.format(&device.path, &medium_id.to_string())?
        };

        self.mediums.update(&medium_id.to_string(), |m| {
            m.fs_status = FsStatus::Empty;
            m.stats.phys_free = df.avail;
            m.stats.phys_used = df.used;
            if req.unlock {
                m.adm_status = AdmStatus::Unlocked;
            }
        })?;

        let _ = root;
        Ok(FormatResp {
            medium: medium_id,
            fs_status: FsStatus::Empty,
        })
    }
}

/// Orders write candidates so a whole-fit medium (free space covers the
/// entire request) always beats a split-fit one, matching a split
/// allocation only when nothing can take the request whole. Within each
/// group, `BestFit` prefers the tightest fit: the smallest free space
/// that still covers a whole-fit request, or the largest free space
/// among split-fit candidates (the split that leaves the least spread
/// across media).
fn candidate_rank(free: u64, requested: u64) -> (u8, u64) {
    if free >= requested {
        (0, free)
    } else {
        (1, u64::MAX - free)
    }
}

/// Cheap per-release requester tag: the scheduler only needs to group
/// releases belonging to the same `release{}` call, not identify a
/// client across calls.
fn req_hash(id: &MediumId) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake::{FakeDeviceAdapter, FakeFilesystem, FakeIo, FakeLibrary};
    use crate::model::{MediumFlags, MediumStats};

    /// A scheduler with a single `dir` device carrying a formatted,
    /// already-`empty` medium with room to write, wired the way
    /// `device_agent`'s own tests wire a drive.
    fn fixture_scheduler() -> Scheduler {
        let mut library = FakeLibrary::new();
        let mut fs = FakeFilesystem::new(1 << 30);
        let drive_addr = "/dev/fake0";
        let medium_id = MediumId {
            family: MediumFamily::Dir,
            name: "med0".into(),
        };
        library.add_drive(drive_addr);
        library.add_slot("med0", "slot0");
        fs.format(drive_addr, &medium_id.to_string()).unwrap();

        let mut registry = AdapterRegistry::new();
        registry.register_library("fake", Box::new(library));
        registry.register_filesystem("fake", Box::new(fs));
        registry.register_io("fake", Box::new(FakeIo::new()));
        registry.register_device("fake", Box::new(FakeDeviceAdapter::new()));

        let mut scheduler = Scheduler::new("host1", 100, Config::default(), registry, "fake", "fake", "fake");

        let device_id = DeviceId {
            family: MediumFamily::Dir,
            serial: "drv0".into(),
        };
        scheduler.register_device(Device::new(device_id, "host1", "dir-drive", drive_addr));

        let medium = Medium {
            id: medium_id,
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
        scheduler
    }

    #[test]
    fn write_alloc_picks_a_device_and_release_syncs_once_the_request_threshold_is_crossed() {
        let mut scheduler = fixture_scheduler();

        scheduler.enqueue(Request {
            id: 1,
            body: RequestBody::WriteAlloc(WriteAllocReq {
                n_media: 1,
                per_medium: MediumSpec {
                    size: 10,
                    family: MediumFamily::Dir,
                    tags: vec![],
                    library: None,
                },
            }),
        });
        let responses = scheduler.run_once(SystemTime::now());
        let ResponseBody::WriteAlloc(alloc) = responses.into_iter().next().unwrap().body else {
            panic!("expected a write_alloc response");
        };
        let medium_id = alloc.media[0].id.clone();

        // The fixture's sync_nb_req_threshold for `dir` is 5; five small
        // releases should be enough to push the medium past `empty`
        // without relying on the time threshold.
        for n in 0..5u64 {
            scheduler.enqueue(Request {
                id: 10 + n,
                body: RequestBody::Release(ReleaseReq {
                    media: vec![ReleaseMedium {
                        id: medium_id.clone(),
                        rc: None,
                        size_written: 1,
                        to_sync: true,
                    }],
                }),
            });
            scheduler.run_once(SystemTime::now());
        }

        let medium = scheduler.mediums().get_one(&medium_id.to_string()).unwrap();
        assert_eq!(medium.fs_status, FsStatus::Used);
    }

    #[test]
    fn write_alloc_reports_no_device_for_a_family_with_no_drives() {
        let mut scheduler = fixture_scheduler();
        scheduler.enqueue(Request {
            id: 1,
            body: RequestBody::WriteAlloc(WriteAllocReq {
                n_media: 1,
                per_medium: MediumSpec {
                    size: 10,
                    family: MediumFamily::Tape,
                    tags: vec![],
                    library: None,
                },
            }),
        });
        let resp = scheduler.run_once(SystemTime::now()).into_iter().next().unwrap();
        match resp.body {
            ResponseBody::Error(e) => assert_eq!(e.rc, crate::error::ErrorCode::NoDevice),
            other => panic!("expected an error response, got {other:?}"),
        }
    }

    #[test]
    fn read_alloc_mounts_a_loaded_but_unmounted_candidate_directly() {
        let mut scheduler = fixture_scheduler();
        let device_id = DeviceId {
            family: MediumFamily::Dir,
            serial: "drv0".into(),
        };
        let medium_id = MediumId {
            family: MediumFamily::Dir,
            name: "med0".into(),
        };

        // The device already holds the candidate medium but hasn't been
        // mounted yet; `handle_read_alloc` must mount it directly rather
        // than treating it as unreachable because no `Empty` device of
        // this family is free.
        {
            let agent = scheduler.agents.get_mut(&device_id).unwrap();
            agent.op_status = OpStatus::Loaded;
            agent.runtime.medium = Some(medium_id.clone());
        }

        scheduler.enqueue(Request {
            id: 1,
            body: RequestBody::ReadAlloc(ReadAllocReq {
                n_required: 1,
                candidates: vec![medium_id.clone()],
            }),
        });
        let resp = scheduler.run_once(SystemTime::now()).into_iter().next().unwrap();
        let ResponseBody::ReadAlloc(alloc) = resp.body else {
            panic!("expected a read_alloc response");
        };
        assert_eq!(alloc.media.len(), 1);
        assert_eq!(alloc.media[0].id, medium_id);
        assert_eq!(scheduler.agents[&device_id].op_status, OpStatus::Mounted);
    }

    #[test]
    fn notify_add_rejects_a_device_the_scheduler_has_no_row_for() {
        let mut scheduler = fixture_scheduler();
        let err = scheduler
            .handle_notify(&NotifyReq {
                op: NotifyOp::Add,
                resource_id: DeviceId {
                    family: MediumFamily::Dir,
                    serial: "ghost".into(),
                },
                wait: false,
            })
            .unwrap_err();
        assert!(matches!(err, PhoError::NotFound(_)));
    }

    #[test]
    fn notify_unlock_revives_a_failed_device() {
        let mut scheduler = fixture_scheduler();
        let device_id = DeviceId {
            family: MediumFamily::Dir,
            serial: "drv0".into(),
        };
        scheduler.agents.get_mut(&device_id).unwrap().op_status = OpStatus::Failed;
        scheduler.devices.get_mut(&device_id).unwrap().adm_status = AdmStatus::Locked;

        scheduler
            .handle_notify(&NotifyReq {
                op: NotifyOp::Unlock,
                resource_id: device_id.clone(),
                wait: false,
            })
            .unwrap();

        assert_eq!(scheduler.agents[&device_id].op_status, OpStatus::Empty);
        assert_eq!(scheduler.devices[&device_id].adm_status, AdmStatus::Unlocked);
    }
}
