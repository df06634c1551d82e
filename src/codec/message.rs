//! Typed request/response message bodies
//!
//! Each request or response kind is a Rust enum variant rather than a
//! tagged union, so `match` enforces exhaustiveness at compile time
//! instead of at runtime type checks.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::medium::{MediumFamily, MediumId};
use crate::model::device::DeviceId;
use crate::model::medium::FsStatus;

/// Tag identifying a request/response pair, independent of its payload.
/// Carried in `error{rc, for_kind}` so a client can tell which original
/// request failed without re-parsing the request it sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    WriteAlloc,
    ReadAlloc,
    Release,
    Format,
    Notify,
    Ping,
    Monitor,
    Configure,
}

/// A full request frame: a numeric id the response must preserve, plus
/// one typed body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub body: RequestBody,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        self.body.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
    WriteAlloc(WriteAllocReq),
    ReadAlloc(ReadAllocReq),
    Release(ReleaseReq),
    Format(FormatReq),
    Notify(NotifyReq),
    Ping,
    Monitor,
    Configure(ConfigureReq),
}

impl RequestBody {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestBody::WriteAlloc(_) => RequestKind::WriteAlloc,
            RequestBody::ReadAlloc(_) => RequestKind::ReadAlloc,
            RequestBody::Release(_) => RequestKind::Release,
            RequestBody::Format(_) => RequestKind::Format,
            RequestBody::Notify(_) => RequestKind::Notify,
            RequestBody::Ping => RequestKind::Ping,
            RequestBody::Monitor => RequestKind::Monitor,
            RequestBody::Configure(_) => RequestKind::Configure,
        }
    }
}

/// Per-medium parameters shared by every drive a `write_alloc` asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediumSpec {
    pub size: u64,
    pub family: MediumFamily,
    pub tags: Vec<String>,
    pub library: Option<String>,
}

/// Ask for `n_media` mountable media with at least `per_medium.size` free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteAllocReq {
    pub n_media: u32,
    pub per_medium: MediumSpec,
}

/// Supplies an over-set of candidates; the scheduler picks `n_required`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadAllocReq {
    pub n_required: u32,
    pub candidates: Vec<MediumId>,
}

/// Per-medium outcome reported by a client after it finished I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseMedium {
    pub id: MediumId,
    pub rc: Option<ErrorCode>,
    pub size_written: u64,
    pub to_sync: bool,
}

/// Declares I/O completion and requests durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseReq {
    pub media: Vec<ReleaseMedium>,
}

/// Transition a `blank` medium to `empty` via the filesystem adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatReq {
    pub medium: MediumId,
    pub fs_type: String,
    pub unlock: bool,
}

/// Inventory events: device registration/eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOp {
    Add,
    Lock,
    Unlock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyReq {
    pub op: NotifyOp,
    pub resource_id: DeviceId,
    pub wait: bool,
}

/// Runtime reconfiguration of daemon-local knobs (policy, thresholds).
/// Minimal by design: the core only needs a place for this request kind
/// to exist on the wire, per the Component Design table's "configure"
/// variant; no runtime knob is mutable through it beyond the policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureReq {
    pub key: String,
    pub value: String,
}

// ---- responses -------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub for_kind: RequestKind,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseBody {
    WriteAlloc(WriteAllocResp),
    ReadAlloc(ReadAllocResp),
    ReleaseAck(ReleaseAckResp),
    Format(FormatResp),
    Notify(NotifyResp),
    Pong,
    Monitor(MonitorResp),
    Configure(ConfigureResp),
    Error(ErrorResp),
}

/// One drive handed back by `write_alloc`/`read_alloc`: its medium id,
/// current mount path, and remaining free space on that medium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatedMedium {
    pub id: MediumId,
    pub mount_path: String,
    pub avail_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteAllocResp {
    pub media: Vec<AllocatedMedium>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadAllocResp {
    pub media: Vec<AllocatedMedium>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAckResp {
    pub media: Vec<MediumId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatResp {
    pub medium: MediumId,
    pub fs_status: FsStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyResp {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorResp {
    pub devices_loaded: u32,
    pub devices_mounted: u32,
    pub pending_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureResp {
    pub applied: bool,
}

/// Fails **per request**; preserves the original request's numeric id
/// and kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResp {
    pub rc: ErrorCode,
    pub for_kind: RequestKind,
}

impl Response {
    pub fn error(id: u64, for_kind: RequestKind, rc: ErrorCode) -> Response {
        Response {
            id,
            for_kind,
            body: ResponseBody::Error(ErrorResp { rc, for_kind }),
        }
    }
}
