//! Wire protocol: typed messages and their frame encoding.

pub mod frame;
pub mod message;

pub use frame::{read_request, read_response, write_request, write_response, PROTOCOL_VERSION};
pub use message::{
    AllocatedMedium, ConfigureReq, ConfigureResp, ErrorResp, FormatReq, FormatResp, MediumSpec,
    MonitorResp, NotifyOp, NotifyReq, NotifyResp, ReadAllocReq, ReadAllocResp, ReleaseAckResp,
    ReleaseMedium, ReleaseReq, Request, RequestBody, RequestKind, Response, ResponseBody,
    WriteAllocReq, WriteAllocResp,
};
