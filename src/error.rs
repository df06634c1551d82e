//! Error taxonomy
//!
//! The core never leaks raw OS error codes across its public API. Adapter
//! failures are classified into [`PhoError`] at the adapter boundary; the
//! numeric mapping lives only there (see e.g. [`PhoError::from_errno`]).

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed error taxonomy the core uses everywhere above the adapter
/// boundary.
#[derive(Error, Debug)]
pub enum PhoError {
    /// A request or its parameters are malformed.
    #[error("invalid: {0}")]
    Invalid(String),
    /// The requested row or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness constraint would be violated.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// No medium has enough free space to satisfy the request.
    #[error("no space: {0}")]
    NoSpace(String),
    /// No compatible device exists, now or structurally.
    #[error("no device: {0}")]
    NoDevice(String),
    /// The resource is held by someone else right now.
    #[error("busy: {0}")]
    Busy(String),
    /// The operation cannot make progress yet; retry.
    #[error("would block")]
    WouldBlock,
    /// The state index or library could not be reached.
    #[error("comm: {0}")]
    Comm(String),
    /// An I/O adapter reported a raw failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// The wire protocol version on a frame is not supported.
    #[error("protocol unsupported")]
    ProtocolUnsupported,
    /// The requested capability is not implemented by any registered adapter.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// An unrecoverable condition; the caller should give up.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type PhoResult<T> = Result<T, PhoError>;

impl PhoError {
    /// Classify a raw OS error at an adapter boundary.
    ///
    /// This is the only place numeric errno values are allowed to leak
    /// into the core's error taxonomy.
    pub fn from_errno(err: &io::Error) -> PhoError {
        match err.raw_os_error() {
            Some(libc::ENOSPC) => PhoError::NoSpace(err.to_string()),
            Some(libc::EBUSY) => PhoError::Busy(err.to_string()),
            Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => PhoError::WouldBlock,
            Some(libc::ENOENT) => PhoError::NotFound(err.to_string()),
            Some(libc::EEXIST) => PhoError::AlreadyExists(err.to_string()),
            Some(libc::ENODEV) | Some(libc::ENXIO) => PhoError::NoDevice(err.to_string()),
            Some(libc::EINVAL) => PhoError::Invalid(err.to_string()),
            Some(libc::ECONNREFUSED) | Some(libc::ETIMEDOUT) => PhoError::Comm(err.to_string()),
            _ => PhoError::Io(io::Error::new(err.kind(), err.to_string())),
        }
    }

    /// Stable wire/log code for this error kind, independent of the
    /// human-readable message carried alongside it.
    pub fn rc(&self) -> ErrorCode {
        match self {
            PhoError::Invalid(_) => ErrorCode::Invalid,
            PhoError::NotFound(_) => ErrorCode::NotFound,
            PhoError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            PhoError::NoSpace(_) => ErrorCode::NoSpace,
            PhoError::NoDevice(_) => ErrorCode::NoDevice,
            PhoError::Busy(_) => ErrorCode::Busy,
            PhoError::WouldBlock => ErrorCode::WouldBlock,
            PhoError::Comm(_) => ErrorCode::Comm,
            PhoError::Io(_) => ErrorCode::Io,
            PhoError::ProtocolUnsupported => ErrorCode::ProtocolUnsupported,
            PhoError::NotSupported(_) => ErrorCode::NotSupported,
            PhoError::Fatal(_) => ErrorCode::Fatal,
        }
    }
}

/// The wire-safe projection of [`PhoError`]: carries the `rc` that an
/// `error{rc, for_kind}` response preserves, without the free-text detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Invalid,
    NotFound,
    AlreadyExists,
    NoSpace,
    NoDevice,
    Busy,
    WouldBlock,
    Comm,
    Io,
    ProtocolUnsupported,
    NotSupported,
    Fatal,
}
