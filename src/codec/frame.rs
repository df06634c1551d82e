//! Frame layout and (de)serialization.
//!
//! `[1 byte protocol version][4 byte little-endian length][bincode payload]`
//! over a local stream socket. The version byte is checked on every frame
//! read; a mismatch is `protocol_unsupported` and the caller is expected
//! to close the connection.

use std::io::{self, Read, Write};

use crate::codec::message::{Request, Response};
use crate::error::{PhoError, PhoResult};

/// The only protocol version this build understands.
pub const PROTOCOL_VERSION: u8 = 1;

/// Frames larger than this are rejected before allocating a buffer for
/// them, so a corrupt or hostile length prefix can't cause an
/// unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

fn read_exact_or_comm<S: Read>(stream: &mut S, buf: &mut [u8]) -> PhoResult<()> {
    stream.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PhoError::Comm("connection closed mid-frame".into())
        } else {
            PhoError::Io(e)
        }
    })
}

/// Reads one length-prefixed frame and decodes it as a [`Request`].
///
/// Returns `Err(PhoError::ProtocolUnsupported)` without consuming the
/// rest of the frame if the version byte doesn't match
/// [`PROTOCOL_VERSION`]; the caller must close the connection in that
/// case since the remaining bytes can no longer be framed reliably.
pub fn read_request<S: Read>(stream: &mut S) -> PhoResult<Request> {
    let payload = read_frame(stream)?;
    bincode::deserialize(&payload)
        .map_err(|e| PhoError::Comm(format!("malformed request: {e}")))
}

pub fn read_response<S: Read>(stream: &mut S) -> PhoResult<Response> {
    let payload = read_frame(stream)?;
    bincode::deserialize(&payload)
        .map_err(|e| PhoError::Comm(format!("malformed response: {e}")))
}

fn read_frame<S: Read>(stream: &mut S) -> PhoResult<Vec<u8>> {
    let mut version = [0u8; 1];
    read_exact_or_comm(stream, &mut version)?;
    if version[0] != PROTOCOL_VERSION {
        return Err(PhoError::ProtocolUnsupported);
    }

    let mut len_buf = [0u8; 4];
    read_exact_or_comm(stream, &mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(PhoError::Comm(format!(
            "frame length {len} exceeds max {MAX_FRAME_LEN}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    read_exact_or_comm(stream, &mut payload)?;
    Ok(payload)
}

fn write_frame<S: Write>(stream: &mut S, payload: &[u8]) -> PhoResult<()> {
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(PhoError::Invalid(format!(
            "frame of {} bytes exceeds max {MAX_FRAME_LEN}",
            payload.len()
        )));
    }
    let mut header = [0u8; 5];
    header[0] = PROTOCOL_VERSION;
    header[1..5].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    stream.write_all(&header).map_err(PhoError::Io)?;
    stream.write_all(payload).map_err(PhoError::Io)?;
    Ok(())
}

pub fn write_request<S: Write>(stream: &mut S, req: &Request) -> PhoResult<()> {
    let payload = bincode::serialize(req)
        .map_err(|e| PhoError::Invalid(format!("failed to encode request: {e}")))?;
    write_frame(stream, &payload)
}

pub fn write_response<S: Write>(stream: &mut S, resp: &Response) -> PhoResult<()> {
    let payload = bincode::serialize(resp)
        .map_err(|e| PhoError::Invalid(format!("failed to encode response: {e}")))?;
    write_frame(stream, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::message::{RequestBody, RequestKind, Response, ResponseBody};
    use crate::error::ErrorCode;

    #[test]
    fn round_trips_a_ping_request() {
        let req = Request {
            id: 42,
            body: RequestBody::Ping,
        };
        let mut buf = Vec::new();
        write_request(&mut buf, &req).unwrap();

        let mut cursor = &buf[..];
        let decoded = read_request(&mut cursor).unwrap();
        assert_eq!(decoded.id, 42);
        assert!(matches!(decoded.body, RequestBody::Ping));
    }

    #[test]
    fn rejects_mismatched_protocol_version() {
        let mut buf = Vec::new();
        buf.push(PROTOCOL_VERSION + 1);
        buf.extend_from_slice(&0u32.to_le_bytes());

        let mut cursor = &buf[..];
        let err = read_request(&mut cursor).unwrap_err();
        assert!(matches!(err, PhoError::ProtocolUnsupported));
    }

    #[test]
    fn round_trips_an_error_response() {
        let resp = Response::error(7, RequestKind::WriteAlloc, ErrorCode::NoSpace);
        let mut buf = Vec::new();
        write_response(&mut buf, &resp).unwrap();

        let mut cursor = &buf[..];
        let decoded = read_response(&mut cursor).unwrap();
        assert_eq!(decoded.id, 7);
        assert!(matches!(
            decoded.body,
            ResponseBody::Error(e) if matches!(e.rc, ErrorCode::NoSpace)
        ));
    }
}
