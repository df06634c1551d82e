//! Daemon event loop: accepts client connections on a Unix
//! stream socket and multiplexes them through the single-threaded
//! scheduler.
//!
//! Each accepted connection is read one length-prefixed frame at a
//! time, dispatched to the scheduler, and answered in turn, multiplexed
//! with `nix::poll` rather than one worker thread per connection since
//! [`Scheduler`] is not thread-safe and is never meant to be driven from
//! more than one thread at a time.

use std::collections::HashMap;
use std::os::fd::AsFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::codec::{read_request, write_response, Request};
use crate::error::{PhoError, PhoResult};
use crate::scheduler::Scheduler;

/// Binds `server_socket`, accepts clients, and drives a [`Scheduler`]
/// until told to stop.
pub struct Daemon {
    listener: UnixListener,
    socket_path: PathBuf,
    scheduler: Scheduler,
    clients: HashMap<u64, UnixStream>,
    next_client_id: u64,
    /// Which client (and which id that client used) a request the
    /// scheduler hasn't answered yet belongs to, keyed by the id the
    /// daemon assigned it internally — client-chosen ids aren't unique
    /// across connections, so they can't be used as the scheduler's key.
    pending_owner: HashMap<u64, (u64, u64)>,
    next_req_id: u64,
}

impl Daemon {
    /// Binds a fresh Unix stream socket at `path`, removing a stale
    /// socket file left behind by an unclean shutdown first.
    pub fn bind(path: &Path, scheduler: Scheduler) -> PhoResult<Daemon> {
        if path.exists() {
            std::fs::remove_file(path).map_err(PhoError::Io)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(PhoError::Io)?;
        }
        let listener = UnixListener::bind(path).map_err(PhoError::Io)?;
        info!("daemon listening on {}", path.display());
        Ok(Daemon {
            listener,
            socket_path: path.to_path_buf(),
            scheduler,
            clients: HashMap::new(),
            next_client_id: 1,
            pending_owner: HashMap::new(),
            next_req_id: 1,
        })
    }

    /// Runs the accept/dispatch loop until `stop` is set, e.g. by a
    /// `SIGTERM`/`SIGINT` handler installed in `phobosd.rs`.
    pub fn run(&mut self, stop: &Arc<AtomicBool>) -> PhoResult<()> {
        while !stop.load(Ordering::Relaxed) {
            self.poll_once()?;
        }
        info!(
            "daemon loop stopping, {} client(s) still connected",
            self.clients.len()
        );
        Ok(())
    }

    /// One `poll(2)` iteration: accept a pending connection if any,
    /// service every readable client, then flush whatever responses the
    /// scheduler can now produce.
    fn poll_once(&mut self) -> PhoResult<()> {
        let mut fds = Vec::with_capacity(self.clients.len() + 1);
        fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        let client_ids: Vec<u64> = self.clients.keys().copied().collect();
        for id in &client_ids {
            fds.push(PollFd::new(self.clients[id].as_fd(), PollFlags::POLLIN));
        }

        poll(&mut fds, PollTimeout::from(250u16)).map_err(|e| PhoError::Comm(format!("poll failed: {e}")))?;

        let listener_ready = fds[0].revents().is_some_and(|e| e.contains(PollFlags::POLLIN));
        let ready_clients: Vec<u64> = client_ids
            .into_iter()
            .zip(fds.into_iter().skip(1))
            .filter(|(_, fd)| fd.revents().is_some_and(|e| e.contains(PollFlags::POLLIN)))
            .map(|(id, _)| id)
            .collect();

        if listener_ready {
            if let Err(e) = self.accept_one() {
                warn!("accept failed: {e}");
            }
        }
        for id in ready_clients {
            if self.service_client(id).is_err() {
                self.clients.remove(&id);
            }
        }
        self.flush_responses();
        Ok(())
    }

    fn accept_one(&mut self) -> PhoResult<()> {
        let (stream, _addr) = self.listener.accept().map_err(PhoError::Io)?;
        let id = self.next_client_id;
        self.next_client_id += 1;
        debug!("accepted client connection {id}");
        self.clients.insert(id, stream);
        Ok(())
    }

    /// Reads one frame from `client_id` and hands it to the scheduler.
    /// Returns `Err` (and the caller drops the connection) on a
    /// malformed frame, a protocol version mismatch, or EOF.
    fn service_client(&mut self, client_id: u64) -> PhoResult<()> {
        let stream = self
            .clients
            .get_mut(&client_id)
            .ok_or_else(|| PhoError::NotFound(format!("no client {client_id}")))?;
        let req = match read_request(stream) {
            Ok(req) => req,
            Err(PhoError::ProtocolUnsupported) => {
                warn!("client {client_id} sent an unsupported protocol version, closing connection");
                return Err(PhoError::ProtocolUnsupported);
            }
            Err(e) => {
                debug!("client {client_id} disconnected: {e}");
                return Err(e);
            }
        };

        let daemon_id = self.next_req_id;
        self.next_req_id += 1;
        self.pending_owner.insert(daemon_id, (client_id, req.id));
        self.scheduler.enqueue(Request {
            id: daemon_id,
            body: req.body,
        });
        Ok(())
    }

    /// Drains whatever the scheduler can answer right now and writes
    /// each response back to the client that submitted it, restoring
    /// the id that client originally sent.
    fn flush_responses(&mut self) {
        let responses = self.scheduler.run_once(SystemTime::now());
        for mut resp in responses {
            let Some((client_id, original_id)) = self.pending_owner.remove(&resp.id) else {
                continue;
            };
            resp.id = original_id;
            let Some(stream) = self.clients.get_mut(&client_id) else {
                continue;
            };
            if write_response(stream, &resp).is_err() {
                warn!("failed to write response to client {client_id}, dropping connection");
                self.clients.remove(&client_id);
            }
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterRegistry;
    use crate::codec::{write_request, RequestBody, ResponseBody};
    use crate::config::Config;

    fn test_scheduler() -> Scheduler {
        Scheduler::new("host1", 1, Config::default(), AdapterRegistry::new(), "fake", "fake", "fake")
    }

    #[test]
    fn services_one_client_ping_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("lrs.sock");
        let mut daemon = Daemon::bind(&socket_path, test_scheduler()).unwrap();

        let mut client = UnixStream::connect(&socket_path).unwrap();
        write_request(
            &mut client,
            &Request {
                id: 7,
                body: RequestBody::Ping,
            },
        )
        .unwrap();

        // First iteration only accepts; the freshly-accepted fd isn't in
        // the poll set built before `accept()` ran.
        daemon.poll_once().unwrap();
        daemon.poll_once().unwrap();

        let resp = crate::codec::read_response(&mut client).unwrap();
        assert_eq!(resp.id, 7);
        assert!(matches!(resp.body, ResponseBody::Pong));
    }

    #[test]
    fn drop_removes_the_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("lrs.sock");
        {
            let _daemon = Daemon::bind(&socket_path, test_scheduler()).unwrap();
            assert!(socket_path.exists());
        }
        assert!(!socket_path.exists());
    }
}
