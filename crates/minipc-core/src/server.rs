//! The server loop: one `poll(2)` per [`Link::server_action`] call.
//!
//! The listener and up to [`MAX_CLIENTS`] connections share one readiness
//! set. The listener is serviced first, then clients in slot order, and each
//! readable client gets exactly one request read, dispatched, and answered
//! before the next one is looked at.

use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, trace, warn};

use crate::dispatch::handle_request;
use crate::error::Error;
use crate::export::ExportTable;
use crate::link::Link;
use crate::logging::Diagnostics;
use crate::protocol::{
    DeadlineStream, MAX_CLIENTS, MAX_REQUEST_WORDS, Request, read_frame, write_frame,
};

// ── Client table ─────────────────────────────────────────────────

/// Fixed-capacity set of connected clients. Free slots are `None`.
pub(crate) struct ClientTable {
    slots: [Option<UnixStream>; MAX_CLIENTS],
}

impl ClientTable {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Store `stream` in the first free slot, or hand it back when full.
    fn insert(&mut self, stream: UnixStream) -> Result<usize, UnixStream> {
        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(stream);
                Ok(slot)
            }
            None => Err(stream),
        }
    }

    fn remove(&mut self, slot: usize) -> Option<UnixStream> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    fn get(&self, slot: usize) -> Option<&UnixStream> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Occupied slots with their streams, in slot order.
    fn iter(&self) -> impl Iterator<Item = (usize, &UnixStream)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, stream)| stream.as_ref().map(|s| (slot, s)))
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

// ── Server endpoint ──────────────────────────────────────────────

pub(crate) struct ServerEndpoint {
    pub(crate) listener: UnixListener,
    pub(crate) clients: ClientTable,
    pub(crate) exports: ExportTable,
}

/// What the poll reported, captured before any slot is touched.
enum Ready {
    Listener,
    Client(usize),
}

impl ServerEndpoint {
    pub(crate) fn new(listener: UnixListener) -> Self {
        Self {
            listener,
            clients: ClientTable::new(),
            exports: ExportTable::new(),
        }
    }

    fn poll_ready(&self, timeout: PollTimeout) -> Result<Vec<Ready>, Error> {
        let mut sources = vec![Ready::Listener];
        let mut fds = vec![PollFd::new(self.listener.as_fd(), PollFlags::POLLIN)];
        for (slot, stream) in self.clients.iter() {
            sources.push(Ready::Client(slot));
            fds.push(PollFd::new(stream.as_fd(), PollFlags::POLLIN));
        }

        match poll(&mut fds, timeout) {
            Ok(0) | Err(Errno::EINTR) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(errno) => return Err(Error::Io(io::Error::from(errno))),
        }

        let wanted = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        Ok(sources
            .into_iter()
            .zip(&fds)
            .filter(|(_, fd)| fd.revents().is_some_and(|r| r.intersects(wanted)))
            .map(|(source, _)| source)
            .collect())
    }

    fn accept(&mut self, diag: &mut Diagnostics) -> usize {
        let stream = match self.listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(link = %diag.link_name(), error = %e, "accept failed");
                return 0;
            }
        };
        match self.clients.insert(stream) {
            Ok(slot) => {
                debug!(link = %diag.link_name(), slot, "client connected");
                diag.line(format_args!("accepted client in slot {slot}"));
            }
            Err(rejected) => {
                warn!(link = %diag.link_name(), max = MAX_CLIENTS, "client table full, connection dropped");
                diag.line(format_args!("too many clients, dropping connection"));
                drop(rejected);
            }
        }
        1
    }

    /// Read, dispatch, and answer one request. The read and the write are
    /// each bounded as a whole by `io_timeout`, not per system call.
    fn serve_client(&mut self, slot: usize, io_timeout: Duration, diag: &mut Diagnostics) -> usize {
        let Some(stream) = self.clients.get(slot) else {
            return 0;
        };
        let read = read_frame(&mut DeadlineStream::new(stream, io_timeout), MAX_REQUEST_WORDS);
        let request = match read {
            Ok(words) => Request::from_words(words),
            Err(e) => {
                self.disconnect(slot, &e, diag);
                return 1;
            }
        };
        let Some(request) = request else {
            return 1;
        };

        let response = handle_request(&mut self.exports, &request);
        trace!(link = %diag.link_name(), slot, status = ?response.status, "responding");

        let Some(stream) = self.clients.get(slot) else {
            return 1;
        };
        let written = write_frame(&mut DeadlineStream::new(stream, io_timeout), &response.to_words());
        if let Err(e) = written {
            self.disconnect(slot, &e, diag);
        }
        1
    }

    fn disconnect(&mut self, slot: usize, cause: &io::Error, diag: &mut Diagnostics) {
        self.clients.remove(slot);
        match cause.kind() {
            io::ErrorKind::UnexpectedEof => {
                debug!(link = %diag.link_name(), slot, "client disconnected");
                diag.line(format_args!("client in slot {slot} disconnected"));
            }
            _ => {
                warn!(link = %diag.link_name(), slot, error = %cause, "dropping client");
                diag.line(format_args!("dropping client in slot {slot}: {cause}"));
            }
        }
    }
}

fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(t) => i32::try_from(t.as_millis())
            .ok()
            .and_then(|ms| PollTimeout::try_from(ms).ok())
            .unwrap_or(PollTimeout::MAX),
    }
}

impl Link {
    /// Wait up to `timeout` (forever when `None`) for activity and handle
    /// everything that became ready. Returns the number of handled events,
    /// 0 when the wait timed out or was interrupted by a signal.
    pub fn server_action(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        self.check()?;
        let io_timeout = self.options.client_io_timeout;
        let (server, diag) = self.server_parts()?;

        let ready = server.poll_ready(poll_timeout(timeout))?;
        let mut events = 0;
        for source in ready {
            events += match source {
                Ready::Listener => server.accept(diag),
                Ready::Client(slot) => server.serve_client(slot, io_timeout, diag),
            };
        }
        if events > 0 {
            trace!(link = %diag.link_name(), events, "server action");
        }
        Ok(events)
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> Result<usize, Error> {
        Ok(self.server_ref()?.clients.len())
    }

    /// Descriptors a server waits on: the listener, then every client.
    pub fn readiness_set(&self) -> Result<Vec<RawFd>, Error> {
        let server = self.server_ref()?;
        let mut fds = vec![server.listener.as_raw_fd()];
        fds.extend(server.clients.iter().map(|(_, s)| s.as_raw_fd()));
        Ok(fds)
    }
}
