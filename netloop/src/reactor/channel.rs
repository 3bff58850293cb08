use super::buffer::Buffer;
use super::drain::drain_fd;
use super::poller::common::{Interest, Ready};
use super::poller::platform::RawFd;
use crate::error::Result;
use crate::net::{Descriptor, accept_fd};

use std::fmt;
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use tracing::{error, warn};

/// Identifier of a connection, unique for the lifetime of a server.
///
/// Descriptor numbers are reused by the kernel as soon as a socket is
/// closed, so connections are identified by a counter instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    /// Returns the numeric value of the id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Hook receiving every flushed chunk of a connection.
pub(crate) type DataCallback = Arc<dyn Fn(ConnectionId, &[u8]) + Send + Sync>;

/// Hook invoked once when a connection is torn down.
pub(crate) type CloseCallback = Arc<dyn Fn(ConnectionId) + Send + Sync>;

/// Work run on a worker thread when a channel becomes ready.
///
/// It receives the channel's raw descriptor, borrowed for the duration of
/// the call; the channel itself stays in the server's arena and cannot be
/// destroyed while its work is out.
pub(crate) type Work = Box<dyn FnMut(RawFd) -> Outcome + Send>;

/// Result of running a channel's work once.
pub(crate) enum Outcome {
    /// The descriptor was drained and stays open.
    Drained,

    /// The connection has to be torn down.
    Closed(CloseReason),

    /// Connections taken off the listening socket's backlog.
    Accepted(Vec<(Descriptor, SocketAddrV4)>),
}

/// Why a connection is being torn down.
#[derive(Debug)]
pub(crate) enum CloseReason {
    /// Zero-length read.
    Peer,

    /// A read failed with something other than would-block or interrupted.
    Io(io::Error),

    /// The channel's work panicked.
    TaskFailure,

    /// The server is stopping.
    Shutdown,
}

/// The two kinds of channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    /// Listening socket; its work accepts new peers.
    Accept,

    /// Peer socket; its work runs the drain protocol.
    Connection(ConnectionId),
}

/// Whether a channel is currently in the multiplexer's interest set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RegistrationState {
    Unregistered,
    Registered,
}

/// A registered unit of interest.
///
/// A channel binds one owned descriptor to a fixed interest mask and a work
/// closure. The closure is taken out while a worker runs it and put back
/// afterwards, so the same channel can never be drained by two threads at
/// once. Readiness reported while the work is out is remembered in
/// `pending` and replayed when it comes back.
pub(crate) struct Channel {
    descriptor: Descriptor,
    kind: ChannelKind,
    interest: Interest,
    ready: Ready,
    state: RegistrationState,
    work: Option<Work>,
    pending: bool,
}

impl Channel {
    fn new(descriptor: Descriptor, kind: ChannelKind, work: Work) -> Self {
        Self {
            descriptor,
            kind,
            interest: Interest::READABLE,
            ready: Ready::default(),
            state: RegistrationState::Unregistered,
            work: Some(work),
            pending: false,
        }
    }

    /// Wraps a listening socket.
    pub(crate) fn accept(listener: Descriptor) -> Self {
        Self::new(listener, ChannelKind::Accept, accept_work())
    }

    /// Wraps an accepted peer socket.
    ///
    /// The channel owns a fresh [`Buffer`]; every chunk drained from the
    /// socket is handed to `on_data` together with `id`.
    pub(crate) fn connection(peer: Descriptor, id: ConnectionId, on_data: DataCallback) -> Self {
        let mut buffer = Buffer::new();

        let work: Work = Box::new(move |fd| drain_fd(fd, &mut buffer, |chunk| on_data(id, chunk)));

        Self::new(peer, ChannelKind::Connection(id), work)
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.descriptor.as_raw_fd()
    }

    pub(crate) fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub(crate) fn interest(&self) -> Interest {
        self.interest
    }

    pub(crate) fn ready(&self) -> Ready {
        self.ready
    }

    pub(crate) fn set_ready(&mut self, ready: Ready) {
        self.ready = ready;
    }

    pub(crate) fn state(&self) -> RegistrationState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RegistrationState) {
        self.state = state;
    }

    /// Takes the work out for dispatch.
    ///
    /// Returns `None` when the work is already out; the readiness is then
    /// recorded so it can be replayed by [`finish`](Self::finish).
    pub(crate) fn begin(&mut self) -> Option<(RawFd, Work)> {
        match self.work.take() {
            Some(work) => Some((self.fd(), work)),
            None => {
                self.pending = true;
                None
            }
        }
    }

    /// Puts the work back after a worker ran it.
    ///
    /// Returns `true` if readiness was reported in the meantime and the
    /// channel should be dispatched again.
    pub(crate) fn finish(&mut self, work: Work) -> bool {
        self.work = Some(work);
        std::mem::take(&mut self.pending)
    }

    /// Replaces work lost to a panic on the listening socket.
    pub(crate) fn restore_accept(&mut self) -> bool {
        debug_assert_eq!(self.kind, ChannelKind::Accept);
        self.finish(accept_work())
    }
}

/// Builds the accept channel's work.
///
/// Several connections arriving together may produce a single edge, so the
/// backlog is drained until `accept` would block.
///
/// Interrupted and aborted accepts are retried; any other failure ends
/// the pass. Running out of descriptors (`EMFILE`/`ENFILE`) leaves the rest
/// of the backlog queued in the kernel with no new edge to report it; it is
/// picked up when the next connection arrives.
fn accept_work() -> Work {
    Box::new(|fd| Outcome::Accepted(accept_backlog(fd, || accept_fd(fd))))
}

/// Calls `accept` until the backlog is empty or a fatal error occurs.
fn accept_backlog<A>(fd: RawFd, mut accept: A) -> Vec<(Descriptor, SocketAddrV4)>
where
    A: FnMut() -> Result<(Descriptor, SocketAddrV4)>,
{
    let mut accepted = Vec::new();

    loop {
        match accept() {
            Ok(pair) => accepted.push(pair),
            Err(e) if e.is_would_block() => break,
            Err(e) if e.io_kind() == Some(io::ErrorKind::Interrupted) => continue,
            Err(e) if e.os_code() == Some(libc::ECONNABORTED) => continue,
            Err(e) if matches!(e.os_code(), Some(libc::EMFILE | libc::ENFILE)) => {
                warn!(fd, error = %e, "out of descriptors, pending connections left in backlog");
                break;
            }
            Err(e) => {
                error!(fd, error = %e, "socket accept error");
                break;
            }
        }
    }

    accepted
}
