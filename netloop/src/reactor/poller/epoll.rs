//! Linux `epoll`-based multiplexer.
//!
//! Responsibilities:
//! - Register channels with their (edge-triggered) interest mask
//! - Track which descriptors are currently in the interest set
//! - Block waiting for readiness and map events back to channels
//! - Let worker threads interrupt a blocking wait through an `eventfd`

use super::common::{Ready, Waker};
use super::unix::{RawFd, sys_close};
use crate::error::{Error, Result};
use crate::reactor::channel::{Channel, RegistrationState};
use crate::utils::{Slab, Token};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLIN, epoll_create1, epoll_ctl,
    epoll_event, epoll_wait,
};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

/// Reserved user data for the wake-up `eventfd`.
///
/// Slab tokens never reach this value: it would need both a slot index and
/// a generation of `u32::MAX`.
const WAKE_TOKEN: u64 = u64::MAX;

/// Readiness multiplexer over an `epoll` instance.
///
/// The multiplexer never owns channels. The kernel event record carries a
/// [`Token`] into the server's channel arena; on `wait` the token is
/// resolved, and events whose channel has since been destroyed are
/// dropped.
pub(crate) struct Multiplexer {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Descriptors currently in the interest set and their tokens.
    registrations: HashMap<RawFd, Token>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

impl Multiplexer {
    /// Creates the epoll instance and its wake-up eventfd.
    ///
    /// `max_events` bounds the number of events returned by one `wait`.
    pub(crate) fn new(max_events: usize) -> Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(Error::resource("epoll_create1", io::Error::last_os_error()));
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            sys_close(epoll);
            return Err(Error::resource("eventfd", err));
        }
        let waker = Arc::new(Waker(eventfd));

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            sys_close(epoll);
            return Err(Error::resource("epoll_ctl(ADD eventfd)", err));
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(max_events.max(1)),
            registrations: HashMap::new(),
            waker,
        })
    }

    /// Returns the waker used to interrupt a pending `wait`.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Registers `channel` under `token`.
    ///
    /// An unregistered channel is added to the interest set; a registered
    /// one is modified in place. Failures are returned as-is, never retried.
    pub(crate) fn register(&mut self, channel: &mut Channel, token: Token) -> Result<()> {
        let fd = channel.fd();
        let (op, name) = match channel.state() {
            RegistrationState::Unregistered => (EPOLL_CTL_ADD, "epoll_ctl(ADD)"),
            RegistrationState::Registered => (EPOLL_CTL_MOD, "epoll_ctl(MOD)"),
        };

        let mut event = epoll_event {
            events: channel.interest().to_epoll(),
            u64: token.to_u64(),
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(Error::resource(name, io::Error::last_os_error()));
        }

        self.registrations.insert(fd, token);
        channel.set_state(RegistrationState::Registered);
        trace!(fd, "channel registered");

        Ok(())
    }

    /// Removes `channel` from the interest set.
    ///
    /// Deregistering a channel that is not registered is a no-op.
    pub(crate) fn deregister(&mut self, channel: &mut Channel) -> Result<()> {
        if channel.state() == RegistrationState::Unregistered {
            return Ok(());
        }

        let fd = channel.fd();
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };

        self.registrations.remove(&fd);
        channel.set_state(RegistrationState::Unregistered);

        if rc < 0 {
            return Err(Error::resource("epoll_ctl(DEL)", io::Error::last_os_error()));
        }

        trace!(fd, "channel deregistered");
        Ok(())
    }

    /// Returns `true` if `fd` is in the interest set.
    pub(crate) fn is_registered(&self, fd: RawFd) -> bool {
        self.registrations.contains_key(&fd)
    }

    /// Number of registered descriptors, the wake-up eventfd excluded.
    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Waits for readiness.
    ///
    /// Blocks until a registered descriptor becomes ready, the waker fires,
    /// or `timeout` expires (`None` waits indefinitely). Each live channel
    /// reported ready gets its ready mask updated in `channels`, and its
    /// token is returned in kernel order. Stale tokens are skipped.
    pub(crate) fn wait(
        &mut self,
        channels: &mut Slab<Channel>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Token>> {
        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(Error::resource("epoll_wait", err));
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        let mut ready = Vec::with_capacity(n as usize);

        for ev in &self.events {
            // Wake-up event
            if ev.u64 == WAKE_TOKEN {
                self.waker.reset();
                continue;
            }

            let token = Token::from_u64(ev.u64);

            match channels.get_mut(token) {
                Some(channel) => {
                    channel.set_ready(Ready::from_epoll(ev.events));
                    ready.push(token);
                }
                None => trace!(?token, "dropping event for a destroyed channel"),
            }
        }

        unsafe {
            self.events.set_len(0);
        }

        Ok(ready)
    }
}

/// Converts a wait timeout to `epoll_wait` milliseconds.
///
/// Sub-millisecond remainders round up so a short non-zero timeout never
/// turns into a busy poll.
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    let Some(timeout) = timeout else {
        return -1;
    };

    let mut ms = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }

    ms.min(i32::MAX as u128) as i32
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        sys_close(self.epoll);
    }
}
