use super::unix::{RawFd, sys_close};

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLRDHUP};

/// Interest mask a channel registers with.
///
/// Every channel in this crate is edge-triggered readable; the mask is
/// fixed when the channel is built and never changes afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) edge: bool,
}

impl Interest {
    /// Edge-triggered readable interest.
    pub(crate) const READABLE: Interest = Interest {
        read: true,
        edge: true,
    };

    pub(crate) fn to_epoll(self) -> u32 {
        let mut flags = 0;

        if self.read {
            flags |= EPOLLIN | EPOLLRDHUP;
        }
        if self.edge {
            flags |= EPOLLET;
        }

        flags as u32
    }
}

/// Readiness reported for a channel by the last `wait`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Ready {
    pub(crate) readable: bool,
    pub(crate) hangup: bool,
    pub(crate) error: bool,
}

impl Ready {
    pub(crate) fn from_epoll(events: u32) -> Self {
        Self {
            readable: events & (EPOLLIN as u32) != 0,
            hangup: events & ((EPOLLHUP | EPOLLRDHUP) as u32) != 0,
            error: events & (EPOLLERR as u32) != 0,
        }
    }
}

/// Handle to the poller's `eventfd`.
///
/// Worker threads use it to pull the loop thread out of `epoll_wait`
/// once they have posted a completion.
pub(crate) struct Waker(pub(crate) RawFd);

impl Waker {
    /// Signals the eventfd, making a pending `epoll_wait` return.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }

    /// Resets the eventfd counter after a wake-up was observed.
    pub(crate) fn reset(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(self.0, &mut buf as *mut _ as *mut _, 8);
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        sys_close(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_interest_is_edge_triggered() {
        let bits = Interest::READABLE.to_epoll();

        assert_ne!(bits & EPOLLIN as u32, 0);
        assert_ne!(bits & EPOLLET as u32, 0);
    }

    #[test]
    fn test_ready_from_epoll_bits() {
        let ready = Ready::from_epoll((EPOLLIN | EPOLLHUP) as u32);
        assert!(ready.readable);
        assert!(ready.hangup);
        assert!(!ready.error);

        assert_eq!(Ready::from_epoll(0), Ready::default());
    }
}
