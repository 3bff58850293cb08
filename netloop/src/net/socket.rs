use crate::error::{Error, Result};
use crate::reactor::poller::platform::{
    RawFd, sys_accept, sys_bind, sys_close, sys_listen, sys_set_nonblocking, sys_set_reuseaddr,
    sys_socket, sys_sockname,
};

use std::net::SocketAddrV4;
use std::os::fd::AsRawFd;

use tracing::trace;

/// An owned socket descriptor.
///
/// The descriptor is closed exactly once, when the value is dropped.
/// It is neither `Clone` nor `Copy`: whoever holds the `Descriptor` is
/// the single owner of the underlying socket.
#[derive(Debug)]
pub struct Descriptor {
    fd: RawFd,
}

impl Descriptor {
    /// Takes ownership of a raw descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor not owned by anything else.
    pub(crate) unsafe fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Returns the local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddrV4> {
        sys_sockname(self.fd).map_err(|e| Error::resource("getsockname", e))
    }
}

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Descriptor {
    /// Closes the socket.
    fn drop(&mut self) {
        trace!(fd = self.fd, "closing descriptor");
        sys_close(self.fd);
    }
}

/// Creates a non-blocking listening socket bound to `address`.
///
/// When `reuse` is set, `SO_REUSEADDR` is enabled before binding. The
/// socket listens with the system's maximum backlog.
///
/// # Errors
///
/// Returns [`Error::Resource`] naming the failing call. The partially set
/// up socket is closed before returning.
pub fn create_listening_socket(address: SocketAddrV4, reuse: bool) -> Result<Descriptor> {
    let fd = sys_socket().map_err(|e| Error::resource("socket", e))?;
    let descriptor = unsafe { Descriptor::from_raw(fd) };

    if reuse {
        sys_set_reuseaddr(fd).map_err(|e| Error::resource("setsockopt(SO_REUSEADDR)", e))?;
    }

    sys_bind(fd, &address).map_err(|e| Error::resource("bind", e))?;
    sys_listen(fd).map_err(|e| Error::resource("listen", e))?;

    Ok(descriptor)
}

/// Accepts one pending connection on a listening socket.
///
/// The accepted socket is already non-blocking. When the backlog is empty
/// the error is an [`Error::Resource`] for which
/// [`Error::is_would_block`] holds; callers draining an edge-triggered
/// notification stop there.
///
/// # Errors
///
/// Returns [`Error::Resource`] naming `accept` or `fcntl`. A descriptor
/// accepted before `fcntl` failed is closed.
pub fn accept(listener: &Descriptor) -> Result<(Descriptor, SocketAddrV4)> {
    accept_fd(listener.as_raw_fd())
}

/// Accepts on a listening descriptor borrowed by raw value.
pub(crate) fn accept_fd(listener: RawFd) -> Result<(Descriptor, SocketAddrV4)> {
    let (fd, peer) = sys_accept(listener).map_err(|e| Error::resource("accept", e))?;
    let descriptor = unsafe { Descriptor::from_raw(fd) };

    set_nonblocking(&descriptor)?;

    Ok((descriptor, peer))
}

/// Puts a descriptor in non-blocking mode.
pub fn set_nonblocking(descriptor: &Descriptor) -> Result<()> {
    sys_set_nonblocking(descriptor.as_raw_fd()).map_err(|e| Error::resource("fcntl", e))
}
