//! Platform I/O poller.
//!
//! This module wraps the operating system's readiness facility. The only
//! backend is Linux `epoll`, used in edge-triggered mode:
//! - [`epoll`]: the [`Multiplexer`] itself,
//! - [`common`]: interest/readiness masks and the wake-up handle,
//! - [`unix`]: raw socket system calls.

pub(crate) mod common;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) use epoll::Multiplexer;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
