//! Error types surfaced by the engine.
//!
//! Only failures that end an operation for the caller appear here. Expected
//! I/O signals (would-block, interrupted reads, orderly peer close) are
//! handled inside the drain protocol and never reach this type.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the public API.
#[derive(Debug, Error)]
pub enum Error {
    /// The listening address could not be parsed as an IPv4 endpoint.
    ///
    /// Raised before any socket is created.
    #[error("invalid listening address `{ip}:{port}`")]
    Configuration { ip: String, port: u16 },

    /// A socket or multiplexer system call failed.
    ///
    /// `op` names the failing call. The OS error code is kept in `source`.
    #[error("{op} failed: {source}")]
    Resource {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A task was submitted to a worker pool that has been shut down.
    #[error("worker pool is shut down")]
    PoolClosed,
}

impl Error {
    pub(crate) fn resource(op: &'static str, source: io::Error) -> Self {
        Error::Resource { op, source }
    }

    /// Returns the raw OS error code of a [`Error::Resource`] failure.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Error::Resource { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Returns `true` when a non-blocking call found nothing to do.
    pub fn is_would_block(&self) -> bool {
        self.io_kind() == Some(io::ErrorKind::WouldBlock)
    }

    pub(crate) fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Resource { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    /// Returns `true` for address validation failures.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }
}
