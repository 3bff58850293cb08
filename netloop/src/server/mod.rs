//! TCP server and connection registry.
//!
//! A [`Server`] owns the listening socket, the event loop and every live
//! connection. It is created through a [`ServerBuilder`] and driven by
//! [`Server::start`], which blocks the calling thread. A [`ServerHandle`]
//! obtained beforehand can stop it from any other thread.

mod builder;
mod registry;

pub use builder::{DEFAULT_MAX_EVENTS, DEFAULT_POLL_TIMEOUT, DEFAULT_QUEUE_CAPACITY, ServerBuilder};
pub use crate::reactor::channel::ConnectionId;

pub(crate) use builder::Config;

use registry::Registry;

use crate::error::Result;
use crate::net::{create_listening_socket, resolve_and_validate};
use crate::reactor::EventLoop;

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::info;

/// An edge-triggered TCP server.
///
/// The thread calling [`start`](Self::start) becomes the event loop
/// thread: it waits for readiness, hands socket work to the worker pool,
/// and applies the results (new connections, teardowns) to the registry.
pub struct Server {
    event_loop: EventLoop,
    registry: Registry,
    local_addr: SocketAddrV4,
    handle: ServerHandle,
}

impl Server {
    pub(crate) fn bind(config: Config, ip: &str, port: u16) -> Result<Self> {
        let address = resolve_and_validate(ip, port)?;

        let listener = create_listening_socket(address, true)?;
        let local_addr = listener.local_addr()?;

        let mut event_loop = EventLoop::new(&config)?;
        let registry = Registry::new(
            listener,
            event_loop.multiplexer_mut(),
            config.on_data,
            config.on_close,
        )?;

        let handle = ServerHandle {
            running: event_loop.running(),
            live: registry.live(),
        };

        info!(%local_addr, workers = config.worker_threads, "server listening");

        Ok(Self {
            event_loop,
            registry,
            local_addr,
            handle,
        })
    }

    /// Address the listening socket is bound to.
    ///
    /// Useful when binding to port `0`.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Returns a handle that can stop the server from another thread.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Runs the event loop on the current thread.
    ///
    /// Returns after [`ServerHandle::shutdown`] has been called and the
    /// current wait has elapsed. Before returning, every task already
    /// handed to the workers runs to completion and all remaining
    /// connections are closed, each reported through the close hook.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`](crate::Error::Resource) if waiting on the
    /// multiplexer fails. Per-connection failures never surface here.
    pub fn start(&mut self) -> Result<()> {
        let result = self.event_loop.run(&mut self.registry);

        self.handle.running.store(false, Ordering::Release);
        self.event_loop.drain_workers();

        let drained = self.event_loop.complete_pending(&mut self.registry, false);
        self.registry.close_all(self.event_loop.multiplexer_mut());

        info!(addr = %self.local_addr, "server stopped");

        result.and(drained)
    }
}

/// Cloneable control handle for a [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl ServerHandle {
    /// Asks the event loop to stop.
    ///
    /// The loop notices at its next iteration; a wait in progress is not
    /// cut short.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Returns `false` once shutdown has been requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}
