use super::Server;
use crate::error::Result;
use crate::reactor::{CloseCallback, ConnectionId, DataCallback};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

/// Default capacity of the worker queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default upper bound on a single multiplexer wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Default number of readiness events fetched per wait.
pub const DEFAULT_MAX_EVENTS: usize = 1024;

/// Settings the server is built from.
pub(crate) struct Config {
    pub(crate) worker_threads: usize,
    pub(crate) queue_capacity: usize,
    pub(crate) poll_timeout: Duration,
    pub(crate) max_events: usize,
    pub(crate) on_data: DataCallback,
    pub(crate) on_close: CloseCallback,
}

/// Builder for configuring and binding a [`Server`].
///
/// # Examples
///
/// ```rust,no_run
/// use netloop::ServerBuilder;
/// use std::time::Duration;
///
/// let server = ServerBuilder::new()
///     .worker_threads(4)
///     .queue_capacity(128)
///     .poll_timeout(Duration::from_millis(50))
///     .on_data(|id, bytes| println!("{id} sent {} bytes", bytes.len()))
///     .bind("0.0.0.0", 8888)
///     .unwrap();
/// ```
pub struct ServerBuilder {
    /// Number of worker threads in the pool.
    worker_threads: usize,

    /// Tasks queued before the event loop blocks on submission.
    queue_capacity: usize,

    /// Upper bound on one multiplexer wait; also bounds shutdown latency.
    poll_timeout: Duration,

    /// Readiness events fetched per wait.
    max_events: usize,

    on_data: Option<DataCallback>,
    on_close: Option<CloseCallback>,
}

impl ServerBuilder {
    /// Creates a builder with default configuration.
    ///
    /// By default, the number of worker threads is set to the number
    /// of available logical CPUs, falling back to `1` if unavailable.
    /// Received data is logged at `info` level until a data hook is set.
    pub fn new() -> Self {
        let worker_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            worker_threads,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_events: DEFAULT_MAX_EVENTS,
            on_data: None,
            on_close: None,
        }
    }

    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.worker_threads = n;
        self
    }

    /// Sets how many tasks may wait in the worker queue.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn queue_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "queue_capacity must be > 0");

        self.queue_capacity = n;
        self
    }

    /// Sets the maximum time one multiplexer wait may block.
    ///
    /// Shutdown is only noticed between waits, so this also bounds how
    /// long [`ServerHandle::shutdown`](super::ServerHandle::shutdown) takes
    /// to stop the loop.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets how many readiness events one wait can return.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_events(mut self, n: usize) -> Self {
        assert!(n > 0, "max_events must be > 0");

        self.max_events = n;
        self
    }

    /// Registers the hook receiving every flushed chunk.
    ///
    /// The hook runs on a worker thread, once per drained readiness event
    /// that produced data.
    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionId, &[u8]) + Send + Sync + 'static,
    {
        self.on_data = Some(Arc::new(f));
        self
    }

    /// Registers the hook invoked when a connection is torn down.
    ///
    /// The hook runs on the event loop thread, after the connection's
    /// descriptor has been closed.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Validates the address, binds the listening socket and builds the
    /// server.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`](crate::Error::Configuration) if `ip` is
    ///   not a valid IPv4 address; no socket is created in that case.
    /// - [`Error::Resource`](crate::Error::Resource) if a socket, epoll or
    ///   thread resource cannot be set up.
    pub fn bind(self, ip: &str, port: u16) -> Result<Server> {
        let config = Config {
            worker_threads: self.worker_threads,
            queue_capacity: self.queue_capacity,
            poll_timeout: self.poll_timeout,
            max_events: self.max_events,
            on_data: self.on_data.unwrap_or_else(|| Arc::new(log_chunk)),
            on_close: self.on_close.unwrap_or_else(|| Arc::new(|_: ConnectionId| {})),
        };

        Server::bind(config, ip, port)
    }
}

impl Default for ServerBuilder {
    /// Creates a default `ServerBuilder`.
    fn default() -> Self {
        Self::new()
    }
}

/// Data hook used when none is registered.
fn log_chunk(id: ConnectionId, bytes: &[u8]) {
    info!(
        %id,
        len = bytes.len(),
        data = %String::from_utf8_lossy(bytes),
        "message from client"
    );
}
