use super::queue::BoundedQueue;
use super::worker::Worker;
use crate::error::{Error, Result};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

/// A unit of work executed by the pool.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool fed through a bounded queue.
///
/// The `WorkerPool` is responsible for:
/// - spawning a fixed number of worker threads,
/// - queueing submitted tasks, blocking the submitter when the queue is
///   full,
/// - isolating task panics so a failing task never takes a worker down,
/// - draining queued tasks on shutdown before joining the workers.
///
/// # Examples
///
/// ```rust
/// use netloop::runtime::WorkerPool;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let mut pool = WorkerPool::new(2, 8).unwrap();
/// let counter = Arc::new(AtomicUsize::new(0));
///
/// for _ in 0..10 {
///     let counter = counter.clone();
///     pool.submit(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     })
///     .unwrap();
/// }
///
/// pool.shutdown();
/// assert_eq!(counter.load(Ordering::SeqCst), 10);
/// ```
pub struct WorkerPool {
    /// Queue shared with every worker.
    queue: Arc<BoundedQueue<Job>>,

    /// Join handles for worker threads.
    handles: Vec<JoinHandle<()>>,

    /// Number of workers the pool was built with.
    threads: usize,
}

impl WorkerPool {
    /// Spawns `threads` workers sharing a queue of `capacity` tasks.
    ///
    /// # Panics
    ///
    /// Panics if `threads == 0` or `capacity == 0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if a worker thread cannot be spawned.
    /// Workers spawned before the failure are shut down.
    pub fn new(threads: usize, capacity: usize) -> Result<Self> {
        assert!(threads > 0, "worker_threads must be > 0");

        let queue = Arc::new(BoundedQueue::new(capacity));
        let mut pool = Self {
            queue,
            handles: Vec::with_capacity(threads),
            threads,
        };

        for id in 0..threads {
            let worker = Worker::new(id, pool.queue.clone());

            let handle = thread::Builder::new()
                .name(format!("netloop-worker-{id}"))
                .spawn(move || worker.run())
                .map_err(|e| Error::resource("spawn worker thread", e))?;

            pool.handles.push(handle);
        }

        debug!(threads, capacity, "worker pool started");
        Ok(pool)
    }

    /// Queues a task for execution.
    ///
    /// Blocks the calling thread while the queue is full. This is the
    /// engine's only backpressure: a saturated pool stalls the event loop
    /// instead of buffering without bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] once the pool has been shut down; the
    /// task is not run.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue
            .push(Box::new(task))
            .map_err(|_| Error::PoolClosed)
    }

    /// Number of tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of queued tasks before `submit` blocks.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.threads
    }

    /// Stops accepting tasks, runs everything already queued, and joins
    /// the workers.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        self.queue.close();

        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
