use super::pool::Job;
use super::queue::BoundedQueue;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

/// A worker thread of the pool.
///
/// The worker pops jobs from the shared queue and runs each one to
/// completion before taking the next. It exits once the queue has been
/// closed and drained.
pub(crate) struct Worker {
    /// Index of the worker within its pool.
    id: usize,

    /// Queue shared with the submitter and the other workers.
    queue: Arc<BoundedQueue<Job>>,
}

impl Worker {
    pub(crate) fn new(id: usize, queue: Arc<BoundedQueue<Job>>) -> Self {
        Self { id, queue }
    }

    /// Runs the worker loop until the queue is closed and empty.
    pub(crate) fn run(self) {
        debug!(worker_id = self.id, "worker started");

        while let Some(job) = self.queue.pop() {
            self.execute(job);
        }

        debug!(worker_id = self.id, "worker exiting");
    }

    /// Runs one job, containing any panic it raises.
    ///
    /// A failing job is logged and forgotten; the worker keeps serving the
    /// queue.
    fn execute(&self, job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                worker_id = self.id,
                panic = panic_message(payload.as_ref()),
                "task panicked"
            );
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
