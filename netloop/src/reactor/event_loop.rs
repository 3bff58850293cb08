use super::channel::{Channel, Outcome, Work};
use super::poller::Multiplexer;
use crate::error::Result;
use crate::runtime::{WorkerPool, panic_message};
use crate::server::Config;
use crate::utils::{Slab, Token};

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;

use tracing::{debug, error, trace};

/// Report sent by a worker once a channel's work has run.
pub(crate) enum Completion {
    /// The work returned; it travels back to be reinstalled.
    Finished {
        token: Token,
        work: Work,
        outcome: Outcome,
    },

    /// The work panicked and was lost.
    Failed { token: Token },
}

/// Owner of the channels the loop dispatches.
///
/// The event loop only knows tokens. Whoever implements this trait owns
/// the channel arena and decides what a completed piece of work means:
/// keeping the channel, tearing it down, or registering new ones.
pub(crate) trait Handler {
    /// The arena the multiplexer's tokens point into.
    fn channels(&mut self) -> &mut Slab<Channel>;

    /// Applies a completion on the loop thread.
    ///
    /// Returns a token to dispatch again when readiness arrived while the
    /// work was running.
    fn complete(&mut self, completion: Completion, multiplexer: &mut Multiplexer) -> Option<Token>;
}

/// Single-threaded readiness loop feeding a worker pool.
///
/// One iteration waits on the multiplexer, submits the work of every ready
/// channel to the pool, then applies the completions workers have posted
/// back. Work never runs on the loop thread itself.
pub(crate) struct EventLoop {
    multiplexer: Multiplexer,
    pool: WorkerPool,

    /// Loop keeps iterating while this is set.
    running: Arc<AtomicBool>,

    poll_timeout: Duration,

    /// Workers post completions here, then wake the multiplexer.
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
}

impl EventLoop {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let multiplexer = Multiplexer::new(config.max_events)?;
        let pool = WorkerPool::new(config.worker_threads, config.queue_capacity)?;
        let (sender, receiver) = channel();

        Ok(Self {
            multiplexer,
            pool,
            running: Arc::new(AtomicBool::new(true)),
            poll_timeout: config.poll_timeout,
            sender,
            receiver,
        })
    }

    pub(crate) fn multiplexer_mut(&mut self) -> &mut Multiplexer {
        &mut self.multiplexer
    }

    /// Shared flag; clearing it stops the loop after the current wait.
    pub(crate) fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Runs until the running flag is cleared.
    ///
    /// The flag is checked once per iteration, so a wait already in
    /// progress finishes (at most `poll_timeout`) before the loop exits.
    pub(crate) fn run<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        debug!(timeout = ?self.poll_timeout, "event loop started");

        while self.running.load(Ordering::Acquire) {
            let ready = self
                .multiplexer
                .wait(handler.channels(), Some(self.poll_timeout))?;

            for token in ready {
                self.dispatch(handler.channels(), token)?;
            }

            self.complete_pending(handler, true)?;
        }

        debug!("event loop stopped");
        Ok(())
    }

    /// Submits the work of the channel behind `token`.
    ///
    /// Stale tokens are ignored. A channel whose work is already running is
    /// only marked for a second pass.
    fn dispatch(&mut self, channels: &mut Slab<Channel>, token: Token) -> Result<()> {
        let Some(channel) = channels.get_mut(token) else {
            return Ok(());
        };

        let Some((fd, mut work)) = channel.begin() else {
            trace!(fd = channel.fd(), "channel busy, deferring readiness");
            return Ok(());
        };

        let ready = channel.ready();
        trace!(
            fd,
            readable = ready.readable,
            hangup = ready.hangup,
            error = ready.error,
            "dispatching channel"
        );

        let sender = self.sender.clone();
        let waker = self.multiplexer.waker();

        self.pool.submit(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(move || {
                let outcome = work(fd);
                (work, outcome)
            }));

            let completion = match result {
                Ok((work, outcome)) => Completion::Finished {
                    token,
                    work,
                    outcome,
                },
                Err(payload) => {
                    error!(fd, panic = panic_message(payload.as_ref()), "channel task panicked");
                    Completion::Failed { token }
                }
            };

            let _ = sender.send(completion);
            waker.wake();
        })
    }

    /// Applies every completion posted so far.
    ///
    /// With `redispatch` unset, deferred readiness is dropped instead of
    /// being submitted again; used once the pool is gone.
    pub(crate) fn complete_pending<H: Handler>(
        &mut self,
        handler: &mut H,
        redispatch: bool,
    ) -> Result<()> {
        while let Ok(completion) = self.receiver.try_recv() {
            let again = handler.complete(completion, &mut self.multiplexer);

            if let (Some(token), true) = (again, redispatch) {
                self.dispatch(handler.channels(), token)?;
            }
        }

        Ok(())
    }

    /// Closes the pool and waits for every queued and running task.
    pub(crate) fn drain_workers(&mut self) {
        self.pool.shutdown();
    }
}
