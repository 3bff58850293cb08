//! Worker pool.
//!
//! Channel work never runs on the event loop thread. It is queued into a
//! [`WorkerPool`]: a bounded queue served by a fixed set of threads.
//!
//! It is composed of:
//! - `queue`: the bounded, closable FIFO,
//! - `worker`: the per-thread loop with panic isolation,
//! - `pool`: thread lifecycle and the `submit` entry point.

mod queue;
mod worker;

pub(crate) mod pool;

pub(crate) use worker::panic_message;

pub use pool::WorkerPool;
