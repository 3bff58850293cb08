//! # netloop
//!
//! **netloop** is a small reactor-pattern TCP engine built directly on Linux
//! `epoll`. A single loop thread waits for edge-triggered readiness and hands
//! the work for each ready socket to a fixed pool of worker threads through a
//! bounded queue.
//!
//! The engine is organised around a few pieces:
//!
//! - a **multiplexer** wrapping `epoll`, which tracks which descriptors are
//!   registered and reports ready channels,
//! - **channels**, the registered units of interest (one accept channel for
//!   the listening socket, one connection channel per peer),
//! - an **event loop** driving the multiplexer and feeding a bounded
//!   **worker pool**,
//! - a **server** acting as the connection registry.
//!
//! Bytes read from a connection are accumulated until the socket would block
//! and then delivered to the user in a single chunk. There is no framing:
//! chunk boundaries follow readiness, not message boundaries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netloop::ServerBuilder;
//!
//! fn main() -> netloop::Result<()> {
//!     let mut server = ServerBuilder::new()
//!         .worker_threads(2)
//!         .on_data(|id, bytes| println!("{id}: {}", String::from_utf8_lossy(bytes)))
//!         .on_close(|id| println!("{id} closed"))
//!         .bind("127.0.0.1", 5000)?;
//!
//!     server.start()
//! }
//! ```
//!
//! ## Modules
//!
//! - [`net`]: address validation and raw socket helpers
//! - [`runtime`]: the bounded worker pool

mod error;
mod reactor;
mod server;
mod utils;

pub mod net;
pub mod runtime;

pub use error::{Error, Result};
pub use server::{
    ConnectionId, DEFAULT_MAX_EVENTS, DEFAULT_POLL_TIMEOUT, DEFAULT_QUEUE_CAPACITY, Server,
    ServerBuilder, ServerHandle,
};
