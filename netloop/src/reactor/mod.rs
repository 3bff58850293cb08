//! Reactor core.
//!
//! This module holds the readiness side of the engine:
//! - the `epoll` multiplexer and its masks,
//! - the channels registered with it,
//! - the event loop turning readiness into worker tasks,
//! - the per-connection buffer and drain protocol.
//!
//! None of it is public; the [`Server`](crate::Server) is the entry point.

mod buffer;
mod drain;

pub(crate) mod channel;
pub(crate) mod event_loop;
pub(crate) mod poller;

pub(crate) use channel::{
    Channel, ChannelKind, CloseCallback, CloseReason, ConnectionId, DataCallback, Outcome,
};
pub(crate) use event_loop::{Completion, EventLoop};
pub(crate) use poller::Multiplexer;
