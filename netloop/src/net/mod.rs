//! Address and socket helpers.
//!
//! These are the thin collaborators the server sits on: validating the
//! listening endpoint, creating the listening socket, accepting peers and
//! switching descriptors to non-blocking mode. Everything is IPv4 TCP.
//!
//! Descriptors are owned values ([`Descriptor`]) that close themselves when
//! dropped.

mod address;
mod socket;

pub use address::resolve_and_validate;
pub use socket::{Descriptor, accept, create_listening_socket, set_nonblocking};

pub(crate) use socket::accept_fd;
