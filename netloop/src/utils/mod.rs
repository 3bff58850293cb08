//! Internal data structures.
//!
//! This module exposes the generational [`Slab`] used by the server to own
//! its channels, and the [`Token`] handed to the multiplexer in their place.

mod slab;

pub(crate) use slab::{Slab, Token};
