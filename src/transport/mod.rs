//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait and the receive loop that drives a connected channel.
//!
//! Domain code must not depend on transport-specific types.

mod memory;
pub(crate) mod runner;

pub use memory::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};
