//! Built-in generic components for bondgraph.
//!
//! This module contains implementations that don't depend on a specific
//! storage engine and can be used by hosts, tools and tests alike.

mod memory;

pub use memory::{MemoryIter, MemoryStore, MemoryWriter, Snapshot};
