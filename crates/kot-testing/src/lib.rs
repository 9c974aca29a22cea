//! Test support for kot controllers
//!
//! - [`MemoryStore`] - an in-memory `ObjectStore` with API-server-like semantics
//! - [`fixtures`] - the `SimpleCrd` test resource and object builders

#![deny(missing_docs)]

pub mod fixtures;
mod memory;

pub use fixtures::{namespace, simple_crd, SimpleCrd, SimpleCrdSpec, SimpleCrdStatus};
pub use memory::{MemoryStore, Op};
