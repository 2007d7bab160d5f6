//! Key/value storage boundary.
//!
//! The broker persists everything through a [`Storer`]: a raw string store
//! whose only consistency guarantee is single-key compare-and-swap via
//! [`LockToken`]s. [`JsonStorer`] layers typed JSON reads and writes on top.

pub mod in_memory;
pub mod json;
pub mod r#trait;

pub use in_memory::InMemoryStorer;
pub use json::JsonStorer;
pub use r#trait::{LockToken, StoreError, Storer};
