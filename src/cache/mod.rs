//! # Cache Module
//!
//! Short-lived result cache used by listing endpoints. Entries expire lazily on
//! read and actively through the periodic sweep owned by the maintenance task.

pub mod store;

pub use store::{CacheStats, CacheStore};
