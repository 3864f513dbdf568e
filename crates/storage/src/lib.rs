//! Storage abstraction and implementations for the mission engine.
//!
//! This crate provides the backing-store contract the engine reads from and
//! writes to, a change feed, approval/activity sinks, and an in-memory and a
//! JSON-file reference implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod change;
pub mod sinks;
pub mod memory_storage;
pub mod json_storage;

pub use trait_::{Storage, StorageError, Result};
pub use change::{ChangeEvent, ChangeFeed};
pub use sinks::{ActivitySink, ApprovalSink, TracingActivitySink, WebhookApprovalSink};
pub use memory_storage::MemoryStorage;
pub use json_storage::JsonStorage;
