#![forbid(unsafe_code)]

//! Remote-store abstraction for the course session core.
//!
//! Models the hierarchical, real-time document/collection store the session
//! core synchronizes against: point reads, point merge-writes, and live
//! collection subscriptions that deliver the full current member set on
//! every change. [`memory::InMemoryStore`] provides the same semantics
//! in-process for tests and prototyping.

pub mod document;
pub mod memory;
pub mod store;

pub use document::{CoursePaths, Document};
pub use memory::InMemoryStore;
pub use store::{DataStore, SnapshotListener, SnapshotResult, StoreError, SubscriptionHandle};
