use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::document::Document;

/// Errors surfaced by store adapters.
///
/// Cloneable because one transport failure may be fanned out to several
/// collection listeners.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// What a collection listener receives: the full current member set, or a
/// transport error. Errors do not cancel the subscription; the store keeps
/// trying and delivers the next good snapshot on the same listener.
pub type SnapshotResult = Result<Vec<Document>, StoreError>;

/// Callback invoked with every snapshot until the subscription is released.
pub type SnapshotListener = Arc<dyn Fn(SnapshotResult) + Send + Sync>;

/// RAII handle for one collection subscription. Dropping it (or calling
/// [`SubscriptionHandle::unsubscribe`]) stops all further deliveries.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Explicitly release the subscription.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Contract for the hierarchical, real-time document store.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Point read of a document's fields.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if missing, or other store errors.
    async fn get_document(&self, path: &str) -> Result<Value, StoreError>;

    /// Merge the given fields into a document, creating it if absent.
    /// Last write wins; no optimistic locking.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the write cannot be applied.
    async fn merge_document(&self, path: &str, fields: Value) -> Result<(), StoreError>;

    /// Subscribe to a collection. The listener receives the full current
    /// member set immediately and again after every change (full-replace
    /// semantics, never a diff) until the handle is released.
    fn subscribe_collection(&self, path: &str, listener: SnapshotListener)
        -> SubscriptionHandle;
}
