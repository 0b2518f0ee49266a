use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::document::Document;
use crate::store::{DataStore, SnapshotListener, StoreError, SubscriptionHandle};

use async_trait::async_trait;

/// In-memory [`DataStore`] with the real store's delivery semantics:
/// every subscriber receives the full member set of its collection on
/// subscribe and after every write that touches the collection.
///
/// Used by tests and prototyping, mirroring the role of an in-memory
/// repository behind the storage traits.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// collection path → (document id → fields)
    collections: HashMap<String, BTreeMap<String, Value>>,
    /// collection path → active listeners
    subscribers: HashMap<String, Vec<(u64, SnapshotListener)>>,
    next_sub: u64,
}

/// Split a document path into its collection path and document id.
fn split_doc_path(path: &str) -> Result<(&str, &str), StoreError> {
    path.rsplit_once('/')
        .filter(|(collection, id)| !collection.is_empty() && !id.is_empty())
        .ok_or_else(|| StoreError::Connection(format!("invalid document path: {path}")))
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Delete a document and notify the collection's subscribers.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the document does not exist.
    pub fn delete_document(&self, path: &str) -> Result<(), StoreError> {
        let (collection, id) = split_doc_path(path)?;
        let (snapshot, listeners) = {
            let mut inner = self.lock();
            let docs = inner
                .collections
                .get_mut(collection)
                .ok_or(StoreError::NotFound)?;
            docs.remove(id).ok_or(StoreError::NotFound)?;
            (
                Self::snapshot_locked(&inner, collection),
                Self::listeners_locked(&inner, collection),
            )
        };
        for listener in listeners {
            listener(Ok(snapshot.clone()));
        }
        Ok(())
    }

    /// Deliver a transport error to the collection's current subscribers.
    ///
    /// Simulates a flaky remote connection; the subscriptions stay alive and
    /// keep receiving later snapshots.
    pub fn emit_error(&self, collection: &str, error: StoreError) {
        let listeners = {
            let inner = self.lock();
            Self::listeners_locked(&inner, collection)
        };
        for listener in listeners {
            listener(Err(error.clone()));
        }
    }

    /// Number of live subscriptions on a collection.
    #[must_use]
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.lock()
            .subscribers
            .get(collection)
            .map_or(0, Vec::len)
    }

    fn snapshot_locked(inner: &Inner, collection: &str) -> Vec<Document> {
        inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn listeners_locked(inner: &Inner, collection: &str) -> Vec<SnapshotListener> {
        inner
            .subscribers
            .get(collection)
            .map(|subs| subs.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn get_document(&self, path: &str) -> Result<Value, StoreError> {
        let (collection, id) = split_doc_path(path)?;
        let inner = self.lock();
        inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn merge_document(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        let (collection, id) = split_doc_path(path)?;
        let (snapshot, listeners) = {
            let mut inner = self.lock();
            let docs = inner.collections.entry(collection.to_string()).or_default();
            let doc = docs.entry(id.to_string()).or_insert(Value::Null);
            match (doc.as_object_mut(), fields.as_object()) {
                (Some(existing), Some(incoming)) => {
                    for (key, value) in incoming {
                        existing.insert(key.clone(), value.clone());
                    }
                }
                _ => *doc = fields,
            }
            (
                Self::snapshot_locked(&inner, collection),
                Self::listeners_locked(&inner, collection),
            )
        };
        // Notify outside the lock so listeners may subscribe/unsubscribe.
        for listener in listeners {
            listener(Ok(snapshot.clone()));
        }
        Ok(())
    }

    fn subscribe_collection(
        &self,
        path: &str,
        listener: SnapshotListener,
    ) -> SubscriptionHandle {
        let (id, snapshot) = {
            let mut inner = self.lock();
            let id = inner.next_sub;
            inner.next_sub += 1;
            inner
                .subscribers
                .entry(path.to_string())
                .or_default()
                .push((id, Arc::clone(&listener)));
            (id, Self::snapshot_locked(&inner, path))
        };
        // Initial delivery: the full current member set.
        listener(Ok(snapshot));

        let inner = Arc::clone(&self.inner);
        let collection = path.to_string();
        SubscriptionHandle::new(move || {
            let mut guard = match inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(subs) = guard.subscribers.get_mut(&collection) {
                subs.retain(|(sub_id, _)| *sub_id != id);
            }
        })
    }
}
