use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use tokio::sync::watch;

use course_core::model::{LessonKind, LessonSummary, Module, ModuleId};
use storage::{CoursePaths, DataStore, Document, SubscriptionHandle};

use crate::error::SyncError;
use crate::session_cache::SessionCache;

/// Hook invoked with non-fatal sync errors (transport hiccups, malformed
/// documents). The tree keeps running on its last-known-good state.
pub type SyncErrorHook = Arc<dyn Fn(SyncError) + Send + Sync>;

/// Immutable snapshot published after every change to the tree.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    pub modules: Vec<Module>,
    /// Tree-side resume condition (see [`SessionCache::ready_for_resume`]).
    pub ready_for_resume: bool,
}

/// Raw wire shape of a module document.
#[derive(Deserialize)]
struct ModuleDoc {
    title: String,
}

/// Raw wire shape of a lesson summary document.
#[derive(Deserialize)]
struct LessonDoc {
    title: String,
    #[serde(rename = "type")]
    kind: LessonKind,
    #[serde(default)]
    completed: bool,
}

struct TreeState {
    cache: SessionCache,
    children: HashMap<ModuleId, SubscriptionHandle>,
    publisher: watch::Sender<TreeSnapshot>,
}

impl TreeState {
    fn publish(&self) {
        self.publisher.send_replace(TreeSnapshot {
            modules: self.cache.modules().to_vec(),
            ready_for_resume: self.cache.ready_for_resume(),
        });
    }
}

/// Live view of one course's module/lesson hierarchy.
///
/// Owns the root modules subscription and one lesson subscription per
/// module, opened and closed by a reconciliation pass on every root
/// snapshot: the set of active child subscriptions always equals the set of
/// module ids in the most recent root snapshot. Dropping (or closing) the
/// tree releases every subscription — the single teardown point.
pub struct SubscriptionTree {
    state: Arc<Mutex<TreeState>>,
    root: Option<SubscriptionHandle>,
    snapshots: watch::Receiver<TreeSnapshot>,
}

fn lock(state: &Arc<Mutex<TreeState>>) -> MutexGuard<'_, TreeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report(hook: Option<&SyncErrorHook>, error: SyncError) {
    tracing::warn!(%error, "course sync error");
    if let Some(hook) = hook {
        hook(error);
    }
}

impl SubscriptionTree {
    /// Open the tree and start receiving snapshots immediately.
    #[must_use]
    pub fn open(store: Arc<dyn DataStore>, paths: CoursePaths) -> Self {
        Self::open_with_hook(store, paths, None)
    }

    /// Like [`SubscriptionTree::open`], forwarding non-fatal errors to `hook`.
    #[must_use]
    pub fn open_with_hook(
        store: Arc<dyn DataStore>,
        paths: CoursePaths,
        hook: Option<SyncErrorHook>,
    ) -> Self {
        let (publisher, snapshots) = watch::channel(TreeSnapshot::default());
        let state = Arc::new(Mutex::new(TreeState {
            cache: SessionCache::new(),
            children: HashMap::new(),
            publisher,
        }));

        let listener = {
            let state = Arc::clone(&state);
            let store = Arc::clone(&store);
            let paths = paths.clone();
            let hook = hook.clone();
            Arc::new(move |result| {
                Self::on_root_snapshot(&state, &store, &paths, hook.as_ref(), result);
            })
        };
        let root = store.subscribe_collection(&paths.modules(), listener);

        Self {
            state,
            root: Some(root),
            snapshots,
        }
    }

    /// Watch receiver for tree snapshots; the current value is always the
    /// latest published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TreeSnapshot> {
        self.snapshots.clone()
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Release every subscription.
    pub fn close(self) {
        drop(self);
    }

    fn on_root_snapshot(
        state: &Arc<Mutex<TreeState>>,
        store: &Arc<dyn DataStore>,
        paths: &CoursePaths,
        hook: Option<&SyncErrorHook>,
        result: storage::SnapshotResult,
    ) {
        let docs = match result {
            Ok(docs) => docs,
            Err(error) => {
                // Root transport error: keep the whole tree at its
                // last-known-good state.
                report(hook, SyncError::Store(error));
                return;
            }
        };

        let (modules, rejected) = parse_modules(&docs, paths);
        for error in rejected {
            report(hook, error);
        }

        // Reconcile under the lock, but subscribe/unsubscribe outside it:
        // child subscriptions deliver their first snapshot synchronously and
        // re-enter this mutex.
        let (to_close, to_open) = {
            let mut st = lock(state);
            st.cache.apply_module_snapshot(modules);
            let desired: HashSet<ModuleId> =
                st.cache.modules().iter().map(|m| m.id).collect();

            let stale: Vec<ModuleId> = st
                .children
                .keys()
                .filter(|id| !desired.contains(id))
                .copied()
                .collect();
            let to_close: Vec<SubscriptionHandle> = stale
                .into_iter()
                .filter_map(|id| st.children.remove(&id))
                .collect();
            let to_open: Vec<ModuleId> = desired
                .into_iter()
                .filter(|id| !st.children.contains_key(id))
                .collect();

            st.publish();
            (to_close, to_open)
        };

        drop(to_close);

        for module_id in to_open {
            let listener = {
                let state = Arc::clone(state);
                let hook = hook.cloned();
                Arc::new(move |result| {
                    Self::on_lesson_snapshot(&state, hook.as_ref(), module_id, result);
                })
            };
            let handle = store.subscribe_collection(&paths.lessons(module_id), listener);

            let mut st = lock(state);
            // The module may have vanished in a newer root snapshot while we
            // were subscribing; keep the invariant and let the handle drop.
            if st.cache.modules().iter().any(|m| m.id == module_id)
                && !st.children.contains_key(&module_id)
            {
                st.children.insert(module_id, handle);
            }
        }
    }

    fn on_lesson_snapshot(
        state: &Arc<Mutex<TreeState>>,
        hook: Option<&SyncErrorHook>,
        module_id: ModuleId,
        result: storage::SnapshotResult,
    ) {
        let docs = match result {
            Ok(docs) => docs,
            Err(error) => {
                // Lessons stay at their last known value until the
                // subscription self-heals.
                report(hook, SyncError::Store(error));
                return;
            }
        };

        let (lessons, rejected) = parse_lessons(&docs, module_id);
        for error in rejected {
            report(hook, error);
        }

        let mut st = lock(state);
        if st.cache.apply_lesson_snapshot(module_id, lessons) {
            st.publish();
        }
    }
}

impl Drop for SubscriptionTree {
    fn drop(&mut self) {
        self.root.take();
        // Child handles are referenced from the store's listener list via
        // this state Arc; draining them here breaks that cycle and
        // unsubscribes everything.
        let children: Vec<SubscriptionHandle> = {
            let mut st = lock(&self.state);
            st.children.drain().map(|(_, handle)| handle).collect()
        };
        drop(children);
    }
}

fn parse_modules(docs: &[Document], paths: &CoursePaths) -> (Vec<Module>, Vec<SyncError>) {
    let mut modules = Vec::with_capacity(docs.len());
    let mut rejected = Vec::new();
    for doc in docs {
        let parsed = doc
            .id
            .parse::<ModuleId>()
            .map_err(|e| e.to_string())
            .and_then(|id| {
                serde_json::from_value::<ModuleDoc>(doc.data.clone())
                    .map(|fields| Module::new(id, fields.title))
                    .map_err(|e| e.to_string())
            });
        match parsed {
            Ok(module) => modules.push(module),
            Err(reason) => rejected.push(SyncError::MalformedDocument {
                collection: paths.modules(),
                id: doc.id.clone(),
                reason,
            }),
        }
    }
    (modules, rejected)
}

fn parse_lessons(docs: &[Document], module_id: ModuleId) -> (Vec<LessonSummary>, Vec<SyncError>) {
    let mut lessons = Vec::with_capacity(docs.len());
    let mut rejected = Vec::new();
    for doc in docs {
        let parsed = doc
            .id
            .parse()
            .map_err(|e: course_core::model::ParseIdError| e.to_string())
            .and_then(|id| {
                serde_json::from_value::<LessonDoc>(doc.data.clone())
                    .map(|fields| LessonSummary {
                        id,
                        title: fields.title,
                        kind: fields.kind,
                        completed: fields.completed,
                    })
                    .map_err(|e| e.to_string())
            });
        match parsed {
            Ok(lesson) => lessons.push(lesson),
            Err(reason) => rejected.push(SyncError::MalformedDocument {
                collection: format!("modules/{module_id}/lessons"),
                id: doc.id.clone(),
                reason,
            }),
        }
    }
    (lessons, rejected)
}
