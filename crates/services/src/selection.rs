use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;

use course_core::model::{
    ChatReference, LessonDocument, LessonId, ModuleId, ResumePointer, SelectedLesson,
};
use storage::{CoursePaths, DataStore};

use crate::api::LessonContentApi;
use crate::error::ContentError;
use crate::subscription_tree::TreeSnapshot;

/// Published view of the current selection.
///
/// `document` and `loading` are mutually exclusive in the steady state:
/// during a fetch the document is cleared, and it is set again only when the
/// fetch that set `loading` is still the newest one.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    pub selected: SelectedLesson,
    pub document: Option<LessonDocument>,
    pub loading: bool,
    /// Modules whose lesson list is unfolded in the tree view. Selecting a
    /// lesson unfolds its module.
    pub expanded: BTreeSet<ModuleId>,
    /// Bumped by every select; a fetch result is published only while its
    /// epoch is still the current one, inside the same state mutation that
    /// checks it.
    epoch: u64,
}

/// How a `select` call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Content fetched and published.
    Loaded,
    /// The pair was already selected and loaded; nothing happened.
    AlreadyCurrent,
    /// A fetch for this same pair is already in flight; this call was
    /// dropped.
    DuplicateInFlight,
    /// A newer selection started while this fetch was in flight; its result
    /// was discarded.
    Superseded,
}

/// Owns the at-most-one lesson selection.
///
/// Selection is single-flight per target: re-selecting the in-flight pair is
/// a no-op, while selecting a different pair supersedes the in-flight fetch
/// (the older result is discarded when it lands). On success the last-viewed
/// pointer is written back best-effort.
pub struct LessonSelectionController {
    api: Arc<dyn LessonContentApi>,
    store: Arc<dyn DataStore>,
    paths: CoursePaths,
    publisher: watch::Sender<SelectionState>,
    states: watch::Receiver<SelectionState>,
}

impl LessonSelectionController {
    #[must_use]
    pub fn new(
        api: Arc<dyn LessonContentApi>,
        store: Arc<dyn DataStore>,
        paths: CoursePaths,
    ) -> Self {
        let (publisher, states) = watch::channel(SelectionState::default());
        Self {
            api,
            store,
            paths,
            publisher,
            states,
        }
    }

    /// Watch receiver for selection state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SelectionState> {
        self.states.clone()
    }

    /// The latest published selection state.
    #[must_use]
    pub fn state(&self) -> SelectionState {
        self.states.borrow().clone()
    }

    /// Select a lesson and fetch its full content.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` when the fetch fails or the body is malformed;
    /// the pair stays selected with no document, so the chat reference is
    /// cleared and a later re-select retries the fetch.
    pub async fn select(
        &self,
        module_id: ModuleId,
        lesson_id: LessonId,
    ) -> Result<SelectOutcome, ContentError> {
        {
            let current = self.states.borrow();
            if current.selected.matches(module_id, lesson_id) {
                if current.loading {
                    return Ok(SelectOutcome::DuplicateInFlight);
                }
                if current.document.is_some() {
                    return Ok(SelectOutcome::AlreadyCurrent);
                }
                // Selected but contentless after an earlier failure: retry.
            }
        }

        let mut epoch = 0;
        self.publisher.send_modify(|state| {
            state.epoch = state.epoch.wrapping_add(1);
            epoch = state.epoch;
            state.selected = SelectedLesson::new(module_id, lesson_id);
            state.document = None;
            state.loading = true;
            state.expanded.insert(module_id);
        });

        let result = self
            .api
            .fetch_lesson(self.paths.course_id(), module_id, lesson_id)
            .await;

        // The epoch check and the publish must be one state mutation, so a
        // select that lands in between can never have its fresh state
        // overwritten by this (now stale) result.
        let mut current = false;
        match result {
            Ok(document) => {
                self.publisher.send_modify(|state| {
                    if state.epoch == epoch {
                        state.document = Some(document);
                        state.loading = false;
                        current = true;
                    }
                });
                if !current {
                    return Ok(SelectOutcome::Superseded);
                }
                self.record_pointer(module_id, lesson_id).await;
                Ok(SelectOutcome::Loaded)
            }
            Err(err) => {
                self.publisher.send_modify(|state| {
                    if state.epoch == epoch {
                        state.document = None;
                        state.loading = false;
                        current = true;
                    }
                });
                if !current {
                    return Ok(SelectOutcome::Superseded);
                }
                Err(err)
            }
        }
    }

    /// Restore the last-viewed lesson, or fall back to the first lesson of
    /// the first non-empty module.
    ///
    /// Runs only once the tree is ready and nothing has been selected yet;
    /// returns `None` when either condition fails. A pointer that no longer
    /// exists in the tree falls back rather than erroring.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` when the content fetch for the chosen lesson
    /// fails.
    pub async fn resume(
        &self,
        snapshot: &TreeSnapshot,
    ) -> Result<Option<SelectOutcome>, ContentError> {
        if !snapshot.ready_for_resume || !self.states.borrow().selected.is_none() {
            return Ok(None);
        }

        let target = match self.read_pointer().await {
            Some(target) if contains(snapshot, target) => Some(target),
            _ => first_lesson(snapshot),
        };
        let Some((module_id, lesson_id)) = target else {
            return Ok(None);
        };
        self.select(module_id, lesson_id).await.map(Some)
    }

    /// Fold or unfold a module's lesson list.
    pub fn toggle_module(&self, module_id: ModuleId) {
        self.publisher.send_modify(|state| {
            if !state.expanded.remove(&module_id) {
                state.expanded.insert(module_id);
            }
        });
    }

    /// Lesson context for the assistant, present only while a fetched
    /// document is on screen.
    #[must_use]
    pub fn chat_reference(&self) -> Option<ChatReference> {
        let state = self.states.borrow();
        let (module_id, lesson_id) = state.selected.module_id().zip(state.selected.lesson_id())?;
        let document = state.document.as_ref()?;
        Some(ChatReference {
            course_id: self.paths.course_id().clone(),
            module_id,
            lesson_id,
            lesson_title: document.title.clone(),
            lesson_kind: document.kind(),
        })
    }

    /// Report the current lesson as completed.
    ///
    /// The authoritative flag comes back through the lesson subscription; the
    /// local document is updated eagerly so the view does not wait for the
    /// round trip.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::NoSelection` without a loaded selection, or the
    /// transport error when the mutation cannot be delivered.
    pub async fn mark_complete(&self) -> Result<(), ContentError> {
        let (module_id, lesson_id) = {
            let state = self.states.borrow();
            match state.selected.module_id().zip(state.selected.lesson_id()) {
                Some(pair) if state.document.is_some() => pair,
                _ => return Err(ContentError::NoSelection),
            }
        };
        self.api
            .complete_lesson(self.paths.course_id(), module_id, lesson_id)
            .await?;
        self.publisher.send_modify(|state| {
            if state.selected.matches(module_id, lesson_id) {
                if let Some(document) = state.document.as_mut() {
                    document.completed = true;
                }
            }
        });
        Ok(())
    }

    async fn read_pointer(&self) -> Option<(ModuleId, LessonId)> {
        let value = match self.store.get_document(&self.paths.course_doc()).await {
            Ok(value) => value,
            Err(storage::StoreError::NotFound) => return None,
            Err(err) => {
                tracing::warn!(%err, "could not read resume pointer");
                return None;
            }
        };
        match serde_json::from_value::<ResumePointer>(value) {
            Ok(pointer) => pointer.target(),
            Err(err) => {
                tracing::warn!(%err, "malformed resume pointer");
                None
            }
        }
    }

    /// Best-effort: a failed pointer write never fails the selection.
    async fn record_pointer(&self, module_id: ModuleId, lesson_id: LessonId) {
        let fields = json!({
            "lastModuleId": module_id.to_string(),
            "lastLessonId": lesson_id.to_string(),
        });
        if let Err(err) = self
            .store
            .merge_document(&self.paths.course_doc(), fields)
            .await
        {
            tracing::warn!(%err, "could not record resume pointer");
        }
    }
}

fn contains(snapshot: &TreeSnapshot, (module_id, lesson_id): (ModuleId, LessonId)) -> bool {
    snapshot
        .modules
        .iter()
        .find(|m| m.id == module_id)
        .is_some_and(|m| m.lessons.iter().any(|l| l.id == lesson_id))
}

fn first_lesson(snapshot: &TreeSnapshot) -> Option<(ModuleId, LessonId)> {
    snapshot
        .modules
        .iter()
        .find(|m| !m.lessons.is_empty())
        .map(|m| (m.id, m.lessons[0].id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use course_core::model::{CourseId, LessonContent, LessonKind, LessonSummary, Module};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use storage::InMemoryStore;
    use tokio::sync::Notify;

    struct StubApi {
        fetches: AtomicUsize,
        completions: AtomicUsize,
        /// Per-lesson artificial latency, keyed by lesson id.
        slow_lesson: Option<(u64, Duration)>,
        fail_lesson: Option<u64>,
        /// Per-lesson fetch gates; a gated fetch waits until notified.
        gates: HashMap<u64, Arc<Notify>>,
    }

    impl StubApi {
        fn new() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                completions: AtomicUsize::new(0),
                slow_lesson: None,
                fail_lesson: None,
                gates: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl LessonContentApi for StubApi {
        async fn fetch_lesson(
            &self,
            _course_id: &CourseId,
            _module_id: ModuleId,
            lesson_id: LessonId,
        ) -> Result<LessonDocument, ContentError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = self.gates.get(&lesson_id.value()) {
                gate.notified().await;
            }
            if let Some((slow, delay)) = self.slow_lesson {
                if lesson_id.value() == slow {
                    tokio::time::sleep(delay).await;
                }
            }
            if self.fail_lesson == Some(lesson_id.value()) {
                return Err(ContentError::NoSelection);
            }
            Ok(LessonDocument {
                title: format!("Lesson {lesson_id}"),
                completed: false,
                content: LessonContent::Reading(format!("body {lesson_id}")),
            })
        }

        async fn complete_lesson(
            &self,
            _course_id: &CourseId,
            _module_id: ModuleId,
            _lesson_id: LessonId,
        ) -> Result<(), ContentError> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller_with(api: StubApi) -> (Arc<LessonSelectionController>, Arc<StubApi>, Arc<InMemoryStore>) {
        let api = Arc::new(api);
        let store = Arc::new(InMemoryStore::new());
        let controller = Arc::new(LessonSelectionController::new(
            Arc::clone(&api) as Arc<dyn LessonContentApi>,
            Arc::clone(&store) as Arc<dyn DataStore>,
            CoursePaths::new("u1", CourseId::new("c1")),
        ));
        (controller, api, store)
    }

    fn snapshot_with_lessons(pairs: &[(u64, &[u64])]) -> TreeSnapshot {
        let modules = pairs
            .iter()
            .map(|(module_id, lesson_ids)| {
                let mut module = Module::new(ModuleId::new(*module_id), format!("M{module_id}"));
                module.lessons = lesson_ids
                    .iter()
                    .map(|id| LessonSummary {
                        id: LessonId::new(*id),
                        title: format!("L{id}"),
                        kind: LessonKind::Reading,
                        completed: false,
                    })
                    .collect();
                module
            })
            .collect();
        TreeSnapshot {
            modules,
            ready_for_resume: true,
        }
    }

    #[tokio::test]
    async fn select_loads_and_records_pointer() {
        let (controller, _api, store) = controller_with(StubApi::new());
        let outcome = controller
            .select(ModuleId::new(1), LessonId::new(2))
            .await
            .unwrap();
        assert_eq!(outcome, SelectOutcome::Loaded);

        let state = controller.state();
        assert!(state.selected.matches(ModuleId::new(1), LessonId::new(2)));
        assert_eq!(state.document.as_ref().unwrap().title, "Lesson 2");
        assert!(state.expanded.contains(&ModuleId::new(1)));

        let doc = store.get_document("users/u1/courses/c1").await.unwrap();
        assert_eq!(doc["lastModuleId"], "1");
        assert_eq!(doc["lastLessonId"], "2");
    }

    #[tokio::test]
    async fn reselecting_current_lesson_is_a_noop() {
        let (controller, api, _store) = controller_with(StubApi::new());
        controller
            .select(ModuleId::new(1), LessonId::new(1))
            .await
            .unwrap();
        let outcome = controller
            .select(ModuleId::new(1), LessonId::new(1))
            .await
            .unwrap();
        assert_eq!(outcome, SelectOutcome::AlreadyCurrent);
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_in_flight_select_is_dropped() {
        let mut api = StubApi::new();
        api.slow_lesson = Some((1, Duration::from_millis(50)));
        let (controller, api, _store) = controller_with(api);

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.select(ModuleId::new(1), LessonId::new(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = controller
            .select(ModuleId::new(1), LessonId::new(1))
            .await
            .unwrap();
        assert_eq!(second, SelectOutcome::DuplicateInFlight);
        assert_eq!(first.await.unwrap().unwrap(), SelectOutcome::Loaded);
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn newer_selection_supersedes_a_slow_fetch() {
        let mut api = StubApi::new();
        api.slow_lesson = Some((1, Duration::from_millis(50)));
        let (controller, _api, _store) = controller_with(api);

        let slow = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.select(ModuleId::new(1), LessonId::new(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let fast = controller
            .select(ModuleId::new(1), LessonId::new(2))
            .await
            .unwrap();
        assert_eq!(fast, SelectOutcome::Loaded);
        assert_eq!(slow.await.unwrap().unwrap(), SelectOutcome::Superseded);

        // The slow result must not clobber the newer one.
        let state = controller.state();
        assert!(state.selected.matches(ModuleId::new(1), LessonId::new(2)));
        assert_eq!(state.document.as_ref().unwrap().title, "Lesson 2");
    }

    #[tokio::test]
    async fn stale_result_never_disturbs_a_fetch_still_in_flight() {
        let mut api = StubApi::new();
        let gate_a = Arc::new(Notify::new());
        let gate_b = Arc::new(Notify::new());
        api.gates.insert(1, Arc::clone(&gate_a));
        api.gates.insert(2, Arc::clone(&gate_b));
        let (controller, _api, _store) = controller_with(api);

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.select(ModuleId::new(1), LessonId::new(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.select(ModuleId::new(1), LessonId::new(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The older fetch resolves while the newer one is still open; its
        // result must not flip the published state out of loading.
        gate_a.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), SelectOutcome::Superseded);

        let state = controller.state();
        assert!(state.selected.matches(ModuleId::new(1), LessonId::new(2)));
        assert!(state.loading);
        assert!(state.document.is_none());

        gate_b.notify_one();
        assert_eq!(second.await.unwrap().unwrap(), SelectOutcome::Loaded);
        let state = controller.state();
        assert!(!state.loading);
        assert_eq!(state.document.unwrap().title, "Lesson 2");
    }

    #[tokio::test]
    async fn fetch_error_leaves_selection_without_reference() {
        let mut api = StubApi::new();
        api.fail_lesson = Some(1);
        let (controller, _api, store) = controller_with(api);

        let err = controller
            .select(ModuleId::new(1), LessonId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::NoSelection));

        let state = controller.state();
        assert!(state.selected.matches(ModuleId::new(1), LessonId::new(1)));
        assert!(state.document.is_none());
        assert!(!state.loading);
        assert!(controller.chat_reference().is_none());

        // No pointer was written for the failed selection.
        assert!(store.get_document("users/u1/courses/c1").await.is_err());
    }

    #[tokio::test]
    async fn resume_prefers_a_valid_pointer() {
        let (controller, _api, store) = controller_with(StubApi::new());
        store
            .merge_document(
                "users/u1/courses/c1",
                json!({"lastModuleId": "2", "lastLessonId": "5"}),
            )
            .await
            .unwrap();

        let snapshot = snapshot_with_lessons(&[(1, &[1, 2]), (2, &[5])]);
        let outcome = controller.resume(&snapshot).await.unwrap();
        assert_eq!(outcome, Some(SelectOutcome::Loaded));
        assert!(controller
            .state()
            .selected
            .matches(ModuleId::new(2), LessonId::new(5)));
    }

    #[tokio::test]
    async fn resume_falls_back_when_pointer_is_stale() {
        let (controller, _api, store) = controller_with(StubApi::new());
        store
            .merge_document(
                "users/u1/courses/c1",
                json!({"lastModuleId": "9", "lastLessonId": "9"}),
            )
            .await
            .unwrap();

        let snapshot = snapshot_with_lessons(&[(1, &[3])]);
        controller.resume(&snapshot).await.unwrap();
        assert!(controller
            .state()
            .selected
            .matches(ModuleId::new(1), LessonId::new(3)));
    }

    #[tokio::test]
    async fn resume_skips_empty_leading_modules() {
        let (controller, _api, _store) = controller_with(StubApi::new());
        let snapshot = snapshot_with_lessons(&[(1, &[]), (2, &[7])]);
        controller.resume(&snapshot).await.unwrap();
        assert!(controller
            .state()
            .selected
            .matches(ModuleId::new(2), LessonId::new(7)));
    }

    #[tokio::test]
    async fn resume_never_overrides_an_existing_selection() {
        let (controller, api, _store) = controller_with(StubApi::new());
        controller
            .select(ModuleId::new(1), LessonId::new(1))
            .await
            .unwrap();

        let snapshot = snapshot_with_lessons(&[(1, &[1, 2])]);
        let outcome = controller.resume(&snapshot).await.unwrap();
        assert_eq!(outcome, None);
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mark_complete_requires_a_loaded_selection() {
        let (controller, _api, _store) = controller_with(StubApi::new());
        assert!(matches!(
            controller.mark_complete().await,
            Err(ContentError::NoSelection)
        ));

        controller
            .select(ModuleId::new(1), LessonId::new(1))
            .await
            .unwrap();
        controller.mark_complete().await.unwrap();
        assert!(controller.state().document.unwrap().completed);
    }

    #[tokio::test]
    async fn toggle_module_folds_and_unfolds() {
        let (controller, _api, _store) = controller_with(StubApi::new());
        controller.toggle_module(ModuleId::new(3));
        assert!(controller.state().expanded.contains(&ModuleId::new(3)));
        controller.toggle_module(ModuleId::new(3));
        assert!(!controller.state().expanded.contains(&ModuleId::new(3)));
    }
}
