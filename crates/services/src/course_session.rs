use std::sync::{Arc, Mutex, PoisonError};

use course_core::model::CompletionRatio;
use course_core::model::{LessonId, ModuleId};
use storage::{CoursePaths, DataStore};

use crate::api::{ChatTransport, LessonContentApi};
use crate::assessment::{AssessmentEngine, SubmitOutcome};
use crate::chat::StreamingChatSession;
use crate::error::{AssessmentError, ChatError, ContentError};
use crate::selection::{LessonSelectionController, SelectOutcome};
use crate::subscription_tree::{SubscriptionTree, SyncErrorHook, TreeSnapshot};

/// One learner's live course session: the subscription tree, the lesson
/// selection, the lesson-scoped chat, and the current quiz run, behind a
/// single open/close pair.
///
/// The chat transcript and the quiz engine are scoped to the selected
/// lesson; both are rebuilt whenever the selection changes.
pub struct CourseSession {
    tree: SubscriptionTree,
    selection: LessonSelectionController,
    chat: StreamingChatSession,
    assessment: Mutex<Option<AssessmentEngine>>,
}

impl CourseSession {
    #[must_use]
    pub fn open(
        store: Arc<dyn DataStore>,
        content: Arc<dyn LessonContentApi>,
        transport: Arc<dyn ChatTransport>,
        paths: CoursePaths,
    ) -> Self {
        Self::open_with_hook(store, content, transport, paths, None)
    }

    /// Like [`CourseSession::open`], forwarding non-fatal subscription errors
    /// to `hook`.
    #[must_use]
    pub fn open_with_hook(
        store: Arc<dyn DataStore>,
        content: Arc<dyn LessonContentApi>,
        transport: Arc<dyn ChatTransport>,
        paths: CoursePaths,
        hook: Option<SyncErrorHook>,
    ) -> Self {
        let tree = SubscriptionTree::open_with_hook(Arc::clone(&store), paths.clone(), hook);
        let selection = LessonSelectionController::new(content, store, paths);
        Self {
            tree,
            selection,
            chat: StreamingChatSession::new(transport),
            assessment: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn tree(&self) -> &SubscriptionTree {
        &self.tree
    }

    #[must_use]
    pub fn selection(&self) -> &LessonSelectionController {
        &self.selection
    }

    #[must_use]
    pub fn chat(&self) -> &StreamingChatSession {
        &self.chat
    }

    /// Latest tree snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        self.tree.snapshot()
    }

    /// Course-level completion counts from the latest snapshot.
    #[must_use]
    pub fn completion(&self) -> CompletionRatio {
        CompletionRatio::across(&self.tree.snapshot().modules)
    }

    /// Select a lesson, fetch its content, and rescope chat and quiz state
    /// to it.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` when the fetch fails; the previous lesson's
    /// chat and quiz state are still discarded, since the selection has
    /// moved.
    pub async fn select_lesson(
        &self,
        module_id: ModuleId,
        lesson_id: LessonId,
    ) -> Result<SelectOutcome, ContentError> {
        let result = self.selection.select(module_id, lesson_id).await;
        match &result {
            Ok(SelectOutcome::Loaded) | Err(_) => self.rescope(),
            Ok(_) => {}
        }
        result
    }

    /// Restore the last-viewed lesson once the tree is ready, falling back
    /// to the first lesson. `None` when the tree is not ready yet or a
    /// selection already exists.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` when the content fetch fails.
    pub async fn resume_if_ready(&self) -> Result<Option<SelectOutcome>, ContentError> {
        let result = self.selection.resume(&self.tree.snapshot()).await;
        if matches!(result, Ok(Some(SelectOutcome::Loaded))) {
            self.rescope();
        }
        result
    }

    /// Report the selected lesson as completed.
    ///
    /// # Errors
    ///
    /// See [`LessonSelectionController::mark_complete`].
    pub async fn mark_complete(&self) -> Result<(), ContentError> {
        self.selection.mark_complete().await
    }

    /// Run one chat exchange against the selected lesson.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::MissingReference` unless a fetched lesson is on
    /// screen; otherwise see [`StreamingChatSession::send`].
    pub async fn send_chat(&self, text: &str) -> Result<(), ChatError> {
        let reference = self
            .selection
            .chat_reference()
            .ok_or(ChatError::MissingReference)?;
        self.chat.send(text, &reference).await
    }

    /// Run `f` against the selected lesson's quiz engine.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError::NoQuizSelected` when the selected lesson is
    /// not a quiz.
    pub fn with_assessment<R>(
        &self,
        f: impl FnOnce(&mut AssessmentEngine) -> R,
    ) -> Result<R, AssessmentError> {
        let mut slot = self
            .assessment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let engine = slot.as_mut().ok_or(AssessmentError::NoQuizSelected)?;
        Ok(f(engine))
    }

    /// Begin the quiz run for the selected lesson.
    ///
    /// # Errors
    ///
    /// `NoQuizSelected` without a quiz lesson, `AlreadyStarted` for a
    /// running one.
    pub fn start_assessment(&self) -> Result<(), AssessmentError> {
        self.with_assessment(AssessmentEngine::start)?
    }

    /// Record an answer in the running quiz.
    ///
    /// # Errors
    ///
    /// See [`AssessmentEngine::answer`].
    pub fn answer_assessment(&self, question: usize, choice: usize) -> Result<(), AssessmentError> {
        self.with_assessment(|engine| engine.answer(question, choice))?
    }

    /// Grade the running quiz; a passing score reports the lesson completed.
    ///
    /// The completion write is best-effort: the graded outcome stands even
    /// when the mutation cannot be delivered, and a passing retake reports
    /// again.
    ///
    /// # Errors
    ///
    /// See [`AssessmentEngine::submit`].
    pub async fn submit_assessment(&self) -> Result<SubmitOutcome, AssessmentError> {
        let outcome = self.with_assessment(AssessmentEngine::submit)??;
        if outcome.passed() {
            if let Err(err) = self.selection.mark_complete().await {
                tracing::warn!(%err, "could not record quiz completion");
            }
        }
        Ok(outcome)
    }

    /// Discard the graded quiz run and start over.
    ///
    /// # Errors
    ///
    /// See [`AssessmentEngine::retake`].
    pub fn retake_assessment(&self) -> Result<(), AssessmentError> {
        self.with_assessment(AssessmentEngine::retake)?
    }

    /// Release every subscription. The single teardown point.
    pub fn close(self) {
        self.tree.close();
    }

    /// Rebuild lesson-scoped state after the selection changed: the chat
    /// transcript is dropped, and the quiz engine is rebuilt from the new
    /// document's questions (or cleared for non-quiz lessons).
    fn rescope(&self) {
        self.chat.reset();
        let engine = self
            .selection
            .state()
            .document
            .as_ref()
            .and_then(|document| document.content.questions())
            .and_then(|questions| AssessmentEngine::new(questions.to_vec()).ok());
        *self
            .assessment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = engine;
    }
}
