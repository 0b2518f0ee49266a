//! End-to-end session flow over the in-memory store: subscribe, resume,
//! chat, pass a quiz, observe completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use course_core::model::{
    ChatMessage, ChatReference, CourseId, LessonContent, LessonDocument, LessonId, ModuleId,
    Question,
};
use services::{
    ChatByteStream, ChatError, ChatTransport, ContentError, CourseSession, LessonContentApi,
    SelectOutcome,
};
use storage::{CoursePaths, DataStore, InMemoryStore};

struct StubBackend {
    completions: AtomicUsize,
}

impl StubBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            completions: AtomicUsize::new(0),
        })
    }

    fn questions() -> Vec<Question> {
        (0..2)
            .map(|n| Question {
                prompt: format!("Q{n}?"),
                correct_choice: format!("right{n}"),
                explanation: format!("Because {n}."),
                choices: vec![format!("right{n}"), format!("wrong{n}")],
            })
            .collect()
    }
}

#[async_trait]
impl LessonContentApi for StubBackend {
    async fn fetch_lesson(
        &self,
        _course_id: &CourseId,
        _module_id: ModuleId,
        lesson_id: LessonId,
    ) -> Result<LessonDocument, ContentError> {
        let content = if lesson_id == LessonId::new(2) {
            LessonContent::Test(Self::questions())
        } else {
            LessonContent::Reading(format!("body {lesson_id}"))
        };
        Ok(LessonDocument {
            title: format!("Lesson {lesson_id}"),
            completed: false,
            content,
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

struct ScriptedChat;

#[async_trait]
impl ChatTransport for ScriptedChat {
    async fn open_exchange(
        &self,
        _transcript: &[ChatMessage],
        _reference: &ChatReference,
    ) -> Result<ChatByteStream, ChatError> {
        Ok(Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"Hi ")),
            Ok(Bytes::from_static(b"there")),
        ])))
    }
}

fn paths() -> CoursePaths {
    CoursePaths::new("u1", CourseId::new("rust-101"))
}

async fn seed_course(store: &InMemoryStore) {
    store
        .merge_document("users/u1/courses/rust-101/modules/1", json!({"title": "Basics"}))
        .await
        .unwrap();
    store
        .merge_document(
            "users/u1/courses/rust-101/modules/1/lessons/1",
            json!({"title": "Intro", "type": "reading", "completed": false}),
        )
        .await
        .unwrap();
    store
        .merge_document(
            "users/u1/courses/rust-101/modules/1/lessons/2",
            json!({"title": "Checkpoint", "type": "test", "completed": false}),
        )
        .await
        .unwrap();
}

fn open_session(store: Arc<InMemoryStore>, backend: Arc<StubBackend>) -> CourseSession {
    CourseSession::open(
        store as Arc<dyn DataStore>,
        backend as Arc<dyn LessonContentApi>,
        Arc::new(ScriptedChat),
        paths(),
    )
}

#[tokio::test]
async fn session_resumes_to_the_first_lesson() {
    let store = Arc::new(InMemoryStore::new());
    seed_course(&store).await;

    let session = open_session(Arc::clone(&store), StubBackend::new());
    assert!(session.snapshot().ready_for_resume);

    let outcome = session.resume_if_ready().await.unwrap();
    assert_eq!(outcome, Some(SelectOutcome::Loaded));
    let state = session.selection().state();
    assert!(state.selected.matches(ModuleId::new(1), LessonId::new(1)));
    assert_eq!(state.document.unwrap().title, "Lesson 1");

    // The selection recorded a pointer for the next visit.
    let doc = store.get_document("users/u1/courses/rust-101").await.unwrap();
    assert_eq!(doc["lastLessonId"], "1");
    session.close();
}

#[tokio::test]
async fn session_resumes_to_the_recorded_pointer() {
    let store = Arc::new(InMemoryStore::new());
    seed_course(&store).await;
    store
        .merge_document(
            "users/u1/courses/rust-101",
            json!({"lastModuleId": "1", "lastLessonId": "2"}),
        )
        .await
        .unwrap();

    let session = open_session(Arc::clone(&store), StubBackend::new());
    session.resume_if_ready().await.unwrap();
    assert!(session
        .selection()
        .state()
        .selected
        .matches(ModuleId::new(1), LessonId::new(2)));

    // The pointer targeted the quiz lesson, so the quiz engine is scoped.
    session.start_assessment().unwrap();
    session.close();
}

#[tokio::test]
async fn chat_streams_against_the_selected_lesson() {
    let store = Arc::new(InMemoryStore::new());
    seed_course(&store).await;
    let session = open_session(store, StubBackend::new());

    // No lesson on screen yet: no reference to answer against.
    assert!(matches!(
        session.send_chat("hello?").await,
        Err(ChatError::MissingReference)
    ));

    session
        .select_lesson(ModuleId::new(1), LessonId::new(1))
        .await
        .unwrap();
    session.send_chat("hello?").await.unwrap();

    let transcript = session.chat().state().transcript;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].text, "Hi there");

    // Changing lessons drops the transcript.
    session
        .select_lesson(ModuleId::new(1), LessonId::new(2))
        .await
        .unwrap();
    assert!(session.chat().state().transcript.is_empty());
    session.close();
}

#[tokio::test]
async fn passing_the_quiz_reports_completion() {
    let store = Arc::new(InMemoryStore::new());
    seed_course(&store).await;
    let backend = StubBackend::new();
    let session = open_session(Arc::clone(&store), Arc::clone(&backend));

    session
        .select_lesson(ModuleId::new(1), LessonId::new(2))
        .await
        .unwrap();
    session.start_assessment().unwrap();

    let correct: Vec<usize> = session
        .with_assessment(|engine| {
            engine
                .questions()
                .iter()
                .map(|p| {
                    p.choices
                        .iter()
                        .position(|c| p.question.is_correct(c))
                        .unwrap()
                })
                .collect()
        })
        .unwrap();
    for (question, choice) in correct.into_iter().enumerate() {
        session.answer_assessment(question, choice).unwrap();
    }

    let outcome = session.submit_assessment().await.unwrap();
    assert!(outcome.passed());
    assert_eq!(backend.completions.load(Ordering::SeqCst), 1);
    assert!(session.selection().state().document.unwrap().completed);

    // The backend's write comes back through the lesson subscription.
    store
        .merge_document(
            "users/u1/courses/rust-101/modules/1/lessons/2",
            json!({"completed": true}),
        )
        .await
        .unwrap();
    let ratio = session.completion();
    assert_eq!((ratio.completed, ratio.total), (1, 2));
    session.close();
}

#[tokio::test]
async fn quiz_operations_require_a_quiz_lesson() {
    let store = Arc::new(InMemoryStore::new());
    seed_course(&store).await;
    let session = open_session(store, StubBackend::new());

    session
        .select_lesson(ModuleId::new(1), LessonId::new(1))
        .await
        .unwrap();
    assert!(session.start_assessment().is_err());
    assert!(session.with_assessment(|engine| engine.phase()).is_err());
    session.close();
}
