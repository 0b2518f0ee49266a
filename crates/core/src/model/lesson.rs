use serde::{Deserialize, Serialize};

use super::ids::LessonId;
use crate::error::LessonError;

/// Kind of a lesson, as declared by the backend.
///
/// The wire spelling of `UnitTest` is `"unit test"` (with a space), matching
/// the generation pipeline's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonKind {
    Reading,
    Video,
    Test,
    #[serde(rename = "unit test")]
    UnitTest,
    Assignment,
}

impl LessonKind {
    /// Wire spelling of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonKind::Reading => "reading",
            LessonKind::Video => "video",
            LessonKind::Test => "test",
            LessonKind::UnitTest => "unit test",
            LessonKind::Assignment => "assignment",
        }
    }

    /// True for the lesson kinds backed by a question list.
    #[must_use]
    pub fn is_quiz(&self) -> bool {
        matches!(self, LessonKind::Test | LessonKind::UnitTest)
    }
}

/// Summary form of a lesson, as delivered by the lessons collection listener.
///
/// Carries only identity and flags; the full content arrives separately when
/// the lesson is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonSummary {
    pub id: LessonId,
    pub title: String,
    pub kind: LessonKind,
    pub completed: bool,
}

/// One multiple-choice question of a test lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "question")]
    pub prompt: String,
    #[serde(rename = "answer")]
    pub correct_choice: String,
    pub explanation: String,
    pub choices: Vec<String>,
}

impl Question {
    /// Whether the given choice is the correct one.
    #[must_use]
    pub fn is_correct(&self, choice: &str) -> bool {
        self.correct_choice == choice
    }
}

/// Metadata for a video lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDescriptor {
    pub title: String,
    pub url: String,
    pub video_id: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub description: String,
}

/// Type-specific payload of a fetched lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum LessonContent {
    Reading(String),
    Video(VideoDescriptor),
    Test(Vec<Question>),
    #[serde(rename = "unit test")]
    UnitTest(Vec<Question>),
    Assignment(String),
}

impl LessonContent {
    /// Kind discriminant of this payload.
    #[must_use]
    pub fn kind(&self) -> LessonKind {
        match self {
            LessonContent::Reading(_) => LessonKind::Reading,
            LessonContent::Video(_) => LessonKind::Video,
            LessonContent::Test(_) => LessonKind::Test,
            LessonContent::UnitTest(_) => LessonKind::UnitTest,
            LessonContent::Assignment(_) => LessonKind::Assignment,
        }
    }

    /// Question list for quiz lessons, `None` otherwise.
    #[must_use]
    pub fn questions(&self) -> Option<&[Question]> {
        match self {
            LessonContent::Test(questions) | LessonContent::UnitTest(questions) => {
                Some(questions)
            }
            _ => None,
        }
    }
}

/// Full form of a lesson, fetched on selection and replaced wholesale on each
/// new selection. Never cached past the current selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDocument {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(flatten)]
    pub content: LessonContent,
}

impl LessonDocument {
    /// Validate invariants the backend is expected to uphold.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::EmptyQuiz` for a test lesson without questions;
    /// such a document must be rejected at load time, not at submit time.
    pub fn validate(&self) -> Result<(), LessonError> {
        if let Some(questions) = self.content.questions() {
            if questions.is_empty() {
                return Err(LessonError::EmptyQuiz);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn kind(&self) -> LessonKind {
        self.content.kind()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
