use thiserror::Error;

/// Validation errors for fetched lesson documents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LessonError {
    #[error("test lesson has no questions")]
    EmptyQuiz,
}
