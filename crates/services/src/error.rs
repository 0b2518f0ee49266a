//! Shared error types for the services crate.

use thiserror::Error;

use course_core::LessonError;
use storage::StoreError;

/// Errors emitted by the live subscription tree.
///
/// All of these are recoverable: the tree keeps its last-known-good state
/// and reports the error through its hook, never tearing down siblings.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed document {id} in {collection}: {reason}")]
    MalformedDocument {
        collection: String,
        id: String,
        reason: String,
    },
}

/// Errors emitted while fetching or validating lesson content.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContentError {
    #[error("lesson fetch failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("malformed lesson body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Lesson(#[from] LessonError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("no lesson is selected")]
    NoSelection,
}

/// Errors emitted by the streamed chat exchange.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChatError {
    #[error("message text is empty")]
    EmptyInput,
    #[error("an exchange is already in flight")]
    Busy,
    #[error("no lesson context is available")]
    MissingReference,
    #[error("chat request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("stream aborted: {0}")]
    Stream(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Errors emitted by the assessment state machine.
///
/// These are synchronous precondition violations: the call is rejected with
/// no state change, and the session stays usable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssessmentError {
    #[error("assessment has no questions")]
    Empty,
    #[error("assessment already started")]
    AlreadyStarted,
    #[error("assessment is not in progress")]
    NotInProgress,
    #[error("assessment is not submitted")]
    NotSubmitted,
    #[error("question index {0} is out of range")]
    IndexOutOfRange(usize),
    #[error("{0} questions are unanswered")]
    Unanswered(usize),
    #[error("no quiz lesson is selected")]
    NoQuizSelected,
}

/// Errors emitted by the bearer-credential layer.
///
/// Cloneable because a shared refresh future hands the same outcome to every
/// caller that joined it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("token refresh failed: {0}")]
    Refresh(String),
}
