//! Session services for the learning client: live course subscriptions,
//! lesson selection and resume, the streamed assistant chat, and the quiz
//! engine, composed behind [`CourseSession`].

#![forbid(unsafe_code)]

pub mod api;
pub mod assessment;
pub mod auth;
pub mod chat;
pub mod course_session;
pub mod error;
pub mod selection;
pub mod session_cache;
pub mod subscription_tree;

pub use api::{ApiClient, ApiConfig, ChatByteStream, ChatTransport, LessonContentApi};
pub use assessment::{AssessmentEngine, AssessmentPhase, PresentedQuestion, SubmitOutcome};
pub use auth::{AuthService, TokenProvider};
pub use chat::{ChatPhase, ChatState, FALLBACK_MESSAGE, StreamingChatSession};
pub use course_session::CourseSession;
pub use error::{AssessmentError, AuthError, ChatError, ContentError, SyncError};
pub use selection::{LessonSelectionController, SelectOutcome, SelectionState};
pub use session_cache::SessionCache;
pub use subscription_tree::{SubscriptionTree, SyncErrorHook, TreeSnapshot};
