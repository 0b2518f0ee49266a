mod ids;
mod lesson;
mod module;
mod session;

pub use ids::{CourseId, LessonId, ModuleId, ParseIdError};
pub use lesson::{
    LessonContent, LessonDocument, LessonKind, LessonSummary, Question, VideoDescriptor,
};
pub use module::{CompletionRatio, Module};
pub use session::{ChatMessage, ChatReference, MessageOrigin, ResumePointer, SelectedLesson};
