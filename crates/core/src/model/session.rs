use serde::{Deserialize, Serialize};

use super::ids::{CourseId, LessonId, ModuleId};
use super::lesson::LessonKind;

/// The at-most-one active lesson selection.
///
/// Stored as a single pair so a lesson id can never exist without its owning
/// module id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectedLesson {
    target: Option<(ModuleId, LessonId)>,
}

impl SelectedLesson {
    /// No selection.
    #[must_use]
    pub const fn none() -> Self {
        Self { target: None }
    }

    #[must_use]
    pub fn new(module_id: ModuleId, lesson_id: LessonId) -> Self {
        Self {
            target: Some((module_id, lesson_id)),
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.target.is_none()
    }

    #[must_use]
    pub fn module_id(&self) -> Option<ModuleId> {
        self.target.map(|(m, _)| m)
    }

    #[must_use]
    pub fn lesson_id(&self) -> Option<LessonId> {
        self.target.map(|(_, l)| l)
    }

    /// Whether this selection points at the given pair.
    #[must_use]
    pub fn matches(&self, module_id: ModuleId, lesson_id: LessonId) -> bool {
        self.target == Some((module_id, lesson_id))
    }
}

/// Identity of the lesson context an assistant exchange is scoped to.
///
/// Fields are nullable as a unit: the controller publishes
/// `Option<ChatReference>`, cleared before each content fetch and set only
/// after the fetch succeeds, so the assistant never answers against stale
/// context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReference {
    pub course_id: CourseId,
    pub module_id: ModuleId,
    pub lesson_id: LessonId,
    pub lesson_title: String,
    #[serde(rename = "lessonType")]
    pub lesson_kind: LessonKind,
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    User,
    Assistant,
}

/// One message of the in-memory chat transcript.
///
/// `pending` marks the assistant placeholder shown before the first streamed
/// chunk arrives; it never crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub origin: MessageOrigin,
    pub text: String,
    #[serde(skip, default)]
    pub pending: bool,
}

impl ChatMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            origin: MessageOrigin::User,
            text: text.into(),
            pending: false,
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            origin: MessageOrigin::Assistant,
            text: text.into(),
            pending: false,
        }
    }

    /// The placeholder appended while the assistant response is pending.
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            origin: MessageOrigin::Assistant,
            text: String::new(),
            pending: true,
        }
    }
}

/// Last-viewed pointer stored on the course document.
///
/// Read once at session start when no explicit selection exists, written
/// best-effort after every successful selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePointer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_module_id: Option<ModuleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_lesson_id: Option<LessonId>,
}

impl ResumePointer {
    #[must_use]
    pub fn new(module_id: ModuleId, lesson_id: LessonId) -> Self {
        Self {
            last_module_id: Some(module_id),
            last_lesson_id: Some(lesson_id),
        }
    }

    /// Both ids, when the pointer is fully populated.
    #[must_use]
    pub fn target(&self) -> Option<(ModuleId, LessonId)> {
        match (self.last_module_id, self.last_lesson_id) {
            (Some(m), Some(l)) => Some((m, l)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_pairs_module_and_lesson() {
        let selection = SelectedLesson::new(ModuleId::new(1), LessonId::new(2));
        assert_eq!(selection.module_id(), Some(ModuleId::new(1)));
        assert_eq!(selection.lesson_id(), Some(LessonId::new(2)));
        assert!(selection.matches(ModuleId::new(1), LessonId::new(2)));
        assert!(!selection.matches(ModuleId::new(1), LessonId::new(3)));
        assert!(SelectedLesson::none().is_none());
    }

    #[test]
    fn chat_reference_serializes_camel_case() {
        let reference = ChatReference {
            course_id: CourseId::new("c1"),
            module_id: ModuleId::new(1),
            lesson_id: LessonId::new(2),
            lesson_title: "Intro".into(),
            lesson_kind: LessonKind::Reading,
        };
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["courseId"], "c1");
        assert_eq!(json["moduleId"], "1");
        assert_eq!(json["lessonId"], "2");
        assert_eq!(json["lessonType"], "reading");
    }

    #[test]
    fn chat_message_wire_shape_omits_pending() {
        let json = serde_json::to_value(ChatMessage::placeholder()).unwrap();
        assert_eq!(json["origin"], "assistant");
        assert!(json.get("pending").is_none());
    }

    #[test]
    fn resume_pointer_requires_both_ids() {
        let full = ResumePointer::new(ModuleId::new(1), LessonId::new(2));
        assert_eq!(full.target(), Some((ModuleId::new(1), LessonId::new(2))));

        let partial: ResumePointer =
            serde_json::from_str(r#"{"lastModuleId":"1"}"#).unwrap();
        assert_eq!(partial.target(), None);

        let empty: ResumePointer = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.target(), None);
    }
}
