use course_core::model::{CourseId, ModuleId};
use serde_json::Value;

/// A document as delivered by the store: the collection-local key plus the
/// raw field map. Typed parsing happens in the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    #[must_use]
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Path builder for one learner's course hierarchy:
/// `users/{uid}/courses/{course}/modules/{module}/lessons`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoursePaths {
    user_id: String,
    course_id: CourseId,
}

impl CoursePaths {
    #[must_use]
    pub fn new(user_id: impl Into<String>, course_id: CourseId) -> Self {
        Self {
            user_id: user_id.into(),
            course_id,
        }
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    /// The course document itself; holds the last-viewed pointer fields.
    #[must_use]
    pub fn course_doc(&self) -> String {
        format!("users/{}/courses/{}", self.user_id, self.course_id)
    }

    /// The modules collection of the course.
    #[must_use]
    pub fn modules(&self) -> String {
        format!("{}/modules", self.course_doc())
    }

    /// The lessons collection of one module.
    #[must_use]
    pub fn lessons(&self, module_id: ModuleId) -> String {
        format!("{}/{}/lessons", self.modules(), module_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_store_hierarchy() {
        let paths = CoursePaths::new("u1", CourseId::new("c9"));
        assert_eq!(paths.course_doc(), "users/u1/courses/c9");
        assert_eq!(paths.modules(), "users/u1/courses/c9/modules");
        assert_eq!(
            paths.lessons(ModuleId::new(3)),
            "users/u1/courses/c9/modules/3/lessons"
        );
    }
}
