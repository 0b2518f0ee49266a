use super::ids::ModuleId;
use super::lesson::LessonSummary;

/// A course module and its (asynchronously populated) lessons.
///
/// The lesson list starts empty and is filled in by the module's own
/// collection subscription; both modules and lessons are kept sorted by
/// numeric id.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub id: ModuleId,
    pub title: String,
    pub lessons: Vec<LessonSummary>,
}

impl Module {
    /// Creates a module with an empty lesson list.
    #[must_use]
    pub fn new(id: ModuleId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            lessons: Vec::new(),
        }
    }

    /// Completed/total lesson counts for this module.
    #[must_use]
    pub fn completion(&self) -> CompletionRatio {
        CompletionRatio {
            completed: self.lessons.iter().filter(|l| l.completed).count(),
            total: self.lessons.len(),
        }
    }
}

/// Derived completion counts, used for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionRatio {
    pub completed: usize,
    pub total: usize,
}

impl CompletionRatio {
    /// Fraction in `[0, 1]`; zero for an empty denominator.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Sum completion across modules, for the course-level ratio.
    #[must_use]
    pub fn across(modules: &[Module]) -> Self {
        modules.iter().map(Module::completion).fold(
            Self::default(),
            |acc, ratio| Self {
                completed: acc.completed + ratio.completed,
                total: acc.total + ratio.total,
            },
        )
    }
}
