use std::collections::HashSet;

use course_core::model::{CompletionRatio, LessonId, LessonSummary, Module, ModuleId};

/// Single source of truth for the module/lesson tree.
///
/// Pure merge logic: snapshots go in, a normalized (numeric-id sorted) tree
/// comes out. No I/O. The subscription tree feeds it; everything else reads
/// from it.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    modules: Vec<Module>,
    /// Modules whose lesson subscription has delivered at least once
    /// (possibly an empty list). Drives resume readiness.
    reported: HashSet<ModuleId>,
}

impl SessionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Replace the module set from a root snapshot.
    ///
    /// Incoming modules arrive with empty lesson lists; lessons already held
    /// for retained module ids are carried over so a root change never blanks
    /// sibling lesson lists.
    pub fn apply_module_snapshot(&mut self, mut incoming: Vec<Module>) {
        incoming.sort_by_key(|m| m.id);
        for module in &mut incoming {
            if let Some(existing) = self.modules.iter_mut().find(|m| m.id == module.id) {
                module.lessons = std::mem::take(&mut existing.lessons);
            }
        }
        let retained: HashSet<ModuleId> = incoming.iter().map(|m| m.id).collect();
        self.reported.retain(|id| retained.contains(id));
        self.modules = incoming;
    }

    /// Merge one module's lesson snapshot in place, leaving siblings
    /// untouched. Returns false when the module is no longer present
    /// (a stale delivery from a closing subscription).
    pub fn apply_lesson_snapshot(
        &mut self,
        module_id: ModuleId,
        mut lessons: Vec<LessonSummary>,
    ) -> bool {
        lessons.sort_by_key(|l| l.id);
        let Some(module) = self.modules.iter_mut().find(|m| m.id == module_id) else {
            return false;
        };
        module.lessons = lessons;
        self.reported.insert(module_id);
        true
    }

    /// Tree-side resume condition: every module in the latest root snapshot
    /// has reported its lesson list (possibly empty) and at least one lesson
    /// exists. An indefinitely-empty module therefore cannot block resume.
    ///
    /// The selection controller additionally requires that nothing is
    /// selected yet.
    #[must_use]
    pub fn ready_for_resume(&self) -> bool {
        !self.modules.is_empty()
            && self.modules.iter().all(|m| self.reported.contains(&m.id))
            && self.modules.iter().any(|m| !m.lessons.is_empty())
    }

    /// First lesson of the first module that has lessons; the resume
    /// fallback when no last-viewed pointer exists.
    #[must_use]
    pub fn first_lesson(&self) -> Option<(ModuleId, LessonId)> {
        self.modules
            .iter()
            .find(|m| !m.lessons.is_empty())
            .map(|m| (m.id, m.lessons[0].id))
    }

    /// Whether the pair currently exists in the tree.
    #[must_use]
    pub fn contains(&self, module_id: ModuleId, lesson_id: LessonId) -> bool {
        self.modules
            .iter()
            .find(|m| m.id == module_id)
            .is_some_and(|m| m.lessons.iter().any(|l| l.id == lesson_id))
    }

    /// Course-level completion counts.
    #[must_use]
    pub fn completion(&self) -> CompletionRatio {
        CompletionRatio::across(&self.modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::LessonKind;

    fn module(id: u64, title: &str) -> Module {
        Module::new(ModuleId::new(id), title)
    }

    fn lesson(id: u64) -> LessonSummary {
        LessonSummary {
            id: LessonId::new(id),
            title: format!("Lesson {id}"),
            kind: LessonKind::Reading,
            completed: false,
        }
    }

    #[test]
    fn modules_sort_by_numeric_id_not_delivery_order() {
        let mut cache = SessionCache::new();
        cache.apply_module_snapshot(vec![module(10, "J"), module(2, "B"), module(1, "A")]);
        let ids: Vec<u64> = cache.modules().iter().map(|m| m.id.value()).collect();
        assert_eq!(ids, vec![1, 2, 10]);
    }

    #[test]
    fn lessons_sort_by_numeric_id() {
        let mut cache = SessionCache::new();
        cache.apply_module_snapshot(vec![module(1, "A")]);
        cache.apply_lesson_snapshot(
            ModuleId::new(1),
            vec![lesson(10), lesson(2), lesson(1)],
        );
        let ids: Vec<u64> = cache.modules()[0]
            .lessons
            .iter()
            .map(|l| l.id.value())
            .collect();
        assert_eq!(ids, vec![1, 2, 10]);
    }

    #[test]
    fn lesson_merge_leaves_siblings_untouched() {
        let mut cache = SessionCache::new();
        cache.apply_module_snapshot(vec![module(1, "A"), module(2, "B")]);
        cache.apply_lesson_snapshot(ModuleId::new(1), vec![lesson(1)]);
        cache.apply_lesson_snapshot(ModuleId::new(2), vec![lesson(5)]);

        cache.apply_lesson_snapshot(ModuleId::new(2), vec![lesson(5), lesson(6)]);
        assert_eq!(cache.modules()[0].lessons.len(), 1);
        assert_eq!(cache.modules()[1].lessons.len(), 2);
    }

    #[test]
    fn root_snapshot_carries_over_existing_lessons() {
        let mut cache = SessionCache::new();
        cache.apply_module_snapshot(vec![module(1, "A")]);
        cache.apply_lesson_snapshot(ModuleId::new(1), vec![lesson(1)]);

        cache.apply_module_snapshot(vec![module(1, "A renamed"), module(2, "B")]);
        assert_eq!(cache.modules()[0].lessons.len(), 1);
        assert_eq!(cache.modules()[0].title, "A renamed");
        assert!(cache.modules()[1].lessons.is_empty());
    }

    #[test]
    fn stale_lesson_delivery_for_removed_module_is_rejected() {
        let mut cache = SessionCache::new();
        cache.apply_module_snapshot(vec![module(1, "A")]);
        cache.apply_module_snapshot(vec![]);
        assert!(!cache.apply_lesson_snapshot(ModuleId::new(1), vec![lesson(1)]));
    }

    #[test]
    fn resume_waits_for_every_module_to_report() {
        let mut cache = SessionCache::new();
        cache.apply_module_snapshot(vec![module(1, "A"), module(2, "B")]);
        assert!(!cache.ready_for_resume());

        cache.apply_lesson_snapshot(ModuleId::new(1), vec![lesson(1)]);
        assert!(!cache.ready_for_resume());

        // An empty module that has reported does not block resume.
        cache.apply_lesson_snapshot(ModuleId::new(2), vec![]);
        assert!(cache.ready_for_resume());
        assert_eq!(
            cache.first_lesson(),
            Some((ModuleId::new(1), LessonId::new(1)))
        );
    }

    #[test]
    fn resume_requires_at_least_one_lesson() {
        let mut cache = SessionCache::new();
        cache.apply_module_snapshot(vec![module(1, "A")]);
        cache.apply_lesson_snapshot(ModuleId::new(1), vec![]);
        assert!(!cache.ready_for_resume());
        assert_eq!(cache.first_lesson(), None);
    }

    #[test]
    fn completion_is_summed_across_modules() {
        let mut cache = SessionCache::new();
        cache.apply_module_snapshot(vec![module(1, "A")]);
        let mut done = lesson(1);
        done.completed = true;
        cache.apply_lesson_snapshot(ModuleId::new(1), vec![done, lesson(2)]);
        let ratio = cache.completion();
        assert_eq!((ratio.completed, ratio.total), (1, 2));
    }
}
