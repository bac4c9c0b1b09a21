//! In-memory record of every project's latest compile results.

use kiln_common::ProjectId;
use tracing::trace;

use crate::result::{CompileResult, LastSuccessfulResult};
use crate::slots::{lock, Slots};

#[derive(Default)]
struct Entry {
    last: CompileResult,
    last_successful: Option<LastSuccessfulResult>,
}

/// Latest result and latest successful result per project.
///
/// Each project has its own slot, so recording a result for one project
/// never waits on another. Results are applied in the order they are
/// recorded, which is the order attempts complete.
pub struct ResultCache {
    slots: Slots<ProjectId, Entry>,
}

impl ResultCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            slots: Slots::new(),
        }
    }

    /// Records the result of an attempt.
    ///
    /// The latest result is always replaced. The latest successful result is
    /// only replaced by a [`CompileResult::Success`]; failures and
    /// cancellations leave it untouched so the next attempt can still reuse it.
    pub fn record_result(&self, project: &ProjectId, result: CompileResult) {
        let slot = self.slots.slot(project);
        let mut entry = lock(&slot);
        if let CompileResult::Success(success) = &result {
            entry.last_successful = Some(LastSuccessfulResult::from(success));
        }
        trace!(project = %project, result = result.tag(), "recorded result");
        entry.last = result;
    }

    /// The latest result, or [`CompileResult::Empty`] if none was recorded.
    pub fn last_result(&self, project: &ProjectId) -> CompileResult {
        self.slots
            .get(project)
            .map(|slot| lock(&slot).last.clone())
            .unwrap_or_default()
    }

    /// The latest successful result, if the project ever compiled successfully.
    pub fn last_successful_result(&self, project: &ProjectId) -> Option<LastSuccessfulResult> {
        self.slots
            .get(project)
            .and_then(|slot| lock(&slot).last_successful.clone())
    }

    /// Forgets everything recorded for a project.
    pub fn clear(&self, project: &ProjectId) {
        if let Some(slot) = self.slots.get(project) {
            *lock(&slot) = Entry::default();
        }
    }

    /// Projects with a non-empty latest result, sorted by name.
    pub fn projects(&self) -> Vec<ProjectId> {
        let mut projects: Vec<ProjectId> = self
            .slots
            .keys()
            .into_iter()
            .filter(|p| !self.last_result(p).is_empty())
            .collect();
        projects.sort();
        projects
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use crate::classes_dir::ClassesDirectory;
    use crate::result::{Cancellation, DurationInfo, Failure, Success};
    use kiln_diagnostics::Problem;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn success(generation: u64) -> CompileResult {
        CompileResult::Success(Success {
            is_no_op: false,
            analysis: Arc::new(Analysis::default()),
            classes_dir: ClassesDirectory {
                path: PathBuf::from(format!("/out/core/cli/gen-{generation}")),
                generation,
            },
            problems: Vec::new(),
            duration: DurationInfo::default(),
        })
    }

    fn failed() -> CompileResult {
        CompileResult::Failed(Failure {
            problems: vec![Problem::error("not found: value x")],
            ..Failure::default()
        })
    }

    #[test]
    fn unknown_project_is_empty() {
        let cache = ResultCache::new();
        let core = ProjectId::new("core");
        assert!(cache.last_result(&core).is_empty());
        assert!(cache.last_successful_result(&core).is_none());
        assert!(cache.projects().is_empty());
    }

    #[test]
    fn success_sets_both() {
        let cache = ResultCache::new();
        let core = ProjectId::new("core");
        cache.record_result(&core, success(1));
        assert!(cache.last_result(&core).is_ok());
        assert_eq!(
            cache.last_successful_result(&core).unwrap().classes_dir.generation,
            1
        );
    }

    #[test]
    fn failures_never_evict_last_success() {
        let cache = ResultCache::new();
        let core = ProjectId::new("core");
        cache.record_result(&core, success(1));
        cache.record_result(&core, failed());
        cache.record_result(&core, CompileResult::Cancelled(Cancellation::default()));
        cache.record_result(&core, failed());

        assert_eq!(cache.last_result(&core).tag(), "failed");
        let last = cache.last_successful_result(&core).unwrap();
        assert_eq!(last.classes_dir.generation, 1);
    }

    #[test]
    fn newer_success_replaces_last_success() {
        let cache = ResultCache::new();
        let core = ProjectId::new("core");
        cache.record_result(&core, success(1));
        cache.record_result(&core, failed());
        cache.record_result(&core, success(2));
        assert_eq!(
            cache.last_successful_result(&core).unwrap().classes_dir.generation,
            2
        );
    }

    #[test]
    fn failure_without_prior_success() {
        let cache = ResultCache::new();
        let core = ProjectId::new("core");
        cache.record_result(&core, failed());
        assert!(cache.last_result(&core).not_ok().is_some());
        assert!(cache.last_successful_result(&core).is_none());
    }

    #[test]
    fn clear_forgets_project() {
        let cache = ResultCache::new();
        let core = ProjectId::new("core");
        let util = ProjectId::new("util");
        cache.record_result(&core, success(1));
        cache.record_result(&util, failed());

        cache.clear(&core);
        assert!(cache.last_result(&core).is_empty());
        assert!(cache.last_successful_result(&core).is_none());
        assert_eq!(cache.projects(), vec![util]);
    }

    #[test]
    fn projects_are_independent_under_concurrency() {
        let cache = Arc::new(ResultCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let project = ProjectId::new(format!("p{i}"));
                    for generation in 1..=50 {
                        cache.record_result(&project, success(generation));
                        cache.record_result(&project, failed());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.projects().len(), 8);
        for i in 0..8 {
            let project = ProjectId::new(format!("p{i}"));
            assert_eq!(cache.last_result(&project).tag(), "failed");
            assert_eq!(
                cache
                    .last_successful_result(&project)
                    .unwrap()
                    .classes_dir
                    .generation,
                50
            );
        }
    }
}
