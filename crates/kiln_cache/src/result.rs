//! Tagged compile results.
//!
//! A [`CompileResult`] is a closed sum type: exactly one variant is active per
//! attempt, and each variant carries everything a caller needs to report it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kiln_diagnostics::{error_count, Problem};

use crate::analysis::Analysis;
use crate::classes_dir::ClassesDirectory;

/// Timing of one compilation attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DurationInfo {
    /// Wall-clock time from dispatch to completion.
    pub elapsed: Duration,
}

impl DurationInfo {
    /// Creates timing information for an attempt that took `elapsed`.
    pub fn new(elapsed: Duration) -> Self {
        Self { elapsed }
    }
}

/// A compiler that crashed instead of reporting problems.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompilerCrash {
    /// The crash message, carried through for reporting.
    pub message: String,
}

impl CompilerCrash {
    /// Creates a crash record.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CompilerCrash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compiler crashed: {}", self.message)
    }
}

/// A compilation that produced usable output.
#[derive(Clone, Debug)]
pub struct Success {
    /// `true` when nothing changed and the previous output was reused.
    pub is_no_op: bool,
    /// The analysis describing the output.
    pub analysis: Arc<Analysis>,
    /// The output directory holding the compiled products.
    pub classes_dir: ClassesDirectory,
    /// Warnings and infos reported by the compiler.
    pub problems: Vec<Problem>,
    /// Timing.
    pub duration: DurationInfo,
}

/// A compilation that failed, either with errors or a crash.
#[derive(Clone, Debug, Default)]
pub struct Failure {
    /// Problems reported by the compiler or by the build server itself.
    pub problems: Vec<Problem>,
    /// The crash, if the compiler threw instead of reporting.
    pub crash: Option<CompilerCrash>,
    /// Timing.
    pub duration: DurationInfo,
}

impl Failure {
    /// Number of errors, counting a crash as one error when the compiler
    /// reported none.
    pub fn error_count(&self) -> usize {
        let reported = error_count(&self.problems);
        if self.crash.is_some() {
            reported.max(1)
        } else {
            reported
        }
    }
}

/// A compilation aborted by an explicit cancellation request.
#[derive(Clone, Copy, Debug, Default)]
pub struct Cancellation {
    /// Timing up to the moment the attempt was abandoned.
    pub duration: DurationInfo,
}

/// The outcome of the latest compilation attempt of a project.
#[derive(Clone, Debug, Default)]
pub enum CompileResult {
    /// No compilation was attempted yet in this process.
    #[default]
    Empty,
    /// Usable output was produced.
    Success(Success),
    /// The compiler reported errors or crashed.
    Failed(Failure),
    /// The attempt was cancelled.
    Cancelled(Cancellation),
}

/// View over the results that did not produce usable output.
#[derive(Clone, Copy, Debug)]
pub enum NotOk<'a> {
    /// See [`CompileResult::Failed`].
    Failed(&'a Failure),
    /// See [`CompileResult::Cancelled`].
    Cancelled(&'a Cancellation),
}

impl NotOk<'_> {
    /// Timing of the attempt.
    pub fn duration(&self) -> DurationInfo {
        match self {
            NotOk::Failed(f) => f.duration,
            NotOk::Cancelled(c) => c.duration,
        }
    }
}

impl CompileResult {
    /// Returns `true` for [`CompileResult::Success`].
    pub fn is_ok(&self) -> bool {
        matches!(self, CompileResult::Success(_))
    }

    /// Returns `true` for [`CompileResult::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, CompileResult::Empty)
    }

    /// Returns the failed or cancelled result, if this is one.
    pub fn not_ok(&self) -> Option<NotOk<'_>> {
        match self {
            CompileResult::Failed(f) => Some(NotOk::Failed(f)),
            CompileResult::Cancelled(c) => Some(NotOk::Cancelled(c)),
            CompileResult::Empty | CompileResult::Success(_) => None,
        }
    }

    /// Returns the success payload, if any.
    pub fn as_success(&self) -> Option<&Success> {
        match self {
            CompileResult::Success(s) => Some(s),
            _ => None,
        }
    }

    /// Problems carried by the result.
    pub fn problems(&self) -> &[Problem] {
        match self {
            CompileResult::Success(s) => &s.problems,
            CompileResult::Failed(f) => &f.problems,
            CompileResult::Empty | CompileResult::Cancelled(_) => &[],
        }
    }

    /// Short lowercase name of the active variant, for logs and reports.
    pub fn tag(&self) -> &'static str {
        match self {
            CompileResult::Empty => "empty",
            CompileResult::Success(s) if s.is_no_op => "no-op",
            CompileResult::Success(_) => "success",
            CompileResult::Failed(_) => "failed",
            CompileResult::Cancelled(_) => "cancelled",
        }
    }
}

/// The part of a [`Success`] retained for incremental reuse.
#[derive(Clone, Debug)]
pub struct LastSuccessfulResult {
    /// The analysis at the moment of success.
    pub analysis: Arc<Analysis>,
    /// The output directory at the moment of success.
    pub classes_dir: ClassesDirectory,
    /// Problems reported by that compilation, repeated by later no-ops.
    pub problems: Vec<Problem>,
}

impl From<&Success> for LastSuccessfulResult {
    fn from(success: &Success) -> Self {
        Self {
            analysis: Arc::clone(&success.analysis),
            classes_dir: success.classes_dir.clone(),
            problems: success.problems.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn success(generation: u64, is_no_op: bool) -> Success {
        Success {
            is_no_op,
            analysis: Arc::new(Analysis::default()),
            classes_dir: ClassesDirectory {
                path: PathBuf::from(format!("/out/core/cli/gen-{generation}")),
                generation,
            },
            problems: vec![Problem::warning("unused import")],
            duration: DurationInfo::default(),
        }
    }

    #[test]
    fn empty_is_default() {
        let r = CompileResult::default();
        assert!(r.is_empty());
        assert!(!r.is_ok());
        assert!(r.not_ok().is_none());
        assert_eq!(r.tag(), "empty");
    }

    #[test]
    fn not_ok_covers_failed_and_cancelled() {
        let failed = CompileResult::Failed(Failure::default());
        let cancelled = CompileResult::Cancelled(Cancellation::default());
        let ok = CompileResult::Success(success(1, false));

        assert!(matches!(failed.not_ok(), Some(NotOk::Failed(_))));
        assert!(matches!(cancelled.not_ok(), Some(NotOk::Cancelled(_))));
        assert!(ok.not_ok().is_none());
        assert!(ok.is_ok());
    }

    #[test]
    fn tags() {
        assert_eq!(CompileResult::Success(success(1, false)).tag(), "success");
        assert_eq!(CompileResult::Success(success(1, true)).tag(), "no-op");
        assert_eq!(CompileResult::Failed(Failure::default()).tag(), "failed");
        assert_eq!(
            CompileResult::Cancelled(Cancellation::default()).tag(),
            "cancelled"
        );
    }

    #[test]
    fn crash_counts_as_an_error() {
        let crashed = Failure {
            crash: Some(CompilerCrash::new("stack overflow")),
            ..Failure::default()
        };
        assert_eq!(crashed.error_count(), 1);

        let both = Failure {
            problems: vec![Problem::error("a"), Problem::error("b")],
            crash: Some(CompilerCrash::new("boom")),
            ..Failure::default()
        };
        assert_eq!(both.error_count(), 2);

        let warnings_only = Failure {
            problems: vec![Problem::warning("w")],
            ..Failure::default()
        };
        assert_eq!(warnings_only.error_count(), 0);
    }

    #[test]
    fn problems_are_carried_through() {
        let failed = CompileResult::Failed(Failure {
            problems: vec![Problem::error("type mismatch")],
            ..Failure::default()
        });
        assert_eq!(failed.problems().len(), 1);
        assert!(CompileResult::Cancelled(Cancellation::default())
            .problems()
            .is_empty());
    }

    #[test]
    fn last_successful_projection() {
        let s = success(3, false);
        let last = LastSuccessfulResult::from(&s);
        assert_eq!(last.classes_dir.generation, 3);
        assert!(Arc::ptr_eq(&last.analysis, &s.analysis));
        assert_eq!(last.problems, vec![Problem::warning("unused import")]);
    }

    #[test]
    fn crash_display() {
        assert_eq!(
            CompilerCrash::new("oom").to_string(),
            "compiler crashed: oom"
        );
    }
}
