//! Thread-safe problem accumulator for compilers that report concurrently.

use crate::problem::Problem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A thread-safe accumulator for problems emitted during one compilation.
///
/// Multiple threads can emit problems concurrently via [`emit`](Self::emit).
/// The error count is tracked atomically for fast `has_errors` checks without
/// locking the problem vector.
pub struct ProblemSink {
    problems: Mutex<Vec<Problem>>,
    error_count: AtomicUsize,
}

impl ProblemSink {
    /// Creates a new empty problem sink.
    pub fn new() -> Self {
        Self {
            problems: Mutex::new(Vec::new()),
            error_count: AtomicUsize::new(0),
        }
    }

    /// Emits a problem into the sink.
    pub fn emit(&self, problem: Problem) {
        if problem.is_error() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.problems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(problem);
    }

    /// Returns `true` if any error-severity problems have been emitted.
    pub fn has_errors(&self) -> bool {
        self.error_count.load(Ordering::Relaxed) > 0
    }

    /// Returns the number of error-severity problems emitted so far.
    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Takes all accumulated problems, leaving the sink empty.
    pub fn take_all(&self) -> Vec<Problem> {
        let mut problems = self.problems.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *problems)
    }
}

impl Default for ProblemSink {
    fn default() -> Self {
        Self::new()
    }
}
