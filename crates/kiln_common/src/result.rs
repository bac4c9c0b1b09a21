//! Common result and error types for the kiln build server.

/// The standard result type for operations that can only fail through a bug.
///
/// `Err` indicates an internal error (a broken invariant in kiln itself), never
/// a compilation failure. Compilation failures are ordinary values carried in
/// compile results.
pub type KilnResult<T> = Result<T, InternalError>;

/// An internal error indicating a bug in kiln, not a problem with user input.
///
/// For example, a requested project reporting an empty result after an
/// orchestration run means the scheduler lost track of it.
#[derive(Debug, thiserror::Error)]
#[error("internal build server error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
