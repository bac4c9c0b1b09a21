//! A single problem reported by the compiler collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::severity::Severity;

/// Where in a source file a problem was reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// The source file.
    pub path: PathBuf,
    /// 1-based line, if known.
    pub line: Option<u32>,
    /// 1-based column, if known.
    pub column: Option<u32>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

/// A compiler problem, surfaced verbatim to whoever requested the build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// How severe the problem is.
    pub severity: Severity,
    /// The compiler's message.
    pub message: String,
    /// The source position, when the compiler reported one.
    pub position: Option<Position>,
}

impl Problem {
    /// Creates an error problem without a position.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Creates a warning problem without a position.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Creates an informational problem without a position.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            position: None,
        }
    }

    /// Attaches a source position.
    pub fn at(mut self, path: impl Into<PathBuf>, line: Option<u32>, column: Option<u32>) -> Self {
        self.position = Some(Position {
            path: path.into(),
            line,
            column,
        });
        self
    }

    /// Returns `true` for error-severity problems.
    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }
}

/// Counts the error-severity problems in `problems`.
pub fn error_count(problems: &[Problem]) -> usize {
    problems.iter().filter(|p| p.is_error()).count()
}
