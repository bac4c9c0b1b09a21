//! Problem rendering for terminal output.

use crate::problem::Problem;
use crate::severity::Severity;

/// Trait for rendering problems into formatted output strings.
pub trait ProblemRenderer {
    /// Renders a single problem, including a trailing newline.
    fn render(&self, problem: &Problem) -> String;
}

/// Renders problems in a compact compiler-style format.
///
/// ```text
/// error: type mismatch
///   --> src/A.scala:3:7
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes in output.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn severity_label(&self, severity: Severity) -> String {
        if !self.color {
            return severity.to_string();
        }
        let code = match severity {
            Severity::Error => "31",
            Severity::Warning => "33",
            Severity::Info => "36",
        };
        format!("\x1b[1;{code}m{severity}\x1b[0m")
    }
}

impl ProblemRenderer for TerminalRenderer {
    fn render(&self, problem: &Problem) -> String {
        let mut out = format!("{}: {}\n", self.severity_label(problem.severity), problem.message);
        if let Some(position) = &problem.position {
            out.push_str(&format!("  --> {position}\n"));
        }
        out
    }
}
