//! Compiler problems carried through compile results.
//!
//! The build server treats compiler diagnostics as opaque payloads: it never
//! interprets them beyond their [`Severity`]. This crate provides the
//! [`Problem`] record, a thread-safe [`ProblemSink`] for compilers that report
//! problems from several threads, and a plain [`TerminalRenderer`].

#![warn(missing_docs)]

pub mod problem;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use problem::{error_count, Position, Problem};
pub use renderer::{ProblemRenderer, TerminalRenderer};
pub use severity::Severity;
pub use sink::ProblemSink;
