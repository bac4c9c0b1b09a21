//! Dependency-ordered compilation on top of the kiln caches.
//!
//! [`BuildGraph`] validates the project graph, [`Compiler`] is the seam to the
//! actual language compiler ([`ProcessCompiler`] runs an external command),
//! and [`Orchestrator`] drives a set of projects to terminal results while
//! keeping the analysis store, output directories, and result cache
//! consistent.

#![warn(missing_docs)]

pub mod compiler;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod process;

pub use compiler::{CompileRequest, Compiler, CompilerOutcome};
pub use error::BuildError;
pub use graph::BuildGraph;
pub use orchestrator::{BuildRequest, Orchestrator, RunReport, TaskState};
pub use process::ProcessCompiler;
