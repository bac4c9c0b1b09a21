//! The compiler collaborator.
//!
//! The build server never compiles anything itself. It hands a
//! [`CompileRequest`] to a [`Compiler`] implementation and turns the returned
//! [`CompilerOutcome`] into a cached compile result.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_cache::{Analysis, ChangeSet, CompilerCrash};
use kiln_common::Project;
use kiln_diagnostics::Problem;
use tokio_util::sync::CancellationToken;

/// Everything a compiler needs for one compilation of one project.
#[derive(Clone, Debug)]
pub struct CompileRequest {
    /// The project being compiled.
    pub project: Project,
    /// Source files of the project, sorted.
    pub sources: Vec<PathBuf>,
    /// Empty staging directory the compiler must write every product into.
    /// It becomes the current output directory only if compilation succeeds.
    pub classes_dir: PathBuf,
    /// The current output directory of the requesting client, if it holds
    /// products of an earlier successful compilation.
    pub previous_classes_dir: Option<PathBuf>,
    /// The analysis of the last successful compilation, if any.
    pub previous_analysis: Option<Arc<Analysis>>,
    /// Source changes since the previous analysis. Every source is new when
    /// there is no previous analysis.
    pub changes: ChangeSet,
}

/// What a compiler reports back.
#[derive(Clone, Debug)]
pub enum CompilerOutcome {
    /// All products were written to the staging directory.
    Success {
        /// Non-fatal problems.
        problems: Vec<Problem>,
        /// Opaque compiler metadata, persisted in the analysis.
        compiler_data: Vec<u8>,
    },
    /// Compilation failed with errors, or the compiler crashed.
    Failed {
        /// Reported problems.
        problems: Vec<Problem>,
        /// The crash, if the compiler broke down instead of reporting.
        crash: Option<CompilerCrash>,
    },
    /// Compilation stopped because the cancellation token fired.
    Cancelled,
}

/// An asynchronous compiler for a single project.
///
/// Implementations should watch `cancel` and return
/// [`CompilerOutcome::Cancelled`] promptly once it fires. Honoring it is
/// advisory: whatever outcome is eventually returned gets recorded.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compiles `request.project` into `request.classes_dir`.
    async fn compile(&self, request: CompileRequest, cancel: CancellationToken)
        -> CompilerOutcome;
}
