//! Error types for graph construction and orchestration.

use kiln_cache::CacheError;
use kiln_common::InternalError;

/// Errors that prevent a build from being planned or run.
///
/// Compilation failures are not errors: they are ordinary
/// [`CompileResult`](kiln_cache::CompileResult) values in the run report.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Two projects share a name.
    #[error("duplicate project '{0}'")]
    DuplicateProject(String),

    /// A project depends on a project that is not part of the build.
    #[error("project '{project}' depends on unknown project '{dependency}'")]
    UnknownDependency {
        /// The depending project.
        project: String,
        /// The missing dependency.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle through project '{0}'")]
    Cycle(String),

    /// A request named a project that is not part of the build.
    #[error("unknown project '{0}'")]
    UnknownProject(String),

    /// Durable state could not be updated outside of a compilation.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The orchestrator broke one of its own invariants.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = BuildError::UnknownDependency {
            project: "app".to_string(),
            dependency: "missing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "project 'app' depends on unknown project 'missing'"
        );
        assert_eq!(
            BuildError::Cycle("core".to_string()).to_string(),
            "dependency cycle through project 'core'"
        );
    }

    #[test]
    fn internal_error_is_transparent() {
        let err: BuildError = InternalError::new("lost project 'core'").into();
        assert_eq!(
            err.to_string(),
            "internal build server error: lost project 'core'"
        );
    }
}
