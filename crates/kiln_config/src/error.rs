//! Error types for configuration loading and validation.

/// Errors that can occur when loading or validating a `kiln.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A project depends on a project that is not declared.
    #[error("project '{project}' depends on unknown project '{dependency}'")]
    UnknownDependency {
        /// The declaring project.
        project: String,
        /// The missing dependency.
        dependency: String,
    },

    /// A project was requested by name but is not declared.
    #[error("unknown project '{0}'")]
    UnknownProject(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}
