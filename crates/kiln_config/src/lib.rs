//! Parsing and validation of `kiln.toml` build configuration files.
//!
//! This crate plays the role of the build-graph loader: it reads the
//! configuration file and resolves every `[projects.*]` table into a
//! [`Project`](kiln_common::Project) record with absolute paths.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_file, load_config_from_str, CONFIG_FILE};
pub use resolve::{resolve, ResolvedBuild, ResolvedProject, ServerSettings};
pub use types::*;
