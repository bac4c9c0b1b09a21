//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::BuildConfig;
use std::path::Path;

/// Name of the build configuration file.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `kiln.toml` from a workspace directory.
pub fn load_config(workspace_dir: &Path) -> Result<BuildConfig, ConfigError> {
    load_config_file(&workspace_dir.join(CONFIG_FILE))
}

/// Loads and validates a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<BuildConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<BuildConfig, ConfigError> {
    let config: BuildConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates project names, dependency references, and compiler commands.
fn validate_config(config: &BuildConfig) -> Result<(), ConfigError> {
    if config.projects.is_empty() {
        return Err(ConfigError::ValidationError(
            "no projects declared".to_string(),
        ));
    }
    for (name, project) in &config.projects {
        if !is_valid_project_name(name) {
            return Err(ConfigError::ValidationError(format!(
                "invalid project name '{name}' (use letters, digits, '.', '_' or '-')"
            )));
        }
        for dep in &project.dependencies {
            if dep == name {
                return Err(ConfigError::ValidationError(format!(
                    "project '{name}' depends on itself"
                )));
            }
            if !config.projects.contains_key(dep) {
                return Err(ConfigError::UnknownDependency {
                    project: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if matches!(&project.command, Some(cmd) if cmd.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "project '{name}' has an empty command"
            )));
        }
    }
    Ok(())
}

/// Project names end up in file names, so they are restricted to a safe set.
fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
