//! Configuration types deserialized from `kiln.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// Default cache directory, relative to the directory holding `kiln.toml`.
pub const DEFAULT_CACHE_DIR: &str = ".kiln";

/// Default number of output generations kept per (project, client) by pruning.
pub const DEFAULT_RETAIN_GENERATIONS: usize = 2;

/// The top-level build configuration parsed from `kiln.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Build server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Declared projects, keyed by project name.
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

/// Settings for the build server itself.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Directory for analyses and output directories.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Maximum number of concurrently running compilations (0 = unbounded).
    #[serde(default)]
    pub max_parallel: usize,
    /// Number of output generations kept per (project, client).
    #[serde(default = "default_retain_generations")]
    pub retain_generations: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_parallel: 0,
            retain_generations: default_retain_generations(),
        }
    }
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

fn default_retain_generations() -> usize {
    DEFAULT_RETAIN_GENERATIONS
}

/// Configuration of a single project.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Source files or directories.
    ///
    /// Accepts either a single string or a list of strings.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub sources: Vec<String>,
    /// Names of the projects this project depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Explicit location of the persisted analysis file.
    pub analysis: Option<String>,
    /// Explicit output root for per-client output directories.
    pub output: Option<String>,
    /// Compiler command line, with `{classes_dir}`, `{sources}` and
    /// `{project}` placeholders.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

/// Deserializes a field that can be either a single string or a list of strings.
///
/// Allows `sources = "src"` as well as `sources = ["src", "generated"]`.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config: BuildConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.cache_dir, ".kiln");
        assert_eq!(config.server.max_parallel, 0);
        assert_eq!(config.server.retain_generations, 2);
        assert!(config.projects.is_empty());
    }

    #[test]
    fn sources_as_string() {
        let config: BuildConfig = toml::from_str(
            r#"
[projects.core]
sources = "core/src"
"#,
        )
        .unwrap();
        assert_eq!(config.projects["core"].sources, vec!["core/src"]);
    }

    #[test]
    fn sources_as_list() {
        let config: BuildConfig = toml::from_str(
            r#"
[projects.core]
sources = ["core/src", "core/gen"]
"#,
        )
        .unwrap();
        assert_eq!(config.projects["core"].sources.len(), 2);
    }

    #[test]
    fn unknown_field_rejected() {
        let result: Result<BuildConfig, _> = toml::from_str(
            r#"
[projects.core]
source = "typo"
"#,
        );
        assert!(result.is_err());
    }
}
