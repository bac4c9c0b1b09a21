//! Resolution of a parsed configuration into project records.

use crate::error::ConfigError;
use crate::types::BuildConfig;
use kiln_common::{Project, ProjectId};
use std::path::{Path, PathBuf};

/// File extension of persisted analysis files.
const ANALYSIS_EXT: &str = "analysis";

/// Build server settings with paths made absolute.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Directory holding analyses and output directories.
    pub cache_dir: PathBuf,
    /// Maximum number of concurrently running compilations (0 = unbounded).
    pub max_parallel: usize,
    /// Number of output generations kept per (project, client).
    pub retain_generations: usize,
}

/// A resolved project plus its optional compiler command line.
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    /// The project record.
    pub project: Project,
    /// The compiler command line, with placeholders still unexpanded.
    pub command: Option<Vec<String>>,
}

/// A fully resolved build: settings plus every declared project.
#[derive(Debug, Clone)]
pub struct ResolvedBuild {
    /// Server settings.
    pub server: ServerSettings,
    /// Projects in name order.
    pub projects: Vec<ResolvedProject>,
}

impl ResolvedBuild {
    /// Maps requested project names to identities.
    ///
    /// An empty request selects every project.
    pub fn select(&self, names: &[String]) -> Result<Vec<ProjectId>, ConfigError> {
        if names.is_empty() {
            return Ok(self.projects.iter().map(|p| p.project.id.clone()).collect());
        }
        names
            .iter()
            .map(|name| {
                self.projects
                    .iter()
                    .find(|p| p.project.id.as_str() == name)
                    .map(|p| p.project.id.clone())
                    .ok_or_else(|| ConfigError::UnknownProject(name.clone()))
            })
            .collect()
    }
}

/// Resolves every declared project against `base_dir`, the directory that
/// holds `kiln.toml`.
///
/// Relative paths are joined onto `base_dir`. Projects without an explicit
/// analysis file get `<cache_dir>/analysis/<name>.analysis`; projects without an
/// explicit output root get `<cache_dir>/classes/<name>`.
pub fn resolve(config: &BuildConfig, base_dir: &Path) -> Result<ResolvedBuild, ConfigError> {
    let cache_dir = absolutize(base_dir, &config.server.cache_dir);
    if config.server.retain_generations == 0 {
        return Err(ConfigError::ValidationError(
            "server.retain_generations must be at least 1".to_string(),
        ));
    }

    let projects = config
        .projects
        .iter()
        .map(|(name, pc)| {
            let analysis_file = pc
                .analysis
                .as_deref()
                .map(|p| absolutize(base_dir, p))
                .unwrap_or_else(|| {
                    cache_dir
                        .join("analysis")
                        .join(format!("{name}.{ANALYSIS_EXT}"))
                });
            let output_root = pc
                .output
                .as_deref()
                .map(|p| absolutize(base_dir, p))
                .unwrap_or_else(|| cache_dir.join("classes").join(name));
            let project = Project::new(name.as_str(), analysis_file, output_root)
                .with_dependencies(pc.dependencies.iter().map(String::as_str))
                .with_sources(pc.sources.iter().map(|s| absolutize(base_dir, s)));
            ResolvedProject {
                project,
                command: pc.command.clone(),
            }
        })
        .collect();

    Ok(ResolvedBuild {
        server: ServerSettings {
            cache_dir,
            max_parallel: config.server.max_parallel,
            retain_generations: config.server.retain_generations,
        },
        projects,
    })
}

fn absolutize(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}
