//! Shared helpers for CLI commands.
//!
//! Contains the steps every command shares: logging setup, workspace root
//! resolution, configuration loading, orchestrator construction, and Ctrl-C
//! handling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_build::{BuildGraph, Compiler, Orchestrator, ProcessCompiler};
use kiln_config::{ResolvedBuild, CONFIG_FILE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::GlobalArgs;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise verbosity 0 logs warnings, 1 info,
/// and 2 or more debug output.
pub fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("kiln=warn"),
        1 => EnvFilter::new("kiln=info"),
        _ => EnvFilter::new("kiln=debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
///
/// Returns the directory containing `kiln.toml`, or an error if none is found.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Locates the configuration file from global CLI args.
///
/// If `--config` is specified, uses that path (file as-is, directory joined
/// with `kiln.toml`). Otherwise walks up from the current directory.
pub fn resolve_config_path(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match &global.config {
        Some(config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_dir() {
                Ok(p.join(CONFIG_FILE))
            } else {
                Ok(p)
            }
        }
        None => Ok(find_project_root(&std::env::current_dir()?)?.join(CONFIG_FILE)),
    }
}

/// A loaded workspace: its root directory and resolved build.
#[derive(Debug)]
pub struct Workspace {
    /// Directory holding the configuration file.
    pub root: PathBuf,
    /// The resolved projects and server settings.
    pub build: ResolvedBuild,
}

/// Loads and resolves the workspace configuration.
pub fn load_workspace(global: &GlobalArgs) -> Result<Workspace, Box<dyn std::error::Error>> {
    let config_path = resolve_config_path(global)?;
    let root = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = kiln_config::load_config_file(&config_path)
        .map_err(|e| format!("{}: {e}", config_path.display()))?;
    let build = kiln_config::resolve(&config, &root)?;
    debug!(config = %config_path.display(), projects = build.projects.len(), "loaded workspace");
    Ok(Workspace { root, build })
}

/// Builds an orchestrator that compiles through the configured commands.
pub fn orchestrator(workspace: &Workspace) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let graph = BuildGraph::new(workspace.build.projects.iter().map(|p| p.project.clone()))?;
    let compiler: Arc<dyn Compiler> =
        Arc::new(ProcessCompiler::from_build(&workspace.build, &workspace.root));
    Ok(Orchestrator::new(graph, compiler).with_settings(&workspace.build.server))
}

/// Returns a token that is cancelled when the user presses Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C, cancelling build");
            trigger.cancel();
        }
    });
    token
}
