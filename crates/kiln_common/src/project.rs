//! The read-only project record supplied by the build graph loader.

use std::io;
use std::path::{Path, PathBuf};

use crate::ids::ProjectId;

/// A single project of a multi-project build.
///
/// Projects are immutable once loaded. The build server only ever reads them:
/// the dependency list drives ordering, the source roots drive stamping, and
/// the analysis file and output root say where durable state lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    /// Unique project name.
    pub id: ProjectId,
    /// Direct dependencies, in declaration order.
    pub dependencies: Vec<ProjectId>,
    /// Source files and directories. Directories are walked recursively.
    pub sources: Vec<PathBuf>,
    /// Where the persisted analysis of this project lives.
    pub analysis_file: PathBuf,
    /// Root under which per-client output directories are allocated.
    pub output_root: PathBuf,
}

impl Project {
    /// Creates a project with no dependencies and no sources.
    pub fn new(
        id: impl Into<ProjectId>,
        analysis_file: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            sources: Vec::new(),
            analysis_file: analysis_file.into(),
            output_root: output_root.into(),
        }
    }

    /// Sets the direct dependencies of this project.
    pub fn with_dependencies<I, P>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProjectId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the source roots of this project.
    pub fn with_sources<I, P>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Expands the declared sources into the concrete list of source files.
    ///
    /// Directories are walked recursively; declared files are returned as-is
    /// even when they no longer exist, so that a deleted file shows up as a
    /// change. The result is sorted and free of duplicates.
    pub fn source_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for root in &self.sources {
            if root.is_dir() {
                walk_dir(root, &mut files)?;
            } else {
                files.push(root.clone());
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}

/// Recursively collects regular files below `dir`.
fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_dir(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
