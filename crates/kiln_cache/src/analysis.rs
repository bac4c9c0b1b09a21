//! Per-project analyses and up-to-date checks.
//!
//! An [`Analysis`] records, for the last successful compilation of a project,
//! the stamp of every source file and of every product it wrote. It is
//! persisted at the path declared by the project and only ever replaced after
//! a successful compilation, so it always describes artifacts that exist.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_common::{ContentHash, ContentHasher, Project, ProjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::{read_artifact, write_artifact};
use crate::error::CacheError;
use crate::slots::{lock, Slots};
use crate::stamp::{ChangeSet, Stamp, Stamper};

/// Producer string written into every analysis file. Analyses written by a
/// different build server version are ignored.
pub const ANALYSIS_PRODUCER: &str = concat!("kiln ", env!("CARGO_PKG_VERSION"));

/// Durable record of a project's last successful compilation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// The output directory the products were written to.
    pub classes_dir: PathBuf,
    /// Stamp of every source file that was compiled.
    pub sources: BTreeMap<PathBuf, Stamp>,
    /// Stamp of every product, keyed by path relative to `classes_dir`.
    pub products: BTreeMap<PathBuf, Stamp>,
    /// Product fingerprint of each direct dependency at compile time.
    pub upstream: BTreeMap<String, ContentHash>,
    /// Compiler-internal dependency metadata, opaque to the build server.
    pub compiler_data: Vec<u8>,
}

impl Analysis {
    /// Fingerprint of the product set. Dependents record it in their
    /// `upstream` map; a change invalidates them.
    pub fn products_fingerprint(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        for (path, stamp) in &self.products {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update(&[0]);
            hasher.update(stamp.hash.as_bytes());
            hasher.update(&stamp.size.to_le_bytes());
        }
        hasher.finish()
    }

    /// Encodes the analysis payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })
    }

    /// Decodes an analysis payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(analysis, _)| analysis)
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })
    }
}

/// Why a project has to be recompiled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StaleReason {
    /// The project was never compiled successfully (or its analysis is unreadable).
    MissingAnalysis,
    /// Sources were added, removed, or changed.
    SourcesChanged(ChangeSet),
    /// A recorded product is missing or differs from its recorded stamp.
    ProductsChanged {
        /// The offending product.
        path: PathBuf,
    },
    /// The products of a direct dependency changed since the last compilation.
    UpstreamChanged {
        /// The dependency whose products changed.
        dependency: String,
    },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::MissingAnalysis => write!(f, "no previous analysis"),
            StaleReason::SourcesChanged(cs) => write!(
                f,
                "{} new, {} modified, {} deleted sources",
                cs.new_files.len(),
                cs.modified_files.len(),
                cs.deleted_files.len()
            ),
            StaleReason::ProductsChanged { path } => {
                write!(f, "product {} changed on disk", path.display())
            }
            StaleReason::UpstreamChanged { dependency } => {
                write!(f, "dependency '{dependency}' changed")
            }
        }
    }
}

/// Outcome of an up-to-date check.
#[derive(Clone, Debug)]
pub enum Freshness {
    /// Nothing changed: the previous products can be reused verbatim.
    UpToDate(Arc<Analysis>),
    /// The project must be recompiled.
    Stale(StaleReason),
}

impl Freshness {
    /// Returns `true` if the project must be recompiled.
    pub fn is_stale(&self) -> bool {
        matches!(self, Freshness::Stale(_))
    }
}

#[derive(Default)]
enum AnalysisSlot {
    #[default]
    Unloaded,
    Loaded(Option<Arc<Analysis>>),
}

/// Loads, caches, and persists analyses, one slot per project.
pub struct AnalysisStore {
    producer: String,
    slots: Slots<ProjectId, AnalysisSlot>,
}

impl AnalysisStore {
    /// Creates an empty store for the current build server version.
    pub fn new() -> Self {
        Self::with_producer(ANALYSIS_PRODUCER)
    }

    /// Creates an empty store that reads and writes analyses tagged with
    /// `producer`.
    pub fn with_producer(producer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            slots: Slots::new(),
        }
    }

    /// Returns the project's analysis, reading it from disk on first access.
    ///
    /// Fail-safe: a missing, corrupt, or foreign analysis file yields `None`.
    pub fn load(&self, project: &Project) -> Option<Arc<Analysis>> {
        let slot = self.slots.slot(&project.id);
        if let AnalysisSlot::Loaded(analysis) = &*lock(&slot) {
            return analysis.clone();
        }

        // Read outside the slot lock; first writer wins.
        let read = self.read_from_disk(project);
        let mut guard = lock(&slot);
        match &*guard {
            AnalysisSlot::Loaded(analysis) => analysis.clone(),
            AnalysisSlot::Unloaded => {
                *guard = AnalysisSlot::Loaded(read.clone());
                read
            }
        }
    }

    fn read_from_disk(&self, project: &Project) -> Option<Arc<Analysis>> {
        let result = read_artifact(&project.analysis_file, &self.producer)
            .and_then(|bytes| Analysis::from_bytes(&bytes));
        match result {
            Ok(analysis) => Some(Arc::new(analysis)),
            Err(e) if e.is_not_found() => {
                debug!(project = %project.id, "no persisted analysis");
                None
            }
            Err(e) => {
                warn!(project = %project.id, error = %e, "ignoring unreadable analysis");
                None
            }
        }
    }

    /// Persists a new analysis for the project, then publishes it.
    ///
    /// Must only be called after a successful compilation. On error the
    /// previously persisted analysis is left in place.
    pub fn commit(&self, project: &Project, analysis: Analysis) -> Result<Arc<Analysis>, CacheError> {
        let bytes = analysis.to_bytes()?;
        write_artifact(&project.analysis_file, &bytes, &self.producer)?;
        let analysis = Arc::new(analysis);
        *lock(&self.slots.slot(&project.id)) = AnalysisSlot::Loaded(Some(Arc::clone(&analysis)));
        debug!(
            project = %project.id,
            sources = analysis.sources.len(),
            products = analysis.products.len(),
            "committed analysis"
        );
        Ok(analysis)
    }

    /// Deletes the persisted analysis so the next check forces a full
    /// recompilation.
    pub fn remove(&self, project: &Project) -> Result<(), CacheError> {
        match std::fs::remove_file(&project.analysis_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::Io {
                    path: project.analysis_file.clone(),
                    source: e,
                })
            }
        }
        *lock(&self.slots.slot(&project.id)) = AnalysisSlot::Loaded(None);
        Ok(())
    }

    /// Puts `previous` back as the project's analysis, or removes the
    /// persisted one when there was none. Undoes a commit whose output
    /// directory could not be promoted.
    pub fn restore(&self, project: &Project, previous: Option<Arc<Analysis>>) -> Result<(), CacheError> {
        match previous {
            Some(analysis) => self.commit(project, Analysis::clone(&analysis)).map(|_| ()),
            None => self.remove(project),
        }
    }

    /// Decides whether the project is up to date for output in `classes_dir`.
    ///
    /// Sources are stamped and compared against the analysis first; if they
    /// match, every recorded product must still exist in `classes_dir` with
    /// its recorded stamp, and `upstream` must equal the recorded dependency
    /// fingerprints.
    pub fn check(
        &self,
        project: &Project,
        classes_dir: &Path,
        upstream: &BTreeMap<String, ContentHash>,
    ) -> Result<Freshness, CacheError> {
        let Some(analysis) = self.load(project) else {
            return Ok(Freshness::Stale(StaleReason::MissingAnalysis));
        };

        let files = project.source_files().map_err(|e| CacheError::Io {
            path: project.sources.first().cloned().unwrap_or_default(),
            source: e,
        })?;
        let current = Stamper::stamp_files(&files);
        let changes = Stamper::detect_changes(&current, &analysis.sources);
        if !changes.is_empty() {
            return Ok(Freshness::Stale(StaleReason::SourcesChanged(changes)));
        }

        for (relative, recorded) in &analysis.products {
            let path = classes_dir.join(relative);
            match Stamper::stamp_file(&path) {
                Ok(stamp) if stamp == *recorded => {}
                _ => return Ok(Freshness::Stale(StaleReason::ProductsChanged { path })),
            }
        }

        let changed_dependency = analysis
            .upstream
            .keys()
            .chain(upstream.keys())
            .find(|dep| analysis.upstream.get(*dep) != upstream.get(*dep));
        if let Some(dependency) = changed_dependency {
            return Ok(Freshness::Stale(StaleReason::UpstreamChanged {
                dependency: dependency.clone(),
            }));
        }

        Ok(Freshness::UpToDate(analysis))
    }

    /// Returns `true` if the project must be recompiled.
    ///
    /// Products are checked in the directory recorded by the analysis itself,
    /// and dependency fingerprints are not considered.
    pub fn needs_recompile(&self, project: &Project) -> Result<bool, CacheError> {
        let Some(analysis) = self.load(project) else {
            return Ok(true);
        };
        self.check(project, &analysis.classes_dir, &analysis.upstream)
            .map(|f| f.is_stale())
    }
}

impl Default for AnalysisStore {
    fn default() -> Self {
        Self::new()
    }
}
