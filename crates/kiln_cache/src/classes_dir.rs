//! Isolated, generation-numbered output directories.
//!
//! Each (project, client) pair owns the directory tree
//! `<output_root>/<client>/gen-<n>`. A compilation writes into a staging
//! directory `gen-<n+1>.staging` that nobody reads; only a successful
//! compilation promotes it with an atomic rename, at which point it becomes
//! the current generation. Old generations stay on disk until pruned.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use kiln_common::{ClientId, Project, ProjectId};
use tracing::debug;

use crate::error::CacheError;
use crate::slots::{lock, Slots};
use crate::stamp::{Stamp, Stamper};

/// Prefix of generation directory names.
const GENERATION_PREFIX: &str = "gen-";

/// Suffix of not-yet-promoted generation directories.
const STAGING_SUFFIX: &str = ".staging";

/// Stamps of every file in an output directory, keyed by relative path.
pub type Snapshot = BTreeMap<PathBuf, Stamp>;

/// One generation of a (project, client) output directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassesDirectory {
    /// Absolute path of the directory.
    pub path: PathBuf,
    /// Generation number; 0 is the empty directory allocated before any
    /// successful compilation.
    pub generation: u64,
}

#[derive(Default)]
struct DirState {
    initialized: bool,
    current: u64,
    staged: Option<u64>,
    highest: u64,
}

type Key = (ProjectId, ClientId);

/// Allocates and rotates per-client output directories.
pub struct ClassesDirManager {
    slots: Slots<Key, DirState>,
    leases: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl ClassesDirManager {
    /// Creates a manager with no allocated directories.
    pub fn new() -> Self {
        Self {
            slots: Slots::new(),
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn client_root(project: &Project, client: &ClientId) -> PathBuf {
        project.output_root.join(client.dir_name())
    }

    /// Path of generation `generation` for (project, client).
    pub fn generation_path(project: &Project, client: &ClientId, generation: u64) -> PathBuf {
        Self::client_root(project, client).join(format!("{GENERATION_PREFIX}{generation}"))
    }

    fn staging_path(project: &Project, client: &ClientId, generation: u64) -> PathBuf {
        Self::client_root(project, client)
            .join(format!("{GENERATION_PREFIX}{generation}{STAGING_SUFFIX}"))
    }

    /// Returns the current output directory, allocating it on first use.
    ///
    /// The first allocation resumes the highest generation already on disk
    /// (left by an earlier server process) or creates generation 0.
    pub fn get_or_create(
        &self,
        project: &Project,
        client: &ClientId,
    ) -> Result<ClassesDirectory, CacheError> {
        let slot = self.slots.slot(&(project.id.clone(), client.clone()));
        let mut state = lock(&slot);
        Self::ensure_initialized(&mut state, project, client)?;
        let path = Self::generation_path(project, client, state.current);
        create_dir(&path)?;
        Ok(ClassesDirectory {
            path,
            generation: state.current,
        })
    }

    /// Returns the current output directory without allocating anything.
    pub fn current(&self, project: &Project, client: &ClientId) -> Option<ClassesDirectory> {
        let slot = self.slots.get(&(project.id.clone(), client.clone()))?;
        let state = lock(&slot);
        state.initialized.then(|| ClassesDirectory {
            path: Self::generation_path(project, client, state.current),
            generation: state.current,
        })
    }

    /// Creates an empty staging directory for the next generation and
    /// returns its path. The current generation is untouched.
    pub fn prepare(&self, project: &Project, client: &ClientId) -> Result<PathBuf, CacheError> {
        let slot = self.slots.slot(&(project.id.clone(), client.clone()));
        let mut state = lock(&slot);
        Self::ensure_initialized(&mut state, project, client)?;
        let generation = match state.staged {
            Some(g) => g,
            None => state.highest + 1,
        };
        let path = Self::staging_path(project, client, generation);
        remove_dir(&path)?;
        create_dir(&path)?;
        state.staged = Some(generation);
        state.highest = state.highest.max(generation);
        debug!(project = %project.id, client = %client, generation, "prepared staging directory");
        Ok(path)
    }

    /// The directory the staged generation will occupy once promoted, if a
    /// generation is staged.
    pub fn staged(&self, project: &Project, client: &ClientId) -> Option<ClassesDirectory> {
        let slot = self.slots.get(&(project.id.clone(), client.clone()))?;
        let generation = lock(&slot).staged?;
        Some(ClassesDirectory {
            path: Self::generation_path(project, client, generation),
            generation,
        })
    }

    /// Promotes the staged generation (or a fresh empty one) to current and
    /// returns it. The previous generation is retained.
    pub fn rotate(
        &self,
        project: &Project,
        client: &ClientId,
    ) -> Result<ClassesDirectory, CacheError> {
        let slot = self.slots.slot(&(project.id.clone(), client.clone()));
        let mut state = lock(&slot);
        Self::ensure_initialized(&mut state, project, client)?;
        let generation = match state.staged {
            Some(g) => g,
            None => {
                let g = state.highest + 1;
                create_dir(&Self::staging_path(project, client, g))?;
                g
            }
        };

        let staging = Self::staging_path(project, client, generation);
        let path = Self::generation_path(project, client, generation);
        remove_dir(&path)?;
        std::fs::rename(&staging, &path).map_err(|e| CacheError::DirectoryAllocation {
            path: path.clone(),
            source: e,
        })?;

        state.staged = None;
        state.current = generation;
        state.highest = state.highest.max(generation);
        debug!(project = %project.id, client = %client, generation, "rotated output directory");
        Ok(ClassesDirectory { path, generation })
    }

    /// Deletes the staged generation, if any, without touching the current one.
    pub fn discard(&self, project: &Project, client: &ClientId) -> Result<(), CacheError> {
        let Some(slot) = self.slots.get(&(project.id.clone(), client.clone())) else {
            return Ok(());
        };
        let mut state = lock(&slot);
        if let Some(generation) = state.staged.take() {
            remove_dir(&Self::staging_path(project, client, generation))?;
            if state.highest == generation {
                state.highest -= 1;
            }
            debug!(project = %project.id, client = %client, generation, "discarded staging directory");
        }
        Ok(())
    }

    /// Marks the current generation as being read. Pruning never deletes a
    /// generation while a lease on it is alive.
    pub fn lease(&self, project: &Project, client: &ClientId) -> Result<DirectoryLease, CacheError> {
        let dir = self.get_or_create(project, client)?;
        *self
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(dir.path.clone())
            .or_insert(0) += 1;
        Ok(DirectoryLease {
            dir,
            leases: Arc::clone(&self.leases),
        })
    }

    fn is_leased(&self, path: &Path) -> bool {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .is_some_and(|n| *n > 0)
    }

    /// Deletes old generations of (project, client), keeping the newest
    /// `keep` promoted generations. The current generation, the staged one,
    /// and leased generations are never deleted. Leftover staging directories
    /// from interrupted compilations are removed. Returns the number of
    /// directories deleted.
    pub fn prune(
        &self,
        project: &Project,
        client: &ClientId,
        keep: usize,
    ) -> Result<usize, CacheError> {
        let slot = self.slots.slot(&(project.id.clone(), client.clone()));
        let mut state = lock(&slot);
        Self::ensure_initialized(&mut state, project, client)?;

        let (mut promoted, staging) = scan_generations(&Self::client_root(project, client))?;
        promoted.sort_unstable_by(|a, b| b.cmp(a));

        let mut removed = 0;
        for generation in promoted.into_iter().skip(keep) {
            let path = Self::generation_path(project, client, generation);
            if generation == state.current || self.is_leased(&path) {
                continue;
            }
            remove_dir(&path)?;
            removed += 1;
        }
        for generation in staging {
            if state.staged == Some(generation) {
                continue;
            }
            remove_dir(&Self::staging_path(project, client, generation))?;
            removed += 1;
        }
        if removed > 0 {
            debug!(project = %project.id, client = %client, removed, "pruned output generations");
        }
        Ok(removed)
    }

    /// Stamps every file below `dir`, keyed by path relative to `dir`.
    pub fn snapshot(dir: &Path) -> Result<Snapshot, CacheError> {
        let mut files = Vec::new();
        collect_files(dir, dir, &mut files).map_err(|e| CacheError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        files
            .into_iter()
            .map(|relative| {
                let stamp = Stamper::stamp_file(&dir.join(&relative))?;
                Ok((relative, stamp))
            })
            .collect()
    }

    fn ensure_initialized(
        state: &mut DirState,
        project: &Project,
        client: &ClientId,
    ) -> Result<(), CacheError> {
        if state.initialized {
            return Ok(());
        }
        let root = Self::client_root(project, client);
        let (promoted, staging) = scan_generations(&root)?;
        let current = promoted.iter().copied().max().unwrap_or(0);
        let highest = promoted
            .iter()
            .chain(staging.iter())
            .copied()
            .max()
            .unwrap_or(0);
        *state = DirState {
            initialized: true,
            current,
            staged: None,
            highest,
        };
        Ok(())
    }
}

impl Default for ClassesDirManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard keeping a generation alive while it is being read.
pub struct DirectoryLease {
    dir: ClassesDirectory,
    leases: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl DirectoryLease {
    /// The leased directory.
    pub fn dir(&self) -> &ClassesDirectory {
        &self.dir
    }
}

impl Drop for DirectoryLease {
    fn drop(&mut self) {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = leases.get_mut(&self.dir.path) {
            *count -= 1;
            if *count == 0 {
                leases.remove(&self.dir.path);
            }
        }
    }
}

/// Lists promoted and staging generation numbers found in `root`.
fn scan_generations(root: &Path) -> Result<(Vec<u64>, Vec<u64>), CacheError> {
    let mut promoted = Vec::new();
    let mut staging = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((promoted, staging)),
        Err(e) => {
            return Err(CacheError::DirectoryAllocation {
                path: root.to_path_buf(),
                source: e,
            })
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(GENERATION_PREFIX) else {
            continue;
        };
        if let Some(number) = rest.strip_suffix(STAGING_SUFFIX) {
            if let Ok(g) = number.parse() {
                staging.push(g);
            }
        } else if let Ok(g) = rest.parse() {
            promoted.push(g);
        }
    }
    Ok((promoted, staging))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), CacheError> {
    std::fs::create_dir_all(path).map_err(|e| CacheError::DirectoryAllocation {
        path: path.to_path_buf(),
        source: e,
    })
}

fn remove_dir(path: &Path) -> Result<(), CacheError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::DirectoryAllocation {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
