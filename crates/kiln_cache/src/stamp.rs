//! File stamps and change detection.
//!
//! A [`Stamp`] fingerprints one file by content. Stamps are compared
//! structurally, never by timestamp ordering, so a checkout that touches a
//! file without changing it does not trigger recompilation.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use kiln_common::ContentHash;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Content fingerprint of a single file.
///
/// Equality only considers the content hash and the byte size. The
/// modification time is kept as the last-known signal for diagnostics and
/// never participates in equality.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Stamp {
    /// XXH3-128 hash of the file content.
    pub hash: ContentHash,
    /// Size of the file in bytes.
    pub size: u64,
    /// Last modification time in milliseconds since the Unix epoch, if the
    /// platform reports one.
    pub modified_ms: Option<u64>,
}

impl PartialEq for Stamp {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.size == other.size
    }
}

impl Eq for Stamp {}

impl Stamp {
    /// Stamps an in-memory buffer. Mostly useful in tests.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self {
            hash: ContentHash::from_bytes(data),
            size: data.len() as u64,
            modified_ms: None,
        }
    }
}

/// Result of comparing current stamps against recorded stamps.
///
/// Categorizes all files into new (never seen), modified (stamp changed),
/// deleted (recorded but no longer present), and unchanged (stamp matches).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Files that have no recorded stamp.
    pub new_files: Vec<PathBuf>,

    /// Files whose stamp differs from the recorded one.
    pub modified_files: Vec<PathBuf>,

    /// Files that were recorded but are not in the current file set.
    pub deleted_files: Vec<PathBuf>,

    /// Files whose stamp matches the recorded one.
    pub unchanged_files: Vec<PathBuf>,
}

impl ChangeSet {
    /// Returns `true` if there are no changes (no new, modified, or deleted files).
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.modified_files.is_empty() && self.deleted_files.is_empty()
    }

    /// Returns the total number of files that need recompilation (new + modified).
    pub fn dirty_count(&self) -> usize {
        self.new_files.len() + self.modified_files.len()
    }

    /// A change set in which every given file is new.
    pub fn all_new(files: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut new_files: Vec<PathBuf> = files.into_iter().collect();
        new_files.sort();
        Self {
            new_files,
            ..Self::default()
        }
    }
}

/// Counts the bytes read through it, so hashing and sizing take one pass.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Computes stamps for files. Stateless: persistence belongs to the analysis.
pub struct Stamper;

impl Stamper {
    /// Stamps a single file by streaming its content through XXH3.
    pub fn stamp_file(path: &Path) -> Result<Stamp, CacheError> {
        let io_err = |e: io::Error| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let file = File::open(path).map_err(io_err)?;
        let modified_ms = file
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        let mut reader = CountingReader {
            inner: file,
            count: 0,
        };
        let hash = ContentHash::from_reader(&mut reader).map_err(io_err)?;

        Ok(Stamp {
            hash,
            size: reader.count,
            modified_ms,
        })
    }

    /// Stamps many files in parallel.
    ///
    /// Files that cannot be read are silently skipped (they will appear as
    /// deleted in the change set).
    pub fn stamp_files(paths: &[PathBuf]) -> BTreeMap<PathBuf, Stamp> {
        let stamped: Vec<(PathBuf, Stamp)> = paths
            .par_iter()
            .filter_map(|path| Self::stamp_file(path).ok().map(|s| (path.clone(), s)))
            .collect();
        stamped.into_iter().collect()
    }

    /// Compares current stamps against recorded stamps.
    pub fn detect_changes(
        current: &BTreeMap<PathBuf, Stamp>,
        recorded: &BTreeMap<PathBuf, Stamp>,
    ) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for (path, stamp) in current {
            match recorded.get(path) {
                Some(old) if old == stamp => changes.unchanged_files.push(path.clone()),
                Some(_) => changes.modified_files.push(path.clone()),
                None => changes.new_files.push(path.clone()),
            }
        }

        changes.deleted_files = recorded
            .keys()
            .filter(|p| !current.contains_key(*p))
            .cloned()
            .collect();

        // BTreeMap iteration already yields sorted paths
        changes
    }
}
