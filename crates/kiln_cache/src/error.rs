//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur while stamping files, persisting analyses, or
/// managing output directories.
///
/// Reads of persisted state are fail-safe: a corrupt analysis is a cache miss,
/// not an error. These variants surface when state could not be written or a
/// caller asked for the precise reason a read failed.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing a file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An output directory could not be created, promoted, or removed.
    #[error("failed to allocate output directory {path}: {source}")]
    DirectoryAllocation {
        /// The directory that could not be allocated.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An artifact file has an invalid or missing header.
    #[error("invalid artifact header in {path}: {reason}")]
    InvalidHeader {
        /// The artifact file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The artifact format version does not match the current version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the file.
        actual: u32,
    },

    /// The artifact was written by a different build server version.
    #[error("artifact {path} was produced by '{actual}', expected '{expected}'")]
    ProducerMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The producer string of this build server.
        expected: String,
        /// The producer string found in the file.
        actual: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl CacheError {
    /// Returns `true` if this error means the file simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/tmp/core.analysis"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("core.analysis"));
        assert!(err.is_not_found());
    }

    #[test]
    fn directory_allocation_display() {
        let err = CacheError::DirectoryAllocation {
            path: PathBuf::from("/out/core/cli/gen-3"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to allocate output directory"));
        assert!(msg.contains("gen-3"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn checksum_mismatch_display() {
        let err = CacheError::ChecksumMismatch {
            path: PathBuf::from("file.analysis"),
            expected: "aabb".to_string(),
            actual: "ccdd".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("checksum mismatch"));
        assert!(msg.contains("aabb"));
        assert!(msg.contains("ccdd"));
    }

    #[test]
    fn version_mismatch_display() {
        let err = CacheError::VersionMismatch {
            path: PathBuf::from("old.analysis"),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("got 1"));
    }

    #[test]
    fn producer_mismatch_display() {
        let err = CacheError::ProducerMismatch {
            path: PathBuf::from("a.analysis"),
            expected: "kiln 0.2.0".to_string(),
            actual: "kiln 0.1.0".to_string(),
        };
        assert!(err.to_string().contains("'kiln 0.1.0'"));
    }
}
