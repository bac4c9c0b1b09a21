//! Framed binary artifact files.
//!
//! Every persisted artifact starts with a header containing magic bytes, the
//! format version, the producing build server version, and a checksum of the
//! payload. Writes are atomic: the bytes go to a sibling temporary file that
//! is renamed over the destination, so readers never observe a torn file.

use std::path::{Path, PathBuf};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a kiln artifact.
const ARTIFACT_MAGIC: [u8; 4] = *b"KILN";

/// Current artifact format version. Increment on breaking changes to
/// the header or payload format.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every artifact for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// Build server version that produced this artifact.
    pub producer: String,

    /// Content hash of the payload data (for integrity checks).
    pub checksum: ContentHash,
}

/// Writes `data` to `path` behind a validated header.
///
/// Parent directories are created as needed. Layout: 4-byte header length
/// (little-endian), bincode header, payload.
pub fn write_artifact(path: &Path, data: &[u8], producer: &str) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let header = ArtifactHeader {
        magic: ARTIFACT_MAGIC,
        format_version: ARTIFACT_FORMAT_VERSION,
        producer: producer.to_string(),
        checksum: ContentHash::from_bytes(data),
    };

    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(data);

    let tmp = temp_path(path);
    std::fs::write(&tmp, &output).map_err(|e| CacheError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Reads an artifact, validating its header, and returns the payload.
///
/// Fails with a precise [`CacheError`] when the file is missing, truncated,
/// corrupt, of another format version, or written by another producer.
pub fn read_artifact(path: &Path, producer: &str) -> Result<Vec<u8>, CacheError> {
    let raw = std::fs::read(path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if raw.len() < 4 {
        return Err(invalid("file too short for header length"));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if raw.len() < 4 + header_len {
        return Err(invalid("truncated header"));
    }

    let (header, _): (ArtifactHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
            .map_err(|_| invalid("undecodable header"))?;

    if header.magic != ARTIFACT_MAGIC {
        return Err(invalid("missing magic bytes"));
    }
    if header.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: ARTIFACT_FORMAT_VERSION,
            actual: header.format_version,
        });
    }
    if header.producer != producer {
        return Err(CacheError::ProducerMismatch {
            path: path.to_path_buf(),
            expected: producer.to_string(),
            actual: header.producer,
        });
    }

    let payload = &raw[4 + header_len..];
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    Ok(payload.to_vec())
}

/// Returns the sibling temporary path used while writing `path`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCER: &str = "kiln test";

    fn framed(header: &ArtifactHeader, payload: &[u8]) -> Vec<u8> {
        let header_bytes =
            bincode::serde::encode_to_vec(header, bincode::config::standard()).unwrap();
        let mut output = Vec::new();
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(payload);
        output
    }

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("core.analysis");
        write_artifact(&path, b"payload bytes", PRODUCER).unwrap();
        assert_eq!(read_artifact(&path, PRODUCER).unwrap(), b"payload bytes");
        assert!(!dir.path().join("nested").join("core.analysis.tmp").exists());
    }

    #[test]
    fn overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.analysis");
        write_artifact(&path, b"first", PRODUCER).unwrap();
        write_artifact(&path, b"second", PRODUCER).unwrap();
        assert_eq!(read_artifact(&path, PRODUCER).unwrap(), b"second");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_artifact(&dir.path().join("nope"), PRODUCER).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn truncated_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short");
        std::fs::write(&path, b"AB").unwrap();
        let err = read_artifact(&path, PRODUCER).unwrap_err();
        assert!(matches!(err, CacheError::InvalidHeader { .. }));
    }

    #[test]
    fn garbage_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage");
        std::fs::write(&path, b"\x02\x00\x00\x00garbage data").unwrap();
        assert!(read_artifact(&path, PRODUCER).is_err());
    }

    #[test]
    fn wrong_magic_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("badmagic");
        let header = ArtifactHeader {
            magic: *b"BAAD",
            format_version: ARTIFACT_FORMAT_VERSION,
            producer: PRODUCER.to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        std::fs::write(&path, framed(&header, b"data")).unwrap();
        let err = read_artifact(&path, PRODUCER).unwrap_err();
        assert!(matches!(err, CacheError::InvalidHeader { .. }));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oldver");
        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: 999,
            producer: PRODUCER.to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        std::fs::write(&path, framed(&header, b"data")).unwrap();
        let err = read_artifact(&path, PRODUCER).unwrap_err();
        assert!(matches!(err, CacheError::VersionMismatch { actual: 999, .. }));
    }

    #[test]
    fn other_producer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other");
        write_artifact(&path, b"data", "kiln 0.0.1").unwrap();
        let err = read_artifact(&path, PRODUCER).unwrap_err();
        assert!(matches!(err, CacheError::ProducerMismatch { .. }));
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tampered");
        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            producer: PRODUCER.to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        std::fs::write(&path, framed(&header, b"tampered")).unwrap();
        let err = read_artifact(&path, PRODUCER).unwrap_err();
        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
    }
}
