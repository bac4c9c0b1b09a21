//! Cheaply clonable identities for projects and build clients.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::hash::ContentHash;

/// The unique name of a project within a build.
///
/// Backed by an `Arc<str>` so it can be cloned freely into cache keys,
/// task states, and log fields.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(Arc<str>);

impl ProjectId {
    /// Creates a project identity from its name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the project name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectId({})", self.0)
    }
}

impl Borrow<str> for ProjectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProjectId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The identity of a client connected to the build server (an editor, a CLI
/// invocation, ...).
///
/// Every client compiles into its own output directories.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(Arc<str>);

impl ClientId {
    /// Creates a client identity.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the raw client id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a directory name that is unique to this client.
    ///
    /// Ids made only of `[A-Za-z0-9._-]` are used verbatim. Anything else is
    /// sanitized and suffixed with a hash of the raw id, so two distinct ids
    /// never map to the same directory.
    pub fn dir_name(&self) -> String {
        let is_safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
        if !self.0.is_empty() && self.0.chars().all(is_safe) && !self.0.starts_with('.') {
            return self.0.to_string();
        }
        let sanitized: String = self
            .0
            .chars()
            .map(|c| if is_safe(c) { c } else { '_' })
            .collect();
        let suffix = ContentHash::from_bytes(self.0.as_bytes()).short(8);
        format!("{}~{suffix}", sanitized.trim_start_matches('.'))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
