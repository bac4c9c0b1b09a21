//! Shared foundational types used across the kiln build server.
//!
//! This crate provides content hashing, project and client identities, the
//! read-only [`Project`] record supplied by the build graph, and the internal
//! error type used to flag orchestration bugs.

#![warn(missing_docs)]

pub mod hash;
pub mod ids;
pub mod project;
pub mod result;

pub use hash::{ContentHash, ContentHasher};
pub use ids::{ClientId, ProjectId};
pub use project::Project;
pub use result::{InternalError, KilnResult};
