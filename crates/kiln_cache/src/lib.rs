//! Incremental compilation state and result caching.
//!
//! This crate holds everything the build server remembers between
//! compilations:
//!
//! - [`Stamper`] fingerprints files by content ([`Stamp`]).
//! - [`AnalysisStore`] persists one [`Analysis`] per project and decides
//!   whether a project is up to date ([`Freshness`]).
//! - [`ClassesDirManager`] allocates isolated, generation-numbered output
//!   directories per (project, client) pair.
//! - [`ResultCache`] keeps the last [`CompileResult`] of every project plus
//!   its last successful one.
//!
//! All state is partitioned by project, so unrelated projects never contend.

#![warn(missing_docs)]

pub mod analysis;
pub mod artifact;
pub mod classes_dir;
pub mod error;
pub mod result;
pub mod result_cache;
mod slots;
pub mod stamp;

pub use analysis::{Analysis, AnalysisStore, Freshness, StaleReason, ANALYSIS_PRODUCER};
pub use classes_dir::{ClassesDirManager, ClassesDirectory, DirectoryLease, Snapshot};
pub use error::CacheError;
pub use result::{
    Cancellation, CompileResult, CompilerCrash, DurationInfo, Failure, LastSuccessfulResult,
    NotOk, Success,
};
pub use result_cache::ResultCache;
pub use stamp::{ChangeSet, Stamp, Stamper};
