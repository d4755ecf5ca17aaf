//! Version control seam.
//!
//! Workers capture the live code revision at spawn, the crash-storm path
//! falls back to the last known-good revision, and completed improvement
//! work is committed and eventually promoted to stable.

use crate::error::VcsError;
use async_trait::async_trait;

/// The version-control collaborator.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// The revision currently checked out. Captured live at every worker
    /// spawn, never cached, so mid-session code changes are observed.
    async fn head_revision(&self) -> std::result::Result<String, VcsError>;

    /// Check out a specific revision.
    async fn checkout(&self, revision: &str) -> std::result::Result<(), VcsError>;

    /// The last revision promoted as known-good.
    async fn stable_revision(&self) -> std::result::Result<String, VcsError>;

    /// Commit current changes and push; returns the new revision.
    async fn commit_and_push(&self, message: &str) -> std::result::Result<String, VcsError>;

    /// Promote a revision as the new stable baseline.
    async fn promote(&self, revision: &str) -> std::result::Result<(), VcsError>;
}
