//! Source tree retrieval.

use async_trait::async_trait;
use std::path::Path;

use crate::Result;
use crate::tree::SourceTree;

/// Trait for anything that can produce a [`SourceTree`].
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Snapshot a workspace directory on the host.
    async fn local(&self, path: &Path) -> Result<SourceTree>;

    /// Snapshot a remote repository at a commit.
    async fn clone_at(&self, url: &str, commit: &str) -> Result<SourceTree>;
}
