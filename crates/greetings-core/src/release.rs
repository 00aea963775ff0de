//! Source release host abstraction.

use async_trait::async_trait;

use crate::Result;
use crate::secret::Credential;
use crate::tree::SourceTree;

/// A tagged release with attached assets.
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    /// Repository reference, e.g. `github.com/kpenfound/greetings-api`.
    pub repository: String,
    pub tag: String,
    pub title: String,
    pub token: Credential,
    /// Every file in this tree is attached to the release.
    pub assets: SourceTree,
}

/// Trait for release hosts (GitHub releases).
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    async fn create(&self, request: &ReleaseRequest) -> Result<String>;
}
