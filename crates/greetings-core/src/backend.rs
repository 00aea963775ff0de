//! Backend and frontend collaborator traits.
//!
//! The pipeline never compiles, lints or serves anything itself; it asks
//! these collaborators to do it and reports what they return.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::service::ServiceHandle;
use crate::toolchain::Arch;
use crate::tree::SourceTree;

/// A built container image for a single platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub arch: Arch,
    /// Engine-specific image reference (tag or digest).
    pub reference: String,
}

/// Trait for the API backend's toolchain.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run the linter and return its report.
    async fn lint(&self, source: &SourceTree) -> Result<String>;

    /// Run the unit test suite and return its report.
    async fn unit_test(&self, source: &SourceTree) -> Result<String>;

    /// Compile the server binary.
    async fn binary(&self, source: &SourceTree) -> Result<Bytes>;

    /// Build a runnable image for `arch`.
    async fn container(&self, source: &SourceTree, arch: Arch) -> Result<ContainerImage>;

    /// Start the API as a service.
    async fn serve(&self, source: &SourceTree) -> Result<ServiceHandle>;
}

/// Trait for the website's toolchain.
#[async_trait]
pub trait Frontend: Send + Sync {
    /// Build the site for a target environment (e.g. `netlify`).
    async fn build(&self, source: &SourceTree, env: &str) -> Result<SourceTree>;

    /// Start the site as a service.
    async fn serve(&self, source: &SourceTree) -> Result<ServiceHandle>;
}
