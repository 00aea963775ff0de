//! Publishing and hosting collaborator traits.
//!
//! Images go to a container registry, the API runs on an application host
//! (Fly.io) and the website on a static-site host (Netlify).

use async_trait::async_trait;

use crate::Result;
use crate::backend::ContainerImage;
use crate::secret::Credential;
use crate::tree::SourceTree;

/// Login for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    /// Registry address, e.g. `index.docker.io`.
    pub address: String,
    /// Plain username; registries do not treat it as secret.
    pub username: String,
    pub password: Credential,
}

/// Trait for container registries.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Publish `variants` as one multi-platform image at `image_ref`.
    async fn publish(
        &self,
        auth: &RegistryAuth,
        image_ref: &str,
        variants: &[ContainerImage],
    ) -> Result<String>;
}

/// Trait for hosts that run a container image as an application.
#[async_trait]
pub trait AppHost: Send + Sync {
    async fn deploy(&self, app: &str, image_ref: &str, token: &Credential) -> Result<String>;
}

/// Trait for hosts that serve a directory of static files.
#[async_trait]
pub trait StaticHost: Send + Sync {
    async fn deploy(&self, site_dir: &SourceTree, token: &Credential, site: &str)
    -> Result<String>;
}
