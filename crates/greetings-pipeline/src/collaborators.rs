//! The set of external collaborators a pipeline talks to.

use greetings_core::backend::{Backend, Frontend};
use greetings_core::deployer::{AppHost, Registry, StaticHost};
use greetings_core::release::ReleaseHost;
use greetings_core::secret::SecretResolver;
use greetings_core::service::Proxy;
use greetings_core::source::SourceProvider;
use greetings_core::toolchain::Toolchain;
use std::sync::Arc;

/// Handles to every collaborator the stages delegate to.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn Backend>,
    pub frontend: Arc<dyn Frontend>,
    pub toolchain: Arc<dyn Toolchain>,
    pub registry: Arc<dyn Registry>,
    pub app_host: Arc<dyn AppHost>,
    pub static_host: Arc<dyn StaticHost>,
    pub release_host: Arc<dyn ReleaseHost>,
    pub secrets: Arc<dyn SecretResolver>,
    pub source: Arc<dyn SourceProvider>,
    pub proxy: Arc<dyn Proxy>,
}

impl Collaborators {
    /// Use one provider for every role.
    pub fn from_provider<T>(provider: Arc<T>) -> Self
    where
        T: Backend
            + Frontend
            + Toolchain
            + Registry
            + AppHost
            + StaticHost
            + ReleaseHost
            + SecretResolver
            + SourceProvider
            + Proxy
            + 'static,
    {
        Self {
            backend: provider.clone(),
            frontend: provider.clone(),
            toolchain: provider.clone(),
            registry: provider.clone(),
            app_host: provider.clone(),
            static_host: provider.clone(),
            release_host: provider.clone(),
            secrets: provider.clone(),
            source: provider.clone(),
            proxy: provider,
        }
    }
}
