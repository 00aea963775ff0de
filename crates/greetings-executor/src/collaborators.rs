//! Every collaborator trait backed by containers on the local daemon.

use async_trait::async_trait;
use bytes::Bytes;
use greetings_config::PipelineConfig;
use greetings_core::backend::{Backend, ContainerImage, Frontend};
use greetings_core::deployer::{AppHost, Registry, RegistryAuth, StaticHost};
use greetings_core::release::{ReleaseHost, ReleaseRequest};
use greetings_core::secret::{SecretRequest, SecretResolver};
use greetings_core::service::{PortMapping, Proxy, ProxyRoute, ServiceHandle};
use greetings_core::source::SourceProvider;
use greetings_core::toolchain::{BuildJob, Toolchain};
use greetings_core::{Arch, Credential, Error, Result, SourceTree};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::plan::JobPlanner;
use crate::runner::ContainerRunner;
use crate::workspace::HostWorkspace;

/// Network shared by services and the proxy.
pub const SERVICE_NETWORK: &str = "greetings";

/// Runs each collaborator action as a container.
pub struct ContainerCollaborators {
    planner: JobPlanner,
    runner: ContainerRunner,
    workspace: HostWorkspace,
}

impl ContainerCollaborators {
    /// Connect to the local Docker daemon.
    pub fn new(config: Arc<PipelineConfig>) -> Result<Self> {
        Ok(Self::with_runner(config, ContainerRunner::new(SERVICE_NETWORK)?))
    }

    pub fn with_runner(config: Arc<PipelineConfig>, runner: ContainerRunner) -> Self {
        Self {
            planner: JobPlanner::new(config),
            runner,
            workspace: HostWorkspace::new(),
        }
    }

    /// Stop every service started through this instance.
    pub async fn shutdown(&self) {
        self.runner.stop_services().await;
    }
}

/// The image reference printed on the last line of a build's stdout.
fn last_line(action: &'static str, stdout: &str) -> Result<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
        .ok_or_else(|| Error::collaborator(action, "printed no image reference"))
}

#[async_trait]
impl Backend for ContainerCollaborators {
    async fn lint(&self, source: &SourceTree) -> Result<String> {
        Ok(self.runner.run(&self.planner.lint(source)?).await?.stdout)
    }

    async fn unit_test(&self, source: &SourceTree) -> Result<String> {
        Ok(self.runner.run(&self.planner.unit_test(source)?).await?.stdout)
    }

    async fn binary(&self, source: &SourceTree) -> Result<Bytes> {
        self.runner.run(&self.planner.binary(source)?).await?.artifact()
    }

    async fn container(&self, source: &SourceTree, arch: Arch) -> Result<ContainerImage> {
        let output = self.runner.run(&self.planner.container(source, arch)?).await?;
        let reference = last_line("container", &output.stdout)?;
        info!(arch = %arch, image = %reference, "Image built");
        Ok(ContainerImage { arch, reference })
    }

    async fn serve(&self, source: &SourceTree) -> Result<ServiceHandle> {
        let service = self.planner.backend_serve(source)?;
        self.runner
            .start_service(&service.job, "backend", service.port, None)
            .await
    }
}

#[async_trait]
impl Frontend for ContainerCollaborators {
    async fn build(&self, source: &SourceTree, env: &str) -> Result<SourceTree> {
        self.runner
            .run(&self.planner.frontend_build(source, env)?)
            .await?
            .directory()
    }

    async fn serve(&self, source: &SourceTree) -> Result<ServiceHandle> {
        let service = self.planner.frontend_serve(source)?;
        self.runner
            .start_service(&service.job, "frontend", service.port, None)
            .await
    }
}

#[async_trait]
impl Toolchain for ContainerCollaborators {
    async fn build(&self, job: &BuildJob) -> Result<Bytes> {
        self.runner.run(&self.planner.toolchain(job)?).await?.artifact()
    }
}

#[async_trait]
impl Registry for ContainerCollaborators {
    async fn publish(
        &self,
        auth: &RegistryAuth,
        image_ref: &str,
        variants: &[ContainerImage],
    ) -> Result<String> {
        let job = self.planner.registry(auth, image_ref, variants)?;
        Ok(self.runner.run(&job).await?.stdout)
    }
}

#[async_trait]
impl AppHost for ContainerCollaborators {
    async fn deploy(&self, app: &str, image_ref: &str, token: &Credential) -> Result<String> {
        let job = self.planner.app_host(app, image_ref, token)?;
        Ok(self.runner.run(&job).await?.stdout)
    }
}

#[async_trait]
impl StaticHost for ContainerCollaborators {
    async fn deploy(&self, site_dir: &SourceTree, token: &Credential, site: &str) -> Result<String> {
        let job = self.planner.static_host(site_dir, token, site)?;
        Ok(self.runner.run(&job).await?.stdout)
    }
}

#[async_trait]
impl ReleaseHost for ContainerCollaborators {
    async fn create(&self, request: &ReleaseRequest) -> Result<String> {
        let job = self.planner.release(request)?;
        Ok(self.runner.run(&job).await?.stdout)
    }
}

#[async_trait]
impl SecretResolver for ContainerCollaborators {
    async fn resolve(&self, request: &SecretRequest, vault_token: &Credential) -> Result<Credential> {
        let output = self.runner.run(&self.planner.secret(request, vault_token)?).await?;
        let value = output.stdout.trim();
        if value.is_empty() {
            return Err(Error::NotFound(format!(
                "secret {} in {}:{}",
                request.name, request.environment, request.path
            )));
        }
        Ok(Credential::new(
            request.name.clone(),
            request.environment.clone(),
            request.path.clone(),
            value,
        ))
    }
}

#[async_trait]
impl SourceProvider for ContainerCollaborators {
    async fn local(&self, path: &Path) -> Result<SourceTree> {
        self.workspace.local(path).await
    }

    async fn clone_at(&self, url: &str, commit: &str) -> Result<SourceTree> {
        self.workspace.clone_at(url, commit).await
    }
}

#[async_trait]
impl Proxy for ContainerCollaborators {
    async fn compose(&self, routes: &[ProxyRoute]) -> Result<ServiceHandle> {
        let mut ids = Vec::new();
        let mut ports = Vec::new();
        for route in routes {
            let job = self.planner.proxy(route)?;
            let hostname = format!("proxy-{}", route.name);
            let handle = self
                .runner
                .start_service(&job, &hostname, route.external_port, Some(route.external_port))
                .await?;
            info!(route = %route.name, port = route.external_port, service = %route.service, "Route ready");
            ids.push(handle.runtime_id);
            ports.push(PortMapping {
                internal: route.external_port,
                external: route.external_port,
            });
        }

        Ok(ServiceHandle {
            name: "proxy".to_string(),
            hostname: "localhost".to_string(),
            runtime_id: ids.join(","),
            ports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_line_is_image_reference() {
        let stdout = "#1 building\n#2 done\nkylepenfound/greetings-api:latest-arm64\n\n";
        assert_eq!(
            last_line("container", stdout).unwrap(),
            "kylepenfound/greetings-api:latest-arm64"
        );
    }

    #[test]
    fn test_empty_stdout_is_collaborator_error() {
        assert!(matches!(
            last_line("container", "  \n"),
            Err(Error::Collaborator { .. })
        ));
    }
}
