//! In-memory collaborators that record every call.

use async_trait::async_trait;
use bytes::Bytes;
use greetings_core::backend::{Backend, ContainerImage, Frontend};
use greetings_core::deployer::{AppHost, Registry, RegistryAuth, StaticHost};
use greetings_core::release::{ReleaseHost, ReleaseRequest};
use greetings_core::secret::{Credential, SecretRequest, SecretResolver};
use greetings_core::service::{PortMapping, Proxy, ProxyRoute, ServiceHandle};
use greetings_core::source::SourceProvider;
use greetings_core::toolchain::{Arch, BuildJob, Toolchain};
use greetings_core::{Error, Origin, Result, SourceTree};
use std::path::Path;
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeCollaborators {
    calls: Mutex<Vec<String>>,
    failing: Vec<String>,
    hanging: Vec<String>,
    last_release: Mutex<Option<ReleaseRequest>>,
}

/// Records `dropped <call>` when a hanging call is cancelled.
struct DropRecorder<'a> {
    calls: &'a Mutex<Vec<String>>,
    call: String,
}

impl Drop for DropRecorder<'_> {
    fn drop(&mut self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("dropped {}", self.call));
        }
    }
}

impl FakeCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call whose record starts with `prefix`.
    pub fn failing(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    /// Never complete calls whose record starts with `prefix`.
    pub fn hanging(mut self, prefix: &str) -> Self {
        self.hanging.push(prefix.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    pub fn last_release(&self) -> Option<ReleaseRequest> {
        self.last_release.lock().unwrap().clone()
    }

    pub fn source() -> SourceTree {
        SourceTree::from_entries(
            Origin::Local {
                path: "/work/greetings-api".into(),
            },
            [
                ("main.go", "package main"),
                ("go.mod", "module github.com/kpenfound/greetings-api"),
                ("website/index.html", "<h1>Greetings</h1>"),
            ],
        )
    }

    fn record(&self, call: String) -> Result<()> {
        let fail = self.failing.iter().any(|f| call.starts_with(f.as_str()));
        self.calls.lock().unwrap().push(call.clone());
        if fail {
            Err(Error::collaborator("fake", format!("{} failed", call)))
        } else {
            Ok(())
        }
    }

    async fn enter(&self, call: String) -> Result<()> {
        self.record(call.clone())?;
        if self.hanging.iter().any(|h| call.starts_with(h.as_str())) {
            let _recorder = DropRecorder {
                calls: &self.calls,
                call,
            };
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn service(name: &str, internal: u16) -> ServiceHandle {
        ServiceHandle {
            name: name.to_string(),
            hostname: name.to_string(),
            runtime_id: format!("svc-{}", name),
            ports: vec![PortMapping {
                internal,
                external: internal,
            }],
        }
    }
}

#[async_trait]
impl Backend for FakeCollaborators {
    async fn lint(&self, _source: &SourceTree) -> Result<String> {
        self.enter("lint".to_string()).await?;
        Ok("lint: 0 issues".to_string())
    }

    async fn unit_test(&self, _source: &SourceTree) -> Result<String> {
        self.enter("test".to_string()).await?;
        Ok("ok  greetings-api  0.012s".to_string())
    }

    async fn binary(&self, _source: &SourceTree) -> Result<Bytes> {
        self.enter("binary".to_string()).await?;
        Ok(Bytes::from_static(b"ELF"))
    }

    async fn container(&self, _source: &SourceTree, arch: Arch) -> Result<ContainerImage> {
        self.enter(format!("container {}", arch)).await?;
        Ok(ContainerImage {
            arch,
            reference: format!("greetings-api:{}", arch),
        })
    }

    async fn serve(&self, _source: &SourceTree) -> Result<ServiceHandle> {
        self.enter("backend-serve".to_string()).await?;
        Ok(Self::service("backend", 8080))
    }
}

#[async_trait]
impl Frontend for FakeCollaborators {
    async fn build(&self, source: &SourceTree, env: &str) -> Result<SourceTree> {
        self.enter(format!("frontend-build {} files={}", env, source.len())).await?;
        Ok(SourceTree::from_entries(
            Origin::Scratch,
            [("index.html", format!("built for {}", env))],
        ))
    }

    async fn serve(&self, source: &SourceTree) -> Result<ServiceHandle> {
        self.enter(format!("frontend-serve files={}", source.len())).await?;
        Ok(Self::service("frontend", 80))
    }
}

#[async_trait]
impl Toolchain for FakeCollaborators {
    async fn build(&self, job: &BuildJob) -> Result<Bytes> {
        self.enter(format!("toolchain {} cache={}", job.variant, job.cache.key)).await?;
        Ok(Bytes::from(format!(
            "{} built with {}",
            job.artifact, job.variant.toolchain
        )))
    }
}

#[async_trait]
impl Registry for FakeCollaborators {
    async fn publish(
        &self,
        auth: &RegistryAuth,
        image_ref: &str,
        variants: &[ContainerImage],
    ) -> Result<String> {
        let refs: Vec<_> = variants.iter().map(|v| v.reference.as_str()).collect();
        self.enter(format!(
            "publish {} {} user={} at={}",
            image_ref,
            refs.join(","),
            auth.username,
            auth.address
        ))
        .await?;
        Ok(format!("published {}", image_ref))
    }
}

#[async_trait]
impl AppHost for FakeCollaborators {
    async fn deploy(&self, app: &str, image_ref: &str, token: &Credential) -> Result<String> {
        self.enter(format!("app-host {} {} token={}", app, image_ref, token.name())).await?;
        Ok("fly: deployed v42".to_string())
    }
}

#[async_trait]
impl StaticHost for FakeCollaborators {
    async fn deploy(&self, site_dir: &SourceTree, token: &Credential, site: &str) -> Result<String> {
        self.enter(format!(
            "static-host {} files={} token={}",
            site,
            site_dir.len(),
            token.name()
        ))
        .await?;
        Ok("netlify: live at https://dagger-demo.netlify.app".to_string())
    }
}

#[async_trait]
impl ReleaseHost for FakeCollaborators {
    async fn create(&self, request: &ReleaseRequest) -> Result<String> {
        self.enter(format!(
            "release {} {} token={}",
            request.tag,
            request.title,
            request.token.name()
        ))
        .await?;
        *self.last_release.lock().unwrap() = Some(request.clone());
        Ok(format!("released {}", request.tag))
    }
}

#[async_trait]
impl SecretResolver for FakeCollaborators {
    async fn resolve(&self, request: &SecretRequest, vault_token: &Credential) -> Result<Credential> {
        self.enter(format!(
            "secret {} env={} path={} vault={}",
            request.name,
            request.environment,
            request.path,
            vault_token.name()
        ))
        .await?;
        Ok(Credential::new(
            request.name.clone(),
            request.environment.clone(),
            request.path.clone(),
            format!("{}-value", request.name),
        ))
    }
}

#[async_trait]
impl SourceProvider for FakeCollaborators {
    async fn local(&self, path: &Path) -> Result<SourceTree> {
        self.enter(format!("local {}", path.display())).await?;
        Ok(Self::source())
    }

    async fn clone_at(&self, url: &str, commit: &str) -> Result<SourceTree> {
        self.enter(format!("clone {} {}", url, commit)).await?;
        Ok(Self::source())
    }
}

#[async_trait]
impl Proxy for FakeCollaborators {
    async fn compose(&self, routes: &[ProxyRoute]) -> Result<ServiceHandle> {
        let described: Vec<_> = routes
            .iter()
            .map(|r| format!("{}:{}->{}:{}", r.name, r.external_port, r.service.hostname, r.internal_port))
            .collect();
        self.enter(format!("proxy {}", described.join(" "))).await?;
        Ok(ServiceHandle {
            name: "proxy".to_string(),
            hostname: "proxy".to_string(),
            runtime_id: "svc-proxy".to_string(),
            ports: routes
                .iter()
                .map(|r| PortMapping {
                    internal: r.external_port,
                    external: r.external_port,
                })
                .collect(),
        })
    }
}
