//! Stage functions.
//!
//! Each stage translates one pipeline step into collaborator calls and
//! normalizes the result into a report or a composed tree. Stages hold no
//! state of their own.

use futures::future::try_join_all;
use futures::try_join;
use greetings_config::PipelineConfig;
use greetings_core::deployer::RegistryAuth;
use greetings_core::release::ReleaseRequest;
use greetings_core::service::{ProxyRoute, ServiceHandle};
use greetings_core::{Credential, Result, SourceTree};
use std::sync::Arc;
use tracing::info;

use crate::archive::pack_directory;
use crate::collaborators::Collaborators;
use crate::matrix::BuildMatrix;

/// Directory of the frontend sources inside the repository.
pub const WEBSITE_DIR: &str = "website";

/// Name of the release asset holding the compressed frontend build.
pub const WEBSITE_ARCHIVE: &str = "website.tar.gz";

/// Credentials the deploy stage needs.
#[derive(Debug, Clone)]
pub struct DeployCredentials {
    pub app_host_token: Credential,
    pub static_host_token: Credential,
    /// Registries do not treat the username as secret.
    pub registry_user: String,
    pub registry_password: Credential,
}

/// The pipeline's stage functions.
#[derive(Clone)]
pub struct Stages {
    collaborators: Collaborators,
    config: Arc<PipelineConfig>,
}

impl Stages {
    pub fn new(collaborators: Collaborators, config: Arc<PipelineConfig>) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the backend linter.
    pub async fn lint(&self, source: &SourceTree) -> Result<String> {
        self.collaborators.backend.lint(source).await
    }

    /// Run the backend unit tests.
    pub async fn unit_test(&self, source: &SourceTree) -> Result<String> {
        self.collaborators.backend.unit_test(source).await
    }

    /// Build the backend binary and the frontend for `env`.
    ///
    /// The result holds the binary at `build/<artifact>` and the site under
    /// `build/website/`.
    pub async fn build(&self, source: &SourceTree, env: &str) -> Result<SourceTree> {
        let website = source.directory(WEBSITE_DIR);
        let (binary, site) = try_join!(
            self.collaborators.backend.binary(source),
            self.collaborators.frontend.build(&website, env),
        )?;

        Ok(SourceTree::empty()
            .with_file(&format!("/build/{}", self.config.matrix.artifact), binary)
            .with_directory("build/website/", &site))
    }

    /// Build every configured matrix variant.
    pub async fn build_matrix(&self, source: &SourceTree) -> Result<SourceTree> {
        let matrix = &self.config.matrix;
        BuildMatrix::new(
            self.collaborators.toolchain.clone(),
            matrix.cache_volume(),
            matrix.artifact.clone(),
        )
        .run(source, &matrix.variants())
        .await
    }

    /// Publish a tagged release with the compressed frontend attached.
    pub async fn release(&self, source: &SourceTree, tag: &str, token: Credential) -> Result<String> {
        let build = self.build(source, &self.config.deploy.frontend_env).await?;
        let assets = pack_directory(&build.directory("build"), WEBSITE_DIR, WEBSITE_ARCHIVE)?;

        let request = ReleaseRequest {
            repository: self.config.project.repository.clone(),
            tag: tag.to_string(),
            title: format!("Release {}", tag),
            token,
            assets,
        };
        info!(tag, assets = request.assets.len(), "Creating release");
        self.collaborators.release_host.create(&request).await
    }

    /// Ship the backend image and the website.
    pub async fn deploy(&self, source: &SourceTree, credentials: &DeployCredentials) -> Result<String> {
        let project = &self.config.project;
        let deploy = &self.config.deploy;

        // Backend
        let images = try_join_all(
            deploy
                .archs
                .iter()
                .map(|arch| self.collaborators.backend.container(source, *arch)),
        )
        .await?;
        let auth = RegistryAuth {
            address: project.registry.clone(),
            username: credentials.registry_user.clone(),
            password: credentials.registry_password.clone(),
        };
        let published = self
            .collaborators
            .registry
            .publish(&auth, &project.image, &images)
            .await?;
        info!(image = %project.image, result = %published, "Image published");

        let backend_result = self
            .collaborators
            .app_host
            .deploy(&deploy.app, &project.image, &credentials.app_host_token)
            .await?;

        // Frontend
        let site = self
            .collaborators
            .frontend
            .build(&source.directory(WEBSITE_DIR), &deploy.frontend_env)
            .await?;
        let frontend_result = self
            .collaborators
            .static_host
            .deploy(&site, &credentials.static_host_token, &deploy.site)
            .await?;

        Ok(format!(
            "BACKEND\n\n{}\n\nFRONTEND\n\n{}",
            backend_result, frontend_result
        ))
    }

    /// Start the backend and frontend behind a reverse proxy.
    pub async fn serve(&self, source: &SourceTree) -> Result<ServiceHandle> {
        let website = source.directory(WEBSITE_DIR);
        let (backend, frontend) = try_join!(
            self.collaborators.backend.serve(source),
            self.collaborators.frontend.serve(&website),
        )?;

        let ports = &self.config.serve;
        let routes = [
            ProxyRoute::new(backend, "backend", ports.backend.external, ports.backend.internal),
            ProxyRoute::new(frontend, "frontend", ports.frontend.external, ports.frontend.internal),
        ];
        self.collaborators.proxy.compose(&routes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::unpack;
    use crate::testing::FakeCollaborators;
    use greetings_core::Error;

    fn stages(fake: &Arc<FakeCollaborators>) -> Stages {
        Stages::new(
            Collaborators::from_provider(fake.clone()),
            Arc::new(PipelineConfig::default()),
        )
    }

    fn credentials() -> DeployCredentials {
        DeployCredentials {
            app_host_token: Credential::from_plaintext("FLY_TOKEN", "fly"),
            static_host_token: Credential::from_plaintext("NETLIFY_TOKEN", "netlify"),
            registry_user: "kylepenfound".to_string(),
            registry_password: Credential::from_plaintext("DOCKERHUB_PASSWORD", "pw"),
        }
    }

    #[tokio::test]
    async fn test_lint_and_test_pass_reports_through() {
        let fake = Arc::new(FakeCollaborators::new());
        let stages = stages(&fake);
        let source = FakeCollaborators::source();

        assert_eq!(stages.lint(&source).await.unwrap(), "lint: 0 issues");
        assert_eq!(
            stages.unit_test(&source).await.unwrap(),
            "ok  greetings-api  0.012s"
        );
    }

    async fn within_deadline<T>(work: impl std::future::Future<Output = T>) -> T {
        tokio::time::timeout(std::time::Duration::from_secs(5), work)
            .await
            .expect("stage waited on a pending sibling")
    }

    #[tokio::test]
    async fn test_build_halves_run_concurrently() {
        let fake = Arc::new(
            FakeCollaborators::new()
                .hanging("binary")
                .failing("frontend-build"),
        );
        let result = within_deadline(stages(&fake).build(&FakeCollaborators::source(), "netlify")).await;

        assert!(matches!(result, Err(Error::Collaborator { .. })));
        assert!(fake.called("dropped binary"));
    }

    #[tokio::test]
    async fn test_deploy_architectures_run_concurrently() {
        let fake = Arc::new(
            FakeCollaborators::new()
                .hanging("container amd64")
                .failing("container arm64"),
        );
        let result =
            within_deadline(stages(&fake).deploy(&FakeCollaborators::source(), &credentials())).await;

        assert!(matches!(result, Err(Error::Collaborator { .. })));
        assert!(fake.called("dropped container amd64"));
        assert!(!fake.called("publish"));
    }

    #[tokio::test]
    async fn test_lint_error_propagates_unchanged() {
        let fake = Arc::new(FakeCollaborators::new().failing("lint"));
        let err = stages(&fake)
            .lint(&FakeCollaborators::source())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "fake failed: lint failed");
    }

    #[tokio::test]
    async fn test_build_mounts_both_outputs() {
        let fake = Arc::new(FakeCollaborators::new());
        let build = stages(&fake)
            .build(&FakeCollaborators::source(), "netlify")
            .await
            .unwrap();

        assert_eq!(
            build.paths().collect::<Vec<_>>(),
            vec!["build/greetings-api", "build/website/index.html"]
        );
        // Only the website directory goes to the frontend toolchain
        assert!(fake.called("frontend-build netlify files=1"));
    }

    #[tokio::test]
    async fn test_release_attaches_archive_only() {
        let fake = Arc::new(FakeCollaborators::new());
        let token = Credential::from_plaintext("GH_RELEASE_TOKEN", "gh");
        let report = stages(&fake)
            .release(&FakeCollaborators::source(), "v1.0", token)
            .await
            .unwrap();

        assert_eq!(report, "released v1.0");
        let request = fake.last_release().unwrap();
        assert_eq!(request.title, "Release v1.0");
        assert_eq!(request.repository, "github.com/kpenfound/greetings-api");
        assert!(!request.assets.has_directory("website"));
        assert_eq!(
            request.assets.paths().collect::<Vec<_>>(),
            vec!["greetings-api", "website.tar.gz"]
        );

        let files = unpack(request.assets.file(WEBSITE_ARCHIVE).unwrap());
        assert_eq!(
            files,
            vec![("website/index.html".to_string(), b"built for netlify".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_deploy_report_sections() {
        let fake = Arc::new(FakeCollaborators::new());
        let report = stages(&fake)
            .deploy(&FakeCollaborators::source(), &credentials())
            .await
            .unwrap();

        assert_eq!(
            report,
            "BACKEND\n\nfly: deployed v42\n\nFRONTEND\n\nnetlify: live at https://dagger-demo.netlify.app"
        );
    }

    #[tokio::test]
    async fn test_deploy_publishes_both_architectures() {
        let fake = Arc::new(FakeCollaborators::new());
        stages(&fake)
            .deploy(&FakeCollaborators::source(), &credentials())
            .await
            .unwrap();

        assert!(fake.called("container amd64"));
        assert!(fake.called("container arm64"));
        assert!(fake.called(
            "publish kylepenfound/greetings-api:latest greetings-api:amd64,greetings-api:arm64 \
             user=kylepenfound at=index.docker.io"
        ));
        assert!(fake.called(
            "app-host dagger-demo kylepenfound/greetings-api:latest token=FLY_TOKEN"
        ));
        assert!(fake.called("static-host dagger-demo files=1 token=NETLIFY_TOKEN"));
    }

    #[tokio::test]
    async fn test_deploy_stops_when_publish_fails() {
        let fake = Arc::new(FakeCollaborators::new().failing("publish"));
        let result = stages(&fake)
            .deploy(&FakeCollaborators::source(), &credentials())
            .await;

        assert!(matches!(result, Err(Error::Collaborator { .. })));
        assert!(!fake.called("app-host"));
        assert!(!fake.called("static-host"));
    }

    #[tokio::test]
    async fn test_serve_returns_proxy_handle() {
        let fake = Arc::new(FakeCollaborators::new());
        let handle = stages(&fake)
            .serve(&FakeCollaborators::source())
            .await
            .unwrap();

        assert_eq!(handle.name, "proxy");
        assert!(fake.called("proxy backend:8080->backend:8080 frontend:8081->frontend:80"));
    }

    #[tokio::test]
    async fn test_build_matrix_uses_config() {
        let fake = Arc::new(FakeCollaborators::new());
        let output = stages(&fake)
            .build_matrix(&FakeCollaborators::source())
            .await
            .unwrap();

        assert_eq!(output.len(), 2);
        assert!(output.file("output/1.18/greetings-api").is_some());
    }
}
