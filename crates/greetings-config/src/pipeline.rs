//! Pipeline configuration parsing.
//!
//! Every field has a default, so an empty document (or no file at all)
//! yields the stock greetings pipeline. A `greetings.kdl` only needs the
//! nodes it wants to override:
//!
//! ```kdl
//! project "greetings-api" {
//!     repository "github.com/kpenfound/greetings-api"
//!     image "kylepenfound/greetings-api:latest"
//! }
//!
//! matrix {
//!     toolchain "1.18" "1.19"
//!     cache "gomods"
//! }
//!
//! vault environment="dev" path="/"
//! ```

use crate::commands::{CommandSet, parse_commands};
use crate::{ConfigError, ConfigResult};
use greetings_core::Arch;
use greetings_core::secret::SecretRequest;
use greetings_core::service::PortMapping;
use greetings_core::toolchain::{BuildVariant, CacheVolume, expand_variants};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "greetings.kdl";

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub project: ProjectConfig,
    pub matrix: MatrixConfig,
    pub vault: VaultConfig,
    pub secrets: SecretNames,
    pub deploy: DeployConfig,
    pub serve: ServeConfig,
    pub commands: CommandSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Repository reference without scheme, e.g. `github.com/kpenfound/greetings-api`.
    pub repository: String,
    /// Multi-platform image reference published on deploy.
    pub image: String,
    pub registry: String,
}

impl ProjectConfig {
    /// URL used to clone the repository.
    pub fn clone_url(&self) -> String {
        if self.repository.contains("://") {
            self.repository.clone()
        } else {
            format!("https://{}", self.repository)
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "greetings-api".to_string(),
            repository: "github.com/kpenfound/greetings-api".to_string(),
            image: "kylepenfound/greetings-api:latest".to_string(),
            registry: "index.docker.io".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub toolchains: Vec<String>,
    /// Empty means one default-architecture build per toolchain.
    pub archs: Vec<Arch>,
    pub cache: String,
    pub cache_path: String,
    pub artifact: String,
}

impl MatrixConfig {
    pub fn variants(&self) -> Vec<BuildVariant> {
        expand_variants(&self.toolchains, &self.archs)
    }

    pub fn cache_volume(&self) -> CacheVolume {
        CacheVolume::new(self.cache.clone(), self.cache_path.clone())
    }
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            toolchains: vec!["1.18".to_string(), "1.19".to_string()],
            archs: vec![],
            cache: "gomods".to_string(),
            cache_path: "/cache".to_string(),
            artifact: "greetings-api".to_string(),
        }
    }
}

/// Where secrets live in the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub environment: String,
    pub path: String,
}

impl VaultConfig {
    /// Vault coordinates for the secret called `name`.
    pub fn request(&self, name: &str) -> SecretRequest {
        SecretRequest::new(name, self.environment.clone(), self.path.clone())
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            path: "/".to_string(),
        }
    }
}

/// Names of the secrets the release and deploy stages need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretNames {
    pub release: String,
    pub app_host: String,
    pub static_host: String,
    pub registry_user: String,
    pub registry_password: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            release: "GH_RELEASE_TOKEN".to_string(),
            app_host: "FLY_TOKEN".to_string(),
            static_host: "NETLIFY_TOKEN".to_string(),
            registry_user: "DOCKERHUB_USER".to_string(),
            registry_password: "DOCKERHUB_PASSWORD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Application id on the application host.
    pub app: String,
    /// Site id on the static-site host.
    pub site: String,
    /// Frontend build environment used for releases and deploys.
    pub frontend_env: String,
    /// Architectures bundled into the published image.
    pub archs: Vec<Arch>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            app: "dagger-demo".to_string(),
            site: "dagger-demo".to_string(),
            frontend_env: "netlify".to_string(),
            archs: vec![Arch::Amd64, Arch::Arm64],
        }
    }
}

/// Proxy ports for the development environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    pub backend: PortMapping,
    pub frontend: PortMapping,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            backend: PortMapping {
                external: 8080,
                internal: 8080,
            },
            frontend: PortMapping {
                external: 8081,
                internal: 80,
            },
        }
    }
}

/// Read a configuration file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> ConfigResult<PipelineConfig> {
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse a pipeline configuration from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<PipelineConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = PipelineConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(format!("top-level node '{}'", name)));
        }
        match name {
            "project" => parse_project(node, &mut config.project)?,
            "matrix" => parse_matrix(node, &mut config.matrix)?,
            "vault" => parse_vault(node, &mut config.vault),
            "secrets" => parse_secrets(node, &mut config.secrets)?,
            "deploy" => parse_deploy(node, &mut config.deploy)?,
            "serve" => parse_serve(node, &mut config.serve)?,
            "commands" => parse_commands(node, &mut config.commands)?,
            _ => {} // Ignore unknown nodes
        }
    }

    validate(&config)?;
    Ok(config)
}

fn parse_project(node: &KdlNode, project: &mut ProjectConfig) -> ConfigResult<()> {
    if let Some(name) = get_first_string_arg(node) {
        project.name = name;
    }
    for child in child_nodes(node) {
        let value = || {
            get_first_string_arg(child)
                .ok_or_else(|| ConfigError::MissingField(format!("project {}", child.name().value())))
        };
        match child.name().value() {
            "repository" => project.repository = value()?,
            "image" => project.image = value()?,
            "registry" => project.registry = value()?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_matrix(node: &KdlNode, matrix: &mut MatrixConfig) -> ConfigResult<()> {
    for child in child_nodes(node) {
        match child.name().value() {
            "toolchain" | "toolchains" => matrix.toolchains = get_all_string_args(child),
            "arch" | "archs" => matrix.archs = parse_archs(child)?,
            "cache" => {
                if let Some(key) = get_first_string_arg(child) {
                    matrix.cache = key;
                }
                if let Some(path) = get_string_prop(child, "path") {
                    matrix.cache_path = path;
                }
            }
            "artifact" => {
                matrix.artifact = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("matrix artifact".to_string()))?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_vault(node: &KdlNode, vault: &mut VaultConfig) {
    if let Some(env) = get_string_prop(node, "environment") {
        vault.environment = env;
    }
    if let Some(path) = get_string_prop(node, "path") {
        vault.path = path;
    }
}

fn parse_secrets(node: &KdlNode, secrets: &mut SecretNames) -> ConfigResult<()> {
    for child in child_nodes(node) {
        let key = child.name().value();
        let name = get_first_string_arg(child)
            .ok_or_else(|| ConfigError::MissingField(format!("secret name for '{}'", key)))?;
        match key {
            "release" => secrets.release = name,
            "app-host" => secrets.app_host = name,
            "static-host" => secrets.static_host = name,
            "registry-user" => secrets.registry_user = name,
            "registry-password" => secrets.registry_password = name,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "secrets".to_string(),
                    message: format!("unknown secret role: {}", other),
                });
            }
        }
    }
    Ok(())
}

fn parse_deploy(node: &KdlNode, deploy: &mut DeployConfig) -> ConfigResult<()> {
    for child in child_nodes(node) {
        let value = || {
            get_first_string_arg(child)
                .ok_or_else(|| ConfigError::MissingField(format!("deploy {}", child.name().value())))
        };
        match child.name().value() {
            "app" => deploy.app = value()?,
            "site" => deploy.site = value()?,
            "frontend-env" => deploy.frontend_env = value()?,
            "arch" | "archs" => deploy.archs = parse_archs(child)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_serve(node: &KdlNode, serve: &mut ServeConfig) -> ConfigResult<()> {
    for child in child_nodes(node) {
        match child.name().value() {
            "backend" => serve.backend = parse_port_mapping(child, serve.backend)?,
            "frontend" => serve.frontend = parse_port_mapping(child, serve.frontend)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_port_mapping(node: &KdlNode, current: PortMapping) -> ConfigResult<PortMapping> {
    let field = format!("serve {}", node.name().value());
    Ok(PortMapping {
        external: get_port_prop(node, "external", &field)?.unwrap_or(current.external),
        internal: get_port_prop(node, "internal", &field)?.unwrap_or(current.internal),
    })
}

fn parse_archs(node: &KdlNode) -> ConfigResult<Vec<Arch>> {
    get_all_string_args(node)
        .iter()
        .map(|s| {
            s.parse::<Arch>().map_err(|e| ConfigError::InvalidValue {
                field: node.name().value().to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn validate(config: &PipelineConfig) -> ConfigResult<()> {
    if config.matrix.toolchains.is_empty() {
        return Err(ConfigError::MissingField("matrix toolchain".to_string()));
    }
    if config.deploy.archs.is_empty() {
        return Err(ConfigError::MissingField("deploy arch".to_string()));
    }

    // Duplicate variants would write to the same output path
    let mut toolchains = HashSet::new();
    for toolchain in &config.matrix.toolchains {
        if !toolchains.insert(toolchain) {
            return Err(ConfigError::Duplicate(format!("matrix toolchain '{}'", toolchain)));
        }
    }
    let mut archs = HashSet::new();
    for arch in &config.matrix.archs {
        if !archs.insert(arch) {
            return Err(ConfigError::Duplicate(format!("matrix arch '{}'", arch)));
        }
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

pub(crate) fn child_nodes(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|c| c.nodes().iter())
}

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

pub(crate) fn get_port_prop(node: &KdlNode, name: &str, field: &str) -> ConfigResult<Option<u16>> {
    match node.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|i| u16::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: format!("{} {}", field, name),
                message: format!("expected a port number, got {}", value),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = parse_config("").unwrap();

        assert_eq!(config.project.repository, "github.com/kpenfound/greetings-api");
        assert_eq!(config.project.image, "kylepenfound/greetings-api:latest");
        assert_eq!(config.matrix.toolchains, vec!["1.18", "1.19"]);
        assert_eq!(config.matrix.cache, "gomods");
        assert_eq!(config.vault.environment, "dev");
        assert_eq!(config.secrets.release, "GH_RELEASE_TOKEN");
        assert_eq!(config.deploy.archs, vec![Arch::Amd64, Arch::Arm64]);
        assert_eq!(config.serve.frontend.internal, 80);
    }

    #[test]
    fn test_parse_overrides() {
        let kdl = r#"
            project "greetings-api" {
                repository "github.com/example/greetings"
                image "example/greetings:edge"
            }

            matrix {
                toolchain "1.20" "1.21"
                arch "amd64" "arm64"
                cache "gocache" path="/go/pkg/mod"
            }

            vault environment="prod" path="/ci"

            secrets {
                release "RELEASE_PAT"
            }

            deploy {
                app "greetings-prod"
                arch "amd64"
            }

            serve {
                backend external=9090
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.project.repository, "github.com/example/greetings");
        assert_eq!(config.project.registry, "index.docker.io");
        assert_eq!(config.matrix.variants().len(), 4);
        assert_eq!(config.matrix.cache_volume().mount_path, "/go/pkg/mod");
        assert_eq!(config.vault.request("X").environment, "prod");
        assert_eq!(config.secrets.release, "RELEASE_PAT");
        assert_eq!(config.secrets.app_host, "FLY_TOKEN");
        assert_eq!(config.deploy.app, "greetings-prod");
        assert_eq!(config.deploy.site, "dagger-demo");
        assert_eq!(config.deploy.archs, vec![Arch::Amd64]);
        assert_eq!(config.serve.backend.external, 9090);
        assert_eq!(config.serve.backend.internal, 8080);
    }

    #[test]
    fn test_clone_url() {
        let project = ProjectConfig::default();
        assert_eq!(
            project.clone_url(),
            "https://github.com/kpenfound/greetings-api"
        );
    }

    #[test]
    fn test_reject_unknown_arch() {
        let result = parse_config(r#"matrix { arch "sparc" }"#);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_reject_duplicate_toolchain() {
        let result = parse_config(r#"matrix { toolchain "1.19" "1.19" }"#);
        assert!(matches!(result.unwrap_err(), ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_reject_duplicate_top_level_node() {
        let result = parse_config("vault path=\"/a\"\nvault path=\"/b\"");
        assert!(matches!(result.unwrap_err(), ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_reject_empty_matrix() {
        let result = parse_config("matrix { toolchain }");
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }

    #[test]
    fn test_reject_valueless_deploy_fields() {
        for field in ["app", "site", "frontend-env"] {
            let result = parse_config(&format!("deploy {{ {} }}", field));
            match result.unwrap_err() {
                ConfigError::MissingField(name) => assert_eq!(name, format!("deploy {}", field)),
                other => panic!("Expected missing field for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_reject_unknown_secret_role() {
        let result = parse_config(r#"secrets { pager "PD_TOKEN" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/greetings.kdl")).unwrap();
        assert_eq!(config.deploy.frontend_env, "netlify");
    }
}
