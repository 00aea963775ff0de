//! Variable interpolation for command templates.
//!
//! Supports variables like:
//! - `${project.name}`, `${project.repository}`, `${project.image}`
//! - `${variant.toolchain}` - Toolchain version of a matrix cell
//! - `${variant.arch}` - Architecture (empty when the cell has none)
//! - `${variant.platform}` - OCI platform, e.g. `linux/arm64`
//! - `${cache.key}`, `${cache.path}` - Shared build cache
//! - `${secret.name}`, `${secret.environment}`, `${secret.path}` - Vault lookup
//! - `${route.name}`, `${route.host}`, `${route.internal}`, `${route.external}`
//! - `${frontend.env}` - Frontend build environment
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}`, `${date}`, `${datetime}`
//! - `${name}` - Action-specific values (`tag`, `image`, `app`, `site`, ...)
//!
//! Scripts are filled in with [`VariableContext::interpolate_shell`], which
//! quotes every value as a shell word. Templates must not wrap variables in
//! quotes of their own.

use greetings_core::secret::SecretRequest;
use greetings_core::toolchain::{BuildVariant, CacheVolume};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::pipeline::ProjectConfig;
use crate::shell;

/// Values a command template can reference.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub project: Option<ProjectConfig>,
    pub variant: Option<BuildVariant>,
    pub cache: Option<CacheVolume>,
    pub secret: Option<SecretRequest>,
    pub route: Option<RouteContext>,
    pub frontend_env: Option<String>,
    /// Host environment, as `${env.NAME}`
    pub env: HashMap<String, String>,
    /// Action-specific variables
    pub custom: HashMap<String, String>,
    /// Action-specific word lists; each item is its own shell word
    pub lists: HashMap<String, Vec<String>>,
}

/// Proxy route context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub name: String,
    pub host: String,
    pub internal: u16,
    pub external: u16,
}

// `${name}` or `${scope.name}`
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["project", field] => {
                let project = self.project.as_ref()?;
                match *field {
                    "name" => Some(project.name.clone()),
                    "repository" => Some(project.repository.clone()),
                    "image" => Some(project.image.clone()),
                    "registry" => Some(project.registry.clone()),
                    _ => None,
                }
            }

            ["variant", field] => {
                let variant = self.variant.as_ref()?;
                match *field {
                    "toolchain" => Some(variant.toolchain.clone()),
                    "arch" => Some(variant.arch.map(|a| a.to_string()).unwrap_or_default()),
                    "platform" => Some(variant.arch.map(|a| a.platform()).unwrap_or_default()),
                    _ => None,
                }
            }

            ["cache", "key"] => self.cache.as_ref().map(|c| c.key.clone()),
            ["cache", "path"] => self.cache.as_ref().map(|c| c.mount_path.clone()),

            ["secret", "name"] => self.secret.as_ref().map(|s| s.name.clone()),
            ["secret", "environment"] => self.secret.as_ref().map(|s| s.environment.clone()),
            ["secret", "path"] => self.secret.as_ref().map(|s| s.path.clone()),

            ["route", "name"] => self.route.as_ref().map(|r| r.name.clone()),
            ["route", "host"] => self.route.as_ref().map(|r| r.host.clone()),
            ["route", "internal"] => self.route.as_ref().map(|r| r.internal.to_string()),
            ["route", "external"] => self.route.as_ref().map(|r| r.external.to_string()),

            ["frontend", "env"] => self.frontend_env.clone(),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            ["datetime"] => Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),

            // Single-part names check custom variables
            [name] => self
                .custom
                .get(*name)
                .cloned()
                .or_else(|| self.lists.get(*name).map(|items| items.join(" "))),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate a shell script, quoting each value as one word.
    /// List variables expand to one quoted word per item.
    pub fn interpolate_shell(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                if let Some(items) = self.lists.get(var_name) {
                    return shell::quote_words(items);
                }
                self.resolve(var_name)
                    .map(|value| shell::quote(&value))
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate variables in a map.
    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    /// Names of variables in `input` that this context cannot resolve.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}

/// Assembles a [`VariableContext`] for one planned job.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_project(mut self, project: &ProjectConfig) -> Self {
        self.ctx.project = Some(project.clone());
        self
    }

    pub fn with_variant(mut self, variant: &BuildVariant) -> Self {
        self.ctx.variant = Some(variant.clone());
        self
    }

    pub fn with_cache(mut self, cache: &CacheVolume) -> Self {
        self.ctx.cache = Some(cache.clone());
        self
    }

    pub fn with_secret(mut self, request: &SecretRequest) -> Self {
        self.ctx.secret = Some(request.clone());
        self
    }

    pub fn with_route(
        mut self,
        name: impl Into<String>,
        host: impl Into<String>,
        internal: u16,
        external: u16,
    ) -> Self {
        self.ctx.route = Some(RouteContext {
            name: name.into(),
            host: host.into(),
            internal,
            external,
        });
        self
    }

    pub fn with_frontend_env(mut self, env: impl Into<String>) -> Self {
        self.ctx.frontend_env = Some(env.into());
        self
    }

    /// Expose the host process environment as `${env.*}`.
    pub fn with_process_env(mut self) -> Self {
        self.ctx.env.extend(std::env::vars());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn with_list<S: Into<String>>(
        mut self,
        key: impl Into<String>,
        items: impl IntoIterator<Item = S>,
    ) -> Self {
        self.ctx
            .lists
            .insert(key.into(), items.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
