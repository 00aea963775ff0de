//! Container commands that back each collaborator.
//!
//! The executor runs every external action as a shell script inside a
//! container. Scripts are `${...}` templates (see [`crate::variables`])
//! whose values are shell-quoted on the way in, so a template writes
//! `${tag}` and never `"${tag}"`. Credentials never appear in them and are
//! passed as environment variables instead (`$VAULT_TOKEN`,
//! `$REGISTRY_PASSWORD`, ...).
//!
//! ```kdl
//! commands {
//!     lint image="golangci/golangci-lint:v1.55" {
//!         run "golangci-lint run -v --timeout 5m"
//!     }
//!     toolchain image="golang:${variant.toolchain}" {
//!         run "go build -o /out/${artifact}"
//!         output "${artifact}"
//!         env {
//!             GOMODCACHE "/cache"
//!         }
//!     }
//! }
//! ```

use crate::pipeline::{child_nodes, get_bool_prop, get_first_string_arg, get_port_prop, get_string_prop};
use crate::{ConfigError, ConfigResult};
use kdl::KdlNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One containerized action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Image to run (may contain variables).
    pub image: String,
    /// Shell script run with `/bin/sh -c`.
    pub run: String,
    /// Path under `/out` read back as the action's artifact.
    pub output: Option<String>,
    /// Mount the host Docker socket (image builds, registry pushes).
    pub docker_socket: bool,
    /// Port the action listens on when run as a service.
    pub port: Option<u16>,
    /// Extra environment variables (values may contain variables).
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(image: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            run: run.into(),
            output: None,
            docker_socket: false,
            port: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_docker_socket(mut self) -> Self {
        self.docker_socket = true;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// The command behind every collaborator action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSet {
    pub lint: CommandSpec,
    pub test: CommandSpec,
    pub binary: CommandSpec,
    pub container: CommandSpec,
    pub backend_serve: CommandSpec,
    pub frontend_build: CommandSpec,
    pub frontend_serve: CommandSpec,
    /// Per-route template; the executor runs one instance per route.
    pub proxy: CommandSpec,
    pub toolchain: CommandSpec,
    pub registry: CommandSpec,
    pub app_host: CommandSpec,
    pub static_host: CommandSpec,
    pub release: CommandSpec,
    pub vault: CommandSpec,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            lint: CommandSpec::new(
                "golangci/golangci-lint:v1.55",
                "golangci-lint run -v --timeout 5m",
            ),
            test: CommandSpec::new("golang:1.21", "go test -v ./..."),
            binary: CommandSpec::new("golang:1.21", "go build -o /out/${artifact}")
                .with_output("${artifact}")
                .with_env("CGO_ENABLED", "0"),
            container: CommandSpec::new(
                "docker:27-cli",
                "docker buildx build --platform ${variant.platform} \
                 --tag ${image}-${variant.arch} --load . >&2 \
                 && echo ${image}-${variant.arch}",
            )
            .with_docker_socket(),
            backend_serve: CommandSpec::new("golang:1.21", "go run .").with_port(8080),
            frontend_build: CommandSpec::new(
                "node:20-alpine",
                "npm ci && npm run build -- --env ${frontend.env} && cp -r dist/. /out/",
            )
            .with_output("."),
            frontend_serve: CommandSpec::new(
                "nginx:alpine",
                "cp -r /src/. /usr/share/nginx/html/ && nginx -g 'daemon off;'",
            )
            .with_port(80),
            proxy: CommandSpec::new(
                "caddy:2-alpine",
                "caddy reverse-proxy --from :${route.external} --to ${route.host}:${route.internal}",
            ),
            toolchain: CommandSpec::new("golang:${variant.toolchain}", "go build -o /out/${artifact}")
                .with_output("${artifact}")
                .with_env("GOMODCACHE", "${cache.path}")
                .with_env("GOARCH", "${variant.arch}"),
            registry: CommandSpec::new(
                "docker:27-cli",
                "echo \"$REGISTRY_PASSWORD\" | docker login ${registry} \
                 --username \"$REGISTRY_USER\" --password-stdin \
                 && for ref in ${variants}; do docker push \"$ref\"; done \
                 && docker manifest create ${image} ${variants} \
                 && docker manifest push ${image}",
            )
            .with_docker_socket(),
            app_host: CommandSpec::new(
                "flyio/flyctl:latest",
                "FLY_API_TOKEN=\"$APP_HOST_TOKEN\" flyctl deploy --app ${app} --image ${image}",
            ),
            static_host: CommandSpec::new(
                "node:20-alpine",
                "npx --yes netlify-cli deploy --dir . --site ${site} \
                 --auth \"$STATIC_HOST_TOKEN\" --prod",
            ),
            release: CommandSpec::new(
                "maniator/gh:latest",
                "GH_TOKEN=\"$RELEASE_TOKEN\" gh release create ${tag} \
                 --repo ${repository} --title ${title} ${assets}",
            ),
            vault: CommandSpec::new(
                "infisical/cli:latest",
                "infisical secrets get ${secret.name} --env ${secret.environment} \
                 --path ${secret.path} --token \"$VAULT_TOKEN\" --plain --silent",
            ),
        }
    }
}

impl CommandSet {
    fn slot(&mut self, name: &str) -> Option<&mut CommandSpec> {
        let spec = match name {
            "lint" => &mut self.lint,
            "test" => &mut self.test,
            "binary" => &mut self.binary,
            "container" => &mut self.container,
            "backend-serve" => &mut self.backend_serve,
            "frontend-build" => &mut self.frontend_build,
            "frontend-serve" => &mut self.frontend_serve,
            "proxy" => &mut self.proxy,
            "toolchain" => &mut self.toolchain,
            "registry" => &mut self.registry,
            "app-host" => &mut self.app_host,
            "static-host" => &mut self.static_host,
            "release" => &mut self.release,
            "vault" => &mut self.vault,
            _ => return None,
        };
        Some(spec)
    }
}

/// Apply a `commands { ... }` block on top of `commands`.
pub(crate) fn parse_commands(node: &KdlNode, commands: &mut CommandSet) -> ConfigResult<()> {
    for child in child_nodes(node) {
        let name = child.name().value();
        let spec = commands
            .slot(name)
            .ok_or_else(|| ConfigError::UnknownCommand(name.to_string()))?;
        parse_command(child, spec)?;
    }
    Ok(())
}

fn parse_command(node: &KdlNode, spec: &mut CommandSpec) -> ConfigResult<()> {
    let field = format!("command {}", node.name().value());

    if let Some(image) = get_string_prop(node, "image") {
        spec.image = image;
    }
    if let Some(socket) = get_bool_prop(node, "docker-socket") {
        spec.docker_socket = socket;
    }
    if let Some(port) = get_port_prop(node, "port", &field)? {
        spec.port = Some(port);
    }

    for child in child_nodes(node) {
        match child.name().value() {
            "image" => {
                spec.image = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField(format!("{} image", field)))?;
            }
            "run" => {
                spec.run = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField(format!("{} run", field)))?;
            }
            "output" => spec.output = get_first_string_arg(child),
            "env" => {
                for var in child_nodes(child) {
                    if let Some(value) = get_first_string_arg(var) {
                        spec.env.insert(var.name().value().to_string(), value);
                    }
                }
            }
            _ => {}
        }
    }

    if spec.image.is_empty() {
        return Err(ConfigError::MissingField(format!("{} image", field)));
    }
    Ok(())
}
