//! Runs collaborator actions as containers on the local Docker daemon.

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, PortBinding};
use bollard::network::CreateNetworkOptions;
use bytes::Bytes;
use futures::StreamExt;
use greetings_core::secret::Credential;
use greetings_core::service::{PortMapping, ServiceHandle};
use greetings_core::toolchain::CacheVolume;
use greetings_core::{Error, Result, SourceTree};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::workspace::{load_tree, write_tree};

/// Mount point of the job's source tree.
pub const SOURCE_DIR: &str = "/src";
/// Mount point collected back as the job's outputs.
pub const OUTPUT_DIR: &str = "/out";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// One containerized action, fully interpolated.
#[derive(Debug, Clone)]
pub struct ContainerJob {
    /// Collaborator name used in errors.
    pub action: &'static str,
    pub image: String,
    pub script: String,
    pub env: BTreeMap<String, String>,
    /// Credentials injected as environment variables.
    pub secrets: Vec<(String, Credential)>,
    pub source: Option<SourceTree>,
    pub cache: Option<CacheVolume>,
    pub docker_socket: bool,
    /// Path under `/out` read back as the artifact.
    pub output: Option<String>,
}

impl ContainerJob {
    pub fn new(action: &'static str, image: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            action,
            image: image.into(),
            script: script.into(),
            env: BTreeMap::new(),
            secrets: Vec::new(),
            source: None,
            cache: None,
            docker_socket: false,
            output: None,
        }
    }

    pub fn with_source(mut self, source: &SourceTree) -> Self {
        self.source = Some(source.clone());
        self
    }

    pub fn with_secret(mut self, var: impl Into<String>, credential: &Credential) -> Self {
        self.secrets.push((var.into(), credential.clone()));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cache(mut self, cache: &CacheVolume) -> Self {
        self.cache = Some(cache.clone());
        self
    }

    pub fn with_docker_socket(mut self, enabled: bool) -> Self {
        self.docker_socket = enabled;
        self
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    /// Environment entries in Docker's `KEY=value` form.
    fn env_entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        for (var, credential) in &self.secrets {
            entries.push(format!("{}={}", var, credential.reveal("container environment")));
        }
        entries
    }

    fn binds(&self, source_dir: &str, output_dir: Option<&str>) -> Vec<String> {
        let mut binds = vec![format!("{}:{}:rw", source_dir, SOURCE_DIR)];
        if let Some(output_dir) = output_dir {
            binds.push(format!("{}:{}:rw", output_dir, OUTPUT_DIR));
        }
        if let Some(cache) = &self.cache {
            binds.push(format!("{}:{}:rw", cache.key, cache.mount_path));
        }
        if self.docker_socket {
            binds.push(format!("{}:{}", DOCKER_SOCKET, DOCKER_SOCKET));
        }
        binds
    }
}

/// What a finished job produced.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub stdout: String,
    /// Everything the job wrote under `/out`.
    pub outputs: SourceTree,
    output: Option<String>,
}

impl JobOutput {
    pub fn new(stdout: impl Into<String>, outputs: SourceTree, output: Option<String>) -> Self {
        Self {
            stdout: stdout.into(),
            outputs,
            output,
        }
    }

    /// The file at the job's declared output path.
    pub fn artifact(&self) -> Result<Bytes> {
        let path = self.declared()?;
        self.outputs
            .file(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("output file {}/{}", OUTPUT_DIR, path)))
    }

    /// The directory at the job's declared output path.
    pub fn directory(&self) -> Result<SourceTree> {
        let path = self.declared()?;
        let tree = self.outputs.directory(path);
        if tree.is_empty() {
            return Err(Error::NotFound(format!("output directory {}/{}", OUTPUT_DIR, path)));
        }
        Ok(tree)
    }

    fn declared(&self) -> Result<&str> {
        self.output
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("command declares no output".to_string()))
    }
}

/// Docker-backed job runner.
pub struct ContainerRunner {
    docker: Docker,
    network: String,
    /// Running service containers and their source directories.
    services: Mutex<Vec<(String, TempDir)>>,
}

impl ContainerRunner {
    /// Connect to the local Docker daemon.
    pub fn new(network: impl Into<String>) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::with_client(docker, network))
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker, network: impl Into<String>) -> Self {
        Self {
            docker,
            network: network.into(),
            services: Mutex::new(Vec::new()),
        }
    }

    fn container_name(action: &str) -> String {
        format!("greetings-{}-{}", action, Uuid::new_v4().simple())
    }

    /// Run `job` to completion and collect its stdout and outputs.
    pub async fn run(&self, job: &ContainerJob) -> Result<JobOutput> {
        self.pull(&job.image).await;

        let source_dir = materialize(job.source.as_ref()).await?;
        let output_dir = tempdir()?;
        let name = Self::container_name(job.action);

        let config = Config {
            image: Some(job.image.clone()),
            cmd: Some(shell(&job.script)),
            env: Some(job.env_entries()),
            working_dir: Some(SOURCE_DIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(job.binds(
                    &path_str(&source_dir),
                    Some(&path_str(&output_dir)),
                )),
                ..Default::default()
            }),
            ..Default::default()
        };

        info!(action = job.action, container = %name, image = %job.image, "Running container");
        let output_path = output_dir.path().to_path_buf();
        self.create(job, &name, config).await?;
        // From here on a dropped future still removes the container
        let container = RunningContainer::new(&self.docker, &name, vec![source_dir, output_dir]);
        if let Err(e) = self.start(job, &name).await {
            container.remove().await;
            return Err(e);
        }

        let result = self.collect(job, &name).await;
        let _dirs = container.remove().await;
        let stdout = result?;

        let outputs = load_tree(output_path).await?;
        debug!(action = job.action, outputs = outputs.len(), "Container finished");
        Ok(JobOutput::new(stdout, outputs, job.output.clone()))
    }

    /// Start `job` detached on the shared network, reachable as `hostname`.
    ///
    /// `publish` maps container ports to host ports.
    pub async fn start_service(
        &self,
        job: &ContainerJob,
        hostname: &str,
        port: u16,
        publish: Option<u16>,
    ) -> Result<ServiceHandle> {
        self.pull(&job.image).await;
        self.ensure_network().await?;

        let source_dir = materialize(job.source.as_ref()).await?;
        let name = Self::container_name(hostname);
        let container_port = format!("{}/tcp", port);

        let port_bindings = publish.map(|external| {
            HashMap::from([(
                container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(external.to_string()),
                }]),
            )])
        });

        let config = Config {
            image: Some(job.image.clone()),
            cmd: Some(shell(&job.script)),
            env: Some(job.env_entries()),
            working_dir: Some(SOURCE_DIR.to_string()),
            exposed_ports: Some(HashMap::from([(container_port, HashMap::new())])),
            host_config: Some(HostConfig {
                binds: Some(job.binds(&path_str(&source_dir), None)),
                network_mode: Some(self.network.clone()),
                port_bindings,
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig {
                endpoints_config: HashMap::from([(
                    self.network.clone(),
                    EndpointSettings {
                        aliases: Some(vec![hostname.to_string()]),
                        ..Default::default()
                    },
                )]),
            }),
            ..Default::default()
        };

        info!(service = hostname, container = %name, port, "Starting service");
        let id = self.create_and_start(job, &name, config).await?;
        self.services
            .lock()
            .map_err(|_| Error::Internal("service registry poisoned".to_string()))?
            .push((id.clone(), source_dir));

        Ok(ServiceHandle {
            name: hostname.to_string(),
            hostname: hostname.to_string(),
            runtime_id: id,
            ports: vec![PortMapping {
                internal: port,
                external: publish.unwrap_or(port),
            }],
        })
    }

    /// Stop and remove every service this runner started.
    pub async fn stop_services(&self) {
        let services = match self.services.lock() {
            Ok(mut services) => std::mem::take(&mut *services),
            Err(_) => return,
        };
        for (id, _source_dir) in services {
            info!(container = %id, "Stopping service");
            self.remove(&id).await;
        }
    }

    async fn pull(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    // Locally built images cannot be pulled
                    warn!(error = %e, "Pull warning");
                }
            }
        }
    }

    async fn ensure_network(&self) -> Result<()> {
        let options = CreateNetworkOptions {
            name: self.network.clone(),
            check_duplicate: true,
            ..Default::default()
        };
        match self.docker.create_network(options).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(Error::Internal(format!("Failed to create network: {}", e))),
        }
    }

    async fn create(&self, job: &ContainerJob, name: &str, config: Config<String>) -> Result<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                Error::collaborator(job.action, format!("failed to create container: {}", e))
            })?;
        Ok(container.id)
    }

    async fn start(&self, job: &ContainerJob, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::collaborator(job.action, format!("failed to start container: {}", e)))
    }

    async fn create_and_start(
        &self,
        job: &ContainerJob,
        name: &str,
        config: Config<String>,
    ) -> Result<String> {
        let id = self.create(job, name, config).await?;
        if let Err(e) = self.start(job, name).await {
            self.remove(name).await;
            return Err(e);
        }
        Ok(id)
    }

    /// Wait for the container to exit and return its stdout.
    async fn collect(&self, job: &ContainerJob, name: &str) -> Result<String> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.docker.wait_container(name, Some(options));
        let exit_code = match wait.next().await {
            Some(Ok(response)) => response.status_code,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                return Err(Error::collaborator(job.action, format!("wait failed: {}", e)));
            }
            None => {
                return Err(Error::collaborator(job.action, "container vanished"));
            }
        };

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut logs = self.docker.logs(name, Some(options));
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(result) = logs.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    let line = String::from_utf8_lossy(&message);
                    debug!(action = job.action, "{}", line.trim_end());
                    stderr.push_str(&line);
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => warn!(error = %e, "Log stream error"),
            }
        }

        if exit_code != 0 {
            return Err(Error::collaborator(
                job.action,
                format!("exited with code {}: {}", exit_code, tail(&stderr, 20)),
            ));
        }
        Ok(stdout.trim_end().to_string())
    }

    async fn remove(&self, name: &str) {
        remove_container(&self.docker, name).await;
    }
}

/// A job container that is force-removed when dropped.
///
/// Holds the job's bind-mounted directories so they outlive the container.
/// Dropping without [`RunningContainer::remove`] (a cancelled run) hands the
/// removal to a background task.
struct RunningContainer {
    docker: Docker,
    name: String,
    dirs: Option<Vec<TempDir>>,
}

impl RunningContainer {
    fn new(docker: &Docker, name: &str, dirs: Vec<TempDir>) -> Self {
        Self {
            docker: docker.clone(),
            name: name.to_string(),
            dirs: Some(dirs),
        }
    }

    /// Remove the container now and hand back its directories.
    async fn remove(mut self) -> Vec<TempDir> {
        let dirs = self.dirs.take().unwrap_or_default();
        remove_container(&self.docker, &self.name).await;
        dirs
    }
}

impl Drop for RunningContainer {
    fn drop(&mut self) {
        let Some(dirs) = self.dirs.take() else {
            return;
        };
        let docker = self.docker.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                info!(container = %name, "Removing abandoned container");
                handle.spawn(async move {
                    remove_container(&docker, &name).await;
                    drop(dirs);
                });
            }
            Err(_) => warn!(container = %name, "No runtime left to remove container"),
        }
    }
}

async fn remove_container(docker: &Docker, name: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(name, Some(options)).await {
        warn!(container = %name, error = %e, "Failed to remove container");
    }
}

fn shell(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn tempdir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("greetings-")
        .tempdir()
        .map_err(|e| Error::Internal(format!("Failed to create temp dir: {}", e)))
}

fn path_str(dir: &TempDir) -> String {
    dir.path().to_string_lossy().to_string()
}

/// Write `source` (or nothing) into a fresh temporary directory.
async fn materialize(source: Option<&SourceTree>) -> Result<TempDir> {
    let dir = tempdir()?;
    if let Some(source) = source {
        write_tree(source.clone(), dir.path().to_path_buf()).await?;
    }
    Ok(dir)
}

/// Last `lines` lines of `text`.
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
