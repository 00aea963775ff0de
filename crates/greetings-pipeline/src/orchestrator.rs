//! Pipeline orchestrator - runs lint, test and the gated release/deploy stages.

use chrono::{DateTime, Utc};
use greetings_config::PipelineConfig;
use greetings_core::{Credential, Result, RunId, SourceTree};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, info_span};

use crate::collaborators::Collaborators;
use crate::stages::{DeployCredentials, Stages};

/// Caller-supplied options of a CI run.
///
/// Every field distinguishes "absent" from a concrete value.
#[derive(Debug, Clone, Default)]
pub struct CiOptions {
    pub release: Option<bool>,
    pub tag: Option<String>,
    pub vault_token: Option<Credential>,
}

/// Outcome of evaluating the release/deploy gate.
#[derive(Debug)]
pub enum Gate<'a> {
    Open { vault_token: &'a Credential },
    Closed { reason: &'static str },
}

impl CiOptions {
    /// Release and deploy run only for an explicit release with a vault token.
    pub fn gate(&self) -> Gate<'_> {
        match (self.release, &self.vault_token) {
            (Some(true), Some(vault_token)) => Gate::Open { vault_token },
            (Some(true), None) => Gate::Closed {
                reason: "no vault token",
            },
            _ => Gate::Closed {
                reason: "release not requested",
            },
        }
    }
}

/// Event emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted {
        stage: String,
        at: DateTime<Utc>,
    },
    StageCompleted {
        stage: String,
        success: bool,
        at: DateTime<Utc>,
    },
    StageSkipped {
        stage: String,
        reason: String,
        at: DateTime<Utc>,
    },
    PipelineCompleted {
        success: bool,
        at: DateTime<Utc>,
    },
}

/// Orchestrates a CI run over the stage functions.
pub struct PipelineOrchestrator {
    stages: Stages,
    events: Option<mpsc::Sender<PipelineEvent>>,
}

impl PipelineOrchestrator {
    pub fn new(collaborators: Collaborators, config: Arc<PipelineConfig>) -> Self {
        Self {
            stages: Stages::new(collaborators, config),
            events: None,
        }
    }

    /// Emit progress events on `tx`. The receiver must be drained while a
    /// run is in progress.
    pub fn with_events(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    /// Run the full pipeline on `source` and return the transcript.
    ///
    /// Reports are joined with newlines in stage order. Any stage failure
    /// aborts the run and only the error is returned.
    pub async fn ci(&self, source: &SourceTree, options: &CiOptions) -> Result<String> {
        let run_id = RunId::new();
        let span = info_span!("ci", run_id = %run_id.short(), origin = %source.origin());

        async {
            info!(files = source.len(), "Starting pipeline");
            let result = self.ci_inner(source, options).await;
            match &result {
                Ok(_) => info!("Pipeline succeeded"),
                Err(e) => error!(error = %e, "Pipeline failed"),
            }
            self.emit(PipelineEvent::PipelineCompleted {
                success: result.is_ok(),
                at: Utc::now(),
            })
            .await;
            result
        }
        .instrument(span)
        .await
    }

    /// Clone the project repository at `commit` and run [`Self::ci`] on it.
    pub async fn ci_remote(&self, commit: &str, options: &CiOptions) -> Result<String> {
        let url = self.stages.config().project.clone_url();
        info!(url = %url, commit, "Cloning source");
        let source = self
            .stages
            .collaborators()
            .source
            .clone_at(&url, commit)
            .await?;
        self.ci(&source, options).await
    }

    async fn ci_inner(&self, source: &SourceTree, options: &CiOptions) -> Result<String> {
        let mut transcript = self.stage("lint", self.stages.lint(source)).await?;
        let test = self.stage("test", self.stages.unit_test(source)).await?;
        transcript = transcript + "\n" + &test;

        let vault_token = match options.gate() {
            Gate::Open { vault_token } => vault_token,
            Gate::Closed { reason } => {
                self.skip("release", reason).await;
                self.skip("deploy", reason).await;
                return Ok(transcript);
            }
        };

        match &options.tag {
            Some(tag) => {
                let token = self.release_credential(vault_token).await?;
                let release = self
                    .stage("release", self.stages.release(source, tag, token))
                    .await?;
                transcript = transcript + "\n" + &release;
            }
            None => self.skip("release", "no tag").await,
        }

        let credentials = self.deploy_credentials(vault_token).await?;
        let deploy = self
            .stage("deploy", self.stages.deploy(source, &credentials))
            .await?;
        Ok(transcript + "\n" + &deploy)
    }

    /// Resolve the release host token from the vault.
    pub async fn release_credential(&self, vault_token: &Credential) -> Result<Credential> {
        let config = self.stages.config();
        self.resolve(&config.secrets.release, vault_token).await
    }

    /// Resolve every credential the deploy stage needs from the vault.
    pub async fn deploy_credentials(&self, vault_token: &Credential) -> Result<DeployCredentials> {
        let names = &self.stages.config().secrets;
        let app_host_token = self.resolve(&names.app_host, vault_token).await?;
        let static_host_token = self.resolve(&names.static_host, vault_token).await?;
        let registry_user = self.resolve(&names.registry_user, vault_token).await?;
        let registry_password = self.resolve(&names.registry_password, vault_token).await?;

        Ok(DeployCredentials {
            app_host_token,
            static_host_token,
            registry_user: registry_user.reveal("registry username").to_string(),
            registry_password,
        })
    }

    async fn resolve(&self, name: &str, vault_token: &Credential) -> Result<Credential> {
        let request = self.stages.config().vault.request(name);
        self.stages
            .collaborators()
            .secrets
            .resolve(&request, vault_token)
            .await
    }

    async fn stage<T>(&self, name: &str, run: impl Future<Output = Result<T>>) -> Result<T> {
        info!(stage = %name, "Starting stage");
        self.emit(PipelineEvent::StageStarted {
            stage: name.to_string(),
            at: Utc::now(),
        })
        .await;

        let result = run.await;
        match &result {
            Ok(_) => info!(stage = %name, "Stage succeeded"),
            Err(e) => error!(stage = %name, error = %e, "Stage failed"),
        }
        self.emit(PipelineEvent::StageCompleted {
            stage: name.to_string(),
            success: result.is_ok(),
            at: Utc::now(),
        })
        .await;
        result
    }

    async fn skip(&self, name: &str, reason: &str) {
        info!(stage = %name, reason, "Skipping stage");
        self.emit(PipelineEvent::StageSkipped {
            stage: name.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        })
        .await;
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only stops progress reporting
            let _ = tx.send(event).await;
        }
    }
}
