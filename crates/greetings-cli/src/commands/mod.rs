//! CLI command implementations.

pub mod ci;
pub mod stage;

use anyhow::{Context, Result};
use greetings_config::{PipelineConfig, load_config};
use greetings_core::Credential;
use greetings_core::source::SourceProvider;
use greetings_core::SourceTree;
use greetings_executor::ContainerCollaborators;
use greetings_pipeline::{Collaborators, PipelineEvent, PipelineOrchestrator};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Name the vault token is known by in logs.
const VAULT_TOKEN_NAME: &str = "GREETINGS_VAULT_TOKEN";

/// Configuration and collaborators shared by every command.
pub struct Session {
    pub config: Arc<PipelineConfig>,
    pub containers: Arc<ContainerCollaborators>,
    source_path: PathBuf,
}

impl Session {
    pub fn open(config_path: &Path, source_path: &Path) -> Result<Self> {
        // A relative config path is looked up inside the workspace
        let config_path = if config_path.is_relative() {
            source_path.join(config_path)
        } else {
            config_path.to_path_buf()
        };
        let config = load_config(&config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
        let config = Arc::new(config);

        let containers = ContainerCollaborators::new(config.clone())
            .context("Failed to connect to Docker")?;

        Ok(Self {
            config,
            containers: Arc::new(containers),
            source_path: source_path.to_path_buf(),
        })
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::from_provider(self.containers.clone())
    }

    pub fn orchestrator(&self) -> PipelineOrchestrator {
        PipelineOrchestrator::new(self.collaborators(), self.config.clone())
    }

    /// Snapshot the local workspace.
    pub async fn source(&self) -> Result<SourceTree> {
        self.containers
            .local(&self.source_path)
            .await
            .with_context(|| format!("Failed to load workspace: {}", self.source_path.display()))
    }
}

pub fn vault_token(value: &str) -> Credential {
    Credential::from_plaintext(VAULT_TOKEN_NAME, value)
}

/// Run `work` until it finishes or Ctrl-C is pressed.
///
/// Dropping `work` on Ctrl-C aborts every in-flight collaborator call.
pub async fn cancellable<T>(work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted");
            Err(greetings_core::Error::Cancelled.into())
        }
    }
}

/// Print progress events to stderr until the sender side closes.
pub fn print_events() -> (mpsc::Sender<PipelineEvent>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("{}", describe(&event));
        }
    });
    (tx, printer)
}

fn describe(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::StageStarted { stage, at } => {
            format!("▶ [{}] Stage '{}' started", at.format("%H:%M:%S"), stage)
        }
        PipelineEvent::StageCompleted { stage, success, at } => {
            let time = at.format("%H:%M:%S");
            if *success {
                format!("✓ [{}] Stage '{}' completed successfully", time, stage)
            } else {
                format!("✗ [{}] Stage '{}' failed", time, stage)
            }
        }
        PipelineEvent::StageSkipped { stage, reason, at } => {
            format!("⊘ [{}] Stage '{}' skipped: {}", at.format("%H:%M:%S"), stage, reason)
        }
        PipelineEvent::PipelineCompleted { success, .. } => {
            if *success {
                "--- Pipeline completed successfully ---".to_string()
            } else {
                "--- Pipeline failed ---".to_string()
            }
        }
    }
}

pub fn validate(path: &Path, json: bool) -> Result<()> {
    match load_config(path) {
        Ok(config) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }
            println!("Configuration is valid");
            println!("  Project:    {}", config.project.name);
            println!("  Repository: {}", config.project.clone_url());
            let variants: Vec<_> = config
                .matrix
                .variants()
                .iter()
                .map(|v| v.to_string())
                .collect();
            println!("  Matrix:     {}", variants.join(", "));
            let archs: Vec<_> = config.deploy.archs.iter().map(|a| a.to_string()).collect();
            println!("  Deploy:     {} ({})", config.deploy.app, archs.join(", "));
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_events() {
        let skipped = PipelineEvent::StageSkipped {
            stage: "release".to_string(),
            reason: "no tag".to_string(),
            at: Default::default(),
        };
        assert_eq!(
            describe(&skipped),
            "⊘ [00:00:00] Stage 'release' skipped: no tag"
        );

        let failed = PipelineEvent::StageCompleted {
            stage: "lint".to_string(),
            success: false,
            at: Default::default(),
        };
        assert_eq!(describe(&failed), "✗ [00:00:00] Stage 'lint' failed");

        let done = PipelineEvent::PipelineCompleted {
            success: true,
            at: Default::default(),
        };
        assert_eq!(describe(&done), "--- Pipeline completed successfully ---");
    }
}
