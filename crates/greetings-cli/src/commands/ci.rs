//! Full pipeline runs, local and against a remote commit.

use anyhow::{Context, Result};
use greetings_pipeline::{CiOptions, PipelineOrchestrator};
use std::sync::Arc;

use super::{Session, cancellable, print_events, vault_token};
use crate::GateArgs;

impl From<GateArgs> for CiOptions {
    fn from(args: GateArgs) -> Self {
        CiOptions {
            release: args.release,
            tag: args.tag,
            vault_token: args.vault_token.as_deref().map(vault_token),
        }
    }
}

/// Run the pipeline on the local workspace.
pub async fn ci(session: &Session, options: CiOptions) -> Result<()> {
    let source = session.source().await?;
    let orchestrator = session.orchestrator();
    run(orchestrator, |o| async move { o.ci(&source, &options).await }).await
}

/// Run the pipeline on `commit` of the project repository.
pub async fn ci_remote(
    session: &Session,
    commit: &str,
    repository: Option<url::Url>,
    options: CiOptions,
) -> Result<()> {
    let orchestrator = match repository {
        Some(url) => {
            let mut config = (*session.config).clone();
            config.project.repository = url.to_string();
            PipelineOrchestrator::new(session.collaborators(), Arc::new(config))
        }
        None => session.orchestrator(),
    };
    let commit = commit.to_string();
    run(orchestrator, |o| async move { o.ci_remote(&commit, &options).await }).await
}

/// Drive `pipeline` with progress output and print its transcript.
async fn run<F, Fut>(orchestrator: PipelineOrchestrator, pipeline: F) -> Result<()>
where
    F: FnOnce(Arc<PipelineOrchestrator>) -> Fut,
    Fut: std::future::Future<Output = greetings_core::Result<String>>,
{
    let (tx, printer) = print_events();
    let orchestrator = Arc::new(orchestrator.with_events(tx));

    let result = cancellable(async {
        pipeline(orchestrator.clone())
            .await
            .context("Pipeline failed")
    })
    .await;

    // Closing the last sender ends the printer
    drop(orchestrator);
    let _ = printer.await;

    println!("{}", result?);
    Ok(())
}
