//! Single-stage commands.

use anyhow::{Context, Result};
use greetings_executor::workspace::write_tree;
use greetings_core::SourceTree;
use std::path::Path;
use tracing::info;

use super::{Session, cancellable, vault_token};

pub async fn lint(session: &Session) -> Result<()> {
    let source = session.source().await?;
    let orchestrator = session.orchestrator();
    let report = cancellable(async {
        Ok::<_, anyhow::Error>(orchestrator.stages().lint(&source).await?)
    })
    .await?;
    println!("{}", report);
    Ok(())
}

pub async fn test(session: &Session) -> Result<()> {
    let source = session.source().await?;
    let orchestrator = session.orchestrator();
    let report = cancellable(async {
        Ok::<_, anyhow::Error>(orchestrator.stages().unit_test(&source).await?)
    })
    .await?;
    println!("{}", report);
    Ok(())
}

pub async fn build(session: &Session, env: Option<String>, output: &Path) -> Result<()> {
    let source = session.source().await?;
    let orchestrator = session.orchestrator();
    let env = env.unwrap_or_else(|| session.config.deploy.frontend_env.clone());
    let tree = cancellable(async {
        Ok::<_, anyhow::Error>(orchestrator.stages().build(&source, &env).await?)
    })
    .await?;

    // The build tree is rooted at build/
    export(&tree.directory("build"), output).await
}

pub async fn build_matrix(session: &Session, output: &Path) -> Result<()> {
    let source = session.source().await?;
    let orchestrator = session.orchestrator();
    let tree = cancellable(async {
        Ok::<_, anyhow::Error>(orchestrator.stages().build_matrix(&source).await?)
    })
    .await?;
    export(&tree, output).await
}

pub async fn release(session: &Session, tag: &str, token: &str) -> Result<()> {
    let source = session.source().await?;
    let orchestrator = session.orchestrator();
    let vault = vault_token(token);

    let report = cancellable(async {
        let credential = orchestrator
            .release_credential(&vault)
            .await
            .context("Failed to resolve release token")?;
        Ok::<_, anyhow::Error>(orchestrator.stages().release(&source, tag, credential).await?)
    })
    .await?;
    println!("{}", report);
    Ok(())
}

pub async fn deploy(session: &Session, token: &str) -> Result<()> {
    let source = session.source().await?;
    let orchestrator = session.orchestrator();
    let vault = vault_token(token);

    let report = cancellable(async {
        let credentials = orchestrator
            .deploy_credentials(&vault)
            .await
            .context("Failed to resolve deploy credentials")?;
        Ok::<_, anyhow::Error>(orchestrator.stages().deploy(&source, &credentials).await?)
    })
    .await?;
    println!("{}", report);
    Ok(())
}

/// Start the development environment and keep it up until Ctrl-C.
pub async fn serve(session: &Session) -> Result<()> {
    let source = session.source().await?;
    let orchestrator = session.orchestrator();

    let started = cancellable(async {
        Ok::<_, anyhow::Error>(orchestrator.stages().serve(&source).await?)
    })
    .await;
    let handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            session.containers.shutdown().await;
            return Err(e);
        }
    };

    println!("Serving {}", handle);
    for port in &handle.ports {
        println!("  http://localhost:{}", port.external);
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping services");
    session.containers.shutdown().await;
    Ok(())
}

async fn export(tree: &SourceTree, output: &Path) -> Result<()> {
    write_tree(tree.clone(), output.to_path_buf())
        .await
        .with_context(|| format!("Failed to export to {}", output.display()))?;
    for path in tree.paths() {
        println!("{}", output.join(path).display());
    }
    Ok(())
}
