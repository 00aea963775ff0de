//! Host filesystem access: loading source trees and cloning commits.

use async_trait::async_trait;
use bytes::Bytes;
use greetings_core::source::SourceProvider;
use greetings_core::{Error, Origin, Result, SourceTree};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Directories never loaded into a source tree.
const IGNORED_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Loads local directories and clones remote commits with `git`.
#[derive(Debug, Clone, Default)]
pub struct HostWorkspace;

impl HostWorkspace {
    pub fn new() -> Self {
        Self
    }

    async fn git(dir: &Path, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::collaborator("git", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, "git command failed");
            return Err(Error::collaborator("git", stderr.trim().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceProvider for HostWorkspace {
    async fn local(&self, path: &Path) -> Result<SourceTree> {
        let path = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loading workspace");
        let tree = load_tree(path.clone()).await?;
        Ok(SourceTree::from_entries(
            Origin::Local { path },
            tree.entries().map(|(p, c)| (p.to_string(), c.clone())),
        ))
    }

    async fn clone_at(&self, url: &str, commit: &str) -> Result<SourceTree> {
        let dir = tempfile::Builder::new()
            .prefix("greetings-clone-")
            .tempdir()
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!(url = %url, commit, path = %dir.path().display(), "Cloning repository");
        Self::git(dir.path(), &["init", "--quiet"]).await?;
        Self::git(dir.path(), &["fetch", "--quiet", "--depth", "1", url, commit]).await?;
        Self::git(dir.path(), &["checkout", "--quiet", "FETCH_HEAD"]).await?;

        let tree = load_tree(dir.path().to_path_buf()).await?;
        info!(files = tree.len(), "Repository cloned");
        Ok(SourceTree::from_entries(
            Origin::Remote {
                url: url.to_string(),
                commit: commit.to_string(),
            },
            tree.entries().map(|(p, c)| (p.to_string(), c.clone())),
        ))
    }
}

/// Read every file under `root` into a tree.
pub async fn load_tree(root: PathBuf) -> Result<SourceTree> {
    tokio::task::spawn_blocking(move || {
        let mut entries = BTreeMap::new();
        read_dir_into(&root, &root, &mut entries)?;
        Ok(SourceTree::from_entries(Origin::Scratch, entries))
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))?
}

/// Write every file of `tree` below `root`.
pub async fn write_tree(tree: SourceTree, root: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        for (path, contents) in tree.entries() {
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
            std::fs::write(&target, contents).map_err(|e| io_error(&target, e))?;
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))?
}

fn read_dir_into(root: &Path, dir: &Path, entries: &mut BTreeMap<String, Bytes>) -> Result<()> {
    let listing = std::fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    for entry in listing {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_error(&path, e))?;

        if file_type.is_dir() {
            let name = entry.file_name();
            if IGNORED_DIRS.iter().any(|d| name == *d) {
                continue;
            }
            read_dir_into(root, &path, entries)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| Error::Internal(e.to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let contents = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
            entries.insert(key, Bytes::from(contents));
        }
    }
    Ok(())
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Internal(format!("{}: {}", path.display(), e))
}
