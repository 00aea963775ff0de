//! Immutable source tree snapshots.
//!
//! A [`SourceTree`] is a flat map of normalized file paths to contents.
//! Every operation that "changes" a tree returns a new tree; the original
//! is never touched, so a tree can be shared freely between concurrent
//! stages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a tree came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// A directory on the host.
    Local { path: PathBuf },
    /// A remote repository checked out at a commit.
    Remote { url: String, commit: String },
    /// Produced by the pipeline itself (build outputs, archives).
    Scratch,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Local { path } => write!(f, "{}", path.display()),
            Origin::Remote { url, commit } => write!(f, "{}@{}", url, commit),
            Origin::Scratch => write!(f, "scratch"),
        }
    }
}

/// A snapshot of a file hierarchy.
///
/// Only files are stored; directories exist implicitly through their
/// files' paths.
#[derive(Debug, Clone)]
pub struct SourceTree {
    origin: Origin,
    entries: Arc<BTreeMap<String, Bytes>>,
}

impl SourceTree {
    /// An empty tree with a scratch origin.
    pub fn empty() -> Self {
        Self::new(Origin::Scratch)
    }

    /// An empty tree with the given origin.
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            entries: Arc::new(BTreeMap::new()),
        }
    }

    /// Build a tree from `(path, contents)` pairs.
    pub fn from_entries<P, C>(origin: Origin, entries: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<str>,
        C: Into<Bytes>,
    {
        let entries = entries
            .into_iter()
            .filter_map(|(path, contents)| {
                let path = normalize(path.as_ref());
                (!path.is_empty()).then(|| (path, contents.into()))
            })
            .collect();
        Self {
            origin,
            entries: Arc::new(entries),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(path, contents)` in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c))
    }

    /// Iterate over all file paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Contents of the file at `path`, if present.
    pub fn file(&self, path: &str) -> Option<&Bytes> {
        self.entries.get(&normalize(path))
    }

    /// True if at least one file lives under `path/`.
    pub fn has_directory(&self, path: &str) -> bool {
        let prefix = dir_prefix(path);
        if prefix.is_empty() {
            return !self.entries.is_empty();
        }
        self.entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(p, _)| p.starts_with(&prefix))
    }

    /// A new tree with `contents` written at `path`.
    pub fn with_file(&self, path: &str, contents: impl Into<Bytes>) -> Self {
        let path = normalize(path);
        let mut entries = (*self.entries).clone();
        if !path.is_empty() {
            entries.insert(path, contents.into());
        }
        self.derive(entries)
    }

    /// A new tree with every file of `other` placed under `path`.
    ///
    /// Files already present at the same paths are overwritten.
    pub fn with_directory(&self, path: &str, other: &SourceTree) -> Self {
        let prefix = dir_prefix(path);
        let mut entries = (*self.entries).clone();
        for (p, c) in other.entries.iter() {
            entries.insert(format!("{}{}", prefix, p), c.clone());
        }
        self.derive(entries)
    }

    /// The sub-tree rooted at `path`, with paths made relative to it.
    pub fn directory(&self, path: &str) -> Self {
        let prefix = dir_prefix(path);
        let entries = self
            .entries
            .iter()
            .filter_map(|(p, c)| {
                p.strip_prefix(prefix.as_str())
                    .map(|rest| (rest.to_string(), c.clone()))
            })
            .collect();
        self.derive(entries)
    }

    /// A new tree with everything under `path` removed.
    pub fn without_directory(&self, path: &str) -> Self {
        let prefix = dir_prefix(path);
        if prefix.is_empty() {
            return self.derive(BTreeMap::new());
        }
        let entries = self
            .entries
            .iter()
            .filter(|(p, _)| !p.starts_with(&prefix))
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        self.derive(entries)
    }

    fn derive(&self, entries: BTreeMap<String, Bytes>) -> Self {
        Self {
            origin: self.origin.clone(),
            entries: Arc::new(entries),
        }
    }
}

impl PartialEq for SourceTree {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for SourceTree {}

/// Normalize a tree path: strip leading/trailing separators and `.` segments,
/// and resolve `..` against the preceding segment.
///
/// The root has no parent, so a `..` there is dropped and a normalized path
/// never leaves the tree.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn dir_prefix(path: &str) -> String {
    let path = normalize(path);
    if path.is_empty() {
        path
    } else {
        format!("{}/", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SourceTree {
        SourceTree::from_entries(
            Origin::Scratch,
            [
                ("main.go", "package main"),
                ("website/index.html", "<html/>"),
                ("website/css/site.css", "body{}"),
            ],
        )
    }

    #[test]
    fn test_normalize_paths() {
        assert_eq!(normalize("/build/greetings-api"), "build/greetings-api");
        assert_eq!(normalize("build/website/"), "build/website");
        assert_eq!(normalize("./a//b/./c"), "a/b/c");
        assert_eq!(normalize("website/../main.go"), "main.go");
        assert_eq!(normalize("/"), "");
    }

    #[test]
    fn test_parent_segments_stay_inside_root() {
        assert_eq!(normalize("../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize("a/../../b"), "b");
        assert_eq!(normalize(".."), "");

        let tree = SourceTree::from_entries(Origin::Scratch, [("../escape.txt", "x"), ("..", "y")]);
        assert_eq!(tree.paths().collect::<Vec<_>>(), vec!["escape.txt"]);
    }

    #[test]
    fn test_with_file_does_not_mutate_original() {
        let tree = sample();
        let extended = tree.with_file("/build/greetings-api", "binary");

        assert!(tree.file("build/greetings-api").is_none());
        assert_eq!(
            extended.file("build/greetings-api").map(|b| b.as_ref()),
            Some(b"binary".as_ref())
        );
        assert_eq!(extended.len(), tree.len() + 1);
    }

    #[test]
    fn test_directory_rebases_paths() {
        let website = sample().directory("website");

        assert_eq!(
            website.paths().collect::<Vec<_>>(),
            vec!["css/site.css", "index.html"]
        );
    }

    #[test]
    fn test_with_directory_mounts_subtree() {
        let website = sample().directory("website");
        let build = SourceTree::empty().with_directory("build/website/", &website);

        assert!(build.has_directory("build/website"));
        assert!(build.file("build/website/index.html").is_some());
    }

    #[test]
    fn test_without_directory() {
        let tree = sample().without_directory("website");

        assert_eq!(tree.paths().collect::<Vec<_>>(), vec!["main.go"]);
        assert!(!tree.has_directory("website"));
    }

    #[test]
    fn test_has_directory_ignores_sibling_prefixes() {
        let tree = SourceTree::from_entries(Origin::Scratch, [("website-old/a", "x")]);
        assert!(!tree.has_directory("website"));
    }

    #[test]
    fn test_origin_display() {
        let origin = Origin::Remote {
            url: "https://github.com/kpenfound/greetings-api".to_string(),
            commit: "abc123".to_string(),
        };
        assert_eq!(
            origin.to_string(),
            "https://github.com/kpenfound/greetings-api@abc123"
        );
    }
}
