//! Build variants and the toolchain trait that builds one matrix cell.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tree::SourceTree;
use crate::{Error, Result};

/// Target CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    /// OCI platform string, e.g. `linux/arm64`.
    pub fn platform(&self) -> String {
        format!("linux/{}", self.as_str())
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "amd64" | "x86_64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            other => Err(Error::InvalidInput(format!("unknown architecture: {}", other))),
        }
    }
}

/// One cell of the build matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildVariant {
    /// Toolchain version, e.g. `1.19`.
    pub toolchain: String,
    /// Target architecture; `None` builds for the toolchain's default.
    pub arch: Option<Arch>,
}

impl BuildVariant {
    pub fn new(toolchain: impl Into<String>, arch: Option<Arch>) -> Self {
        Self {
            toolchain: toolchain.into(),
            arch,
        }
    }

    /// Deterministic location of `artifact` in the aggregate output tree.
    pub fn output_path(&self, artifact: &str) -> String {
        match self.arch {
            Some(arch) => format!("output/{}/{}/{}", self.toolchain, arch, artifact),
            None => format!("output/{}/{}", self.toolchain, artifact),
        }
    }
}

impl fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arch {
            Some(arch) => write!(f, "{}/{}", self.toolchain, arch),
            None => f.write_str(&self.toolchain),
        }
    }
}

/// Expand toolchain versions × architectures into a variant list.
///
/// An empty architecture list yields one arch-less variant per toolchain.
pub fn expand_variants(toolchains: &[String], archs: &[Arch]) -> Vec<BuildVariant> {
    if archs.is_empty() {
        return toolchains
            .iter()
            .map(|t| BuildVariant::new(t.clone(), None))
            .collect();
    }
    toolchains
        .iter()
        .flat_map(|t| archs.iter().map(move |a| BuildVariant::new(t.clone(), Some(*a))))
        .collect()
}

/// A named cache volume shared by every matrix cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheVolume {
    /// Cache identifier, e.g. `gomods`.
    pub key: String,
    /// Where the cache is mounted inside the build environment.
    pub mount_path: String,
}

impl CacheVolume {
    pub fn new(key: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mount_path: mount_path.into(),
        }
    }
}

/// Everything a toolchain needs to build one variant.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub source: SourceTree,
    pub variant: BuildVariant,
    pub cache: CacheVolume,
    /// Name of the artifact the build produces.
    pub artifact: String,
}

/// Trait for toolchains that compile one matrix cell.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Build the job and return the artifact's bytes.
    async fn build(&self, job: &BuildJob) -> Result<Bytes>;
}
