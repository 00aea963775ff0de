//! Build matrix runner - fans one build out across toolchain/arch variants.

use futures::future::try_join_all;
use greetings_core::toolchain::{BuildJob, BuildVariant, CacheVolume, Toolchain};
use greetings_core::{Error, Origin, Result, SourceTree};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Runs one toolchain build per variant and merges the artifacts.
pub struct BuildMatrix {
    toolchain: Arc<dyn Toolchain>,
    /// Shared by every variant; the toolchain handles concurrent access.
    cache: CacheVolume,
    artifact: String,
}

impl BuildMatrix {
    pub fn new(toolchain: Arc<dyn Toolchain>, cache: CacheVolume, artifact: impl Into<String>) -> Self {
        Self {
            toolchain,
            cache,
            artifact: artifact.into(),
        }
    }

    /// Build every variant concurrently.
    ///
    /// The result holds exactly one artifact per variant at
    /// [`BuildVariant::output_path`]. The first failing variant aborts the
    /// remaining builds and is reported as [`Error::Variant`].
    pub async fn run(&self, source: &SourceTree, variants: &[BuildVariant]) -> Result<SourceTree> {
        if variants.is_empty() {
            return Err(Error::InvalidInput("build matrix has no variants".to_string()));
        }
        let mut seen = HashSet::new();
        for variant in variants {
            if !seen.insert(variant) {
                return Err(Error::InvalidInput(format!(
                    "duplicate build variant: {}",
                    variant
                )));
            }
        }

        info!(variants = variants.len(), cache = %self.cache.key, "Starting build matrix");

        let builds = variants.iter().map(|variant| self.build_variant(source, variant));
        let outputs = try_join_all(builds).await?;

        Ok(SourceTree::from_entries(Origin::Scratch, outputs))
    }

    async fn build_variant(
        &self,
        source: &SourceTree,
        variant: &BuildVariant,
    ) -> Result<(String, bytes::Bytes)> {
        let job = BuildJob {
            source: source.clone(),
            variant: variant.clone(),
            cache: self.cache.clone(),
            artifact: self.artifact.clone(),
        };

        info!(variant = %variant, "Building variant");
        match self.toolchain.build(&job).await {
            Ok(artifact) => {
                info!(variant = %variant, bytes = artifact.len(), "Variant built");
                Ok((variant.output_path(&self.artifact), artifact))
            }
            Err(e) => {
                error!(variant = %variant, error = %e, "Variant failed");
                Err(Error::Variant {
                    variant: variant.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }
}
