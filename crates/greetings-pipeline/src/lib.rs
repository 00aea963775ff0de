//! Pipeline orchestration for the greetings application.
//!
//! Sequences lint, unit tests and the gated release/deploy stages, fans the
//! build matrix out across toolchain variants and assembles the transcript.
//! All external work goes through the collaborator traits in
//! `greetings-core`.

pub mod archive;
pub mod collaborators;
pub mod matrix;
pub mod orchestrator;
pub mod stages;

#[cfg(test)]
mod testing;

pub use collaborators::Collaborators;
pub use matrix::BuildMatrix;
pub use orchestrator::{CiOptions, Gate, PipelineEvent, PipelineOrchestrator};
pub use stages::{DeployCredentials, Stages};
