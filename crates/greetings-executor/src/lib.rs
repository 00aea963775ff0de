//! Container execution for the greetings pipeline.
//!
//! Implements every collaborator trait from `greetings-core` by running the
//! configured commands in containers on the local Docker daemon:
//! - [`runner`]: one-shot jobs and detached services via `bollard`
//! - [`plan`]: command selection and variable interpolation
//! - [`workspace`]: host directories and `git` checkouts as source trees

pub mod collaborators;
pub mod plan;
pub mod runner;
pub mod workspace;

pub use collaborators::{ContainerCollaborators, SERVICE_NETWORK};
pub use plan::JobPlanner;
pub use runner::{ContainerJob, ContainerRunner, JobOutput};
pub use workspace::HostWorkspace;
