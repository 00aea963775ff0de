//! Core domain types and collaborator traits for the greetings pipeline.
//!
//! This crate contains:
//! - Source tree snapshots and credentials
//! - Build variants and the toolchain trait
//! - Capability traits for every external collaborator (backend and
//!   frontend toolchains, registry, hosts, release host, vault, source)
//! - Service handles and proxy composition

pub mod backend;
pub mod deployer;
pub mod error;
pub mod id;
pub mod release;
pub mod secret;
pub mod service;
pub mod source;
pub mod toolchain;
pub mod tree;

pub use error::{Error, Result};
pub use id::RunId;
pub use secret::Credential;
pub use toolchain::{Arch, BuildVariant};
pub use tree::{Origin, SourceTree};
