//! KDL configuration parsing for the greetings pipeline.
//!
//! This crate handles parsing of:
//! - Pipeline settings (greetings.kdl)
//! - Container commands backing each collaborator
//! - Variable interpolation

pub mod commands;
pub mod error;
pub mod pipeline;
pub mod shell;
pub mod variables;

pub use commands::{CommandSet, CommandSpec};
pub use error::{ConfigError, ConfigResult};
pub use pipeline::{CONFIG_FILE, PipelineConfig, load_config, parse_config};
pub use variables::{RouteContext, VariableContext, VariableContextBuilder};
