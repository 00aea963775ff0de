//! Greetings pipeline CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "greetings")]
#[command(about = "CI/CD pipeline for the greetings API and website", long_about = None)]
struct Cli {
    /// Workspace holding the application source
    #[arg(long, global = true, default_value = ".")]
    source: PathBuf,

    /// Pipeline configuration file
    #[arg(long, global = true, env = "GREETINGS_CONFIG", default_value = greetings_config::CONFIG_FILE)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Options deciding whether release and deploy run.
#[derive(Args)]
pub struct GateArgs {
    /// Release and deploy after the checks pass
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    release: Option<bool>,

    /// Tag to publish a release under
    #[arg(long)]
    tag: Option<String>,

    /// Token for the secret vault
    #[arg(long, env = "GREETINGS_VAULT_TOKEN", hide_env_values = true)]
    vault_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint and test, then release and deploy when requested
    Ci {
        #[command(flatten)]
        gate: GateArgs,
    },
    /// Run the CI pipeline against a commit of the project repository
    CiRemote {
        /// Commit, branch or tag to check out
        commit: String,
        /// Repository to clone instead of the configured one
        #[arg(long)]
        repository: Option<url::Url>,
        #[command(flatten)]
        gate: GateArgs,
    },
    /// Run the backend linter
    Lint,
    /// Run the backend unit tests
    Test,
    /// Build the backend binary and the website
    Build {
        /// Frontend target environment
        #[arg(long)]
        env: Option<String>,
        /// Directory to export the build to
        #[arg(long, default_value = "build")]
        output: PathBuf,
    },
    /// Build the backend across every toolchain variant
    BuildMatrix {
        /// Directory to export the artifacts to
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    /// Publish a tagged release
    Release {
        /// Release tag
        #[arg(long)]
        tag: String,
        /// Token for the secret vault
        #[arg(long, env = "GREETINGS_VAULT_TOKEN", hide_env_values = true)]
        vault_token: String,
    },
    /// Publish the backend image and deploy both halves
    Deploy {
        /// Token for the secret vault
        #[arg(long, env = "GREETINGS_VAULT_TOKEN", hide_env_values = true)]
        vault_token: String,
    },
    /// Run the backend and website behind a local proxy
    Serve,
    /// Validate a pipeline configuration
    Validate {
        /// Path to the configuration file
        path: Option<PathBuf>,
        /// Print the resolved configuration as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Commands::Validate { path, json } = &cli.command {
        return commands::validate(path.as_ref().unwrap_or(&cli.config), *json);
    }

    let session = commands::Session::open(&cli.config, &cli.source)?;

    match cli.command {
        Commands::Ci { gate } => {
            commands::ci::ci(&session, gate.into()).await?;
        }
        Commands::CiRemote {
            commit,
            repository,
            gate,
        } => {
            commands::ci::ci_remote(&session, &commit, repository, gate.into()).await?;
        }
        Commands::Lint => commands::stage::lint(&session).await?,
        Commands::Test => commands::stage::test(&session).await?,
        Commands::Build { env, output } => {
            commands::stage::build(&session, env, &output).await?;
        }
        Commands::BuildMatrix { output } => {
            commands::stage::build_matrix(&session, &output).await?;
        }
        Commands::Release { tag, vault_token } => {
            commands::stage::release(&session, &tag, &vault_token).await?;
        }
        Commands::Deploy { vault_token } => {
            commands::stage::deploy(&session, &vault_token).await?;
        }
        Commands::Serve => commands::stage::serve(&session).await?,
        Commands::Validate { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_release_flag_distinguishes_absent_from_false() {
        let absent = Cli::parse_from(["greetings", "ci"]);
        let bare = Cli::parse_from(["greetings", "ci", "--release"]);
        let explicit = Cli::parse_from(["greetings", "ci", "--release", "false"]);

        let release = |cli: Cli| match cli.command {
            Commands::Ci { gate } => gate.release,
            _ => panic!("Expected ci"),
        };
        assert_eq!(release(absent), None);
        assert_eq!(release(bare), Some(true));
        assert_eq!(release(explicit), Some(false));
    }

    #[test]
    fn test_ci_remote_parses_repository_url() {
        let cli = Cli::parse_from([
            "greetings",
            "ci-remote",
            "abc123",
            "--repository",
            "https://github.com/example/greetings-api",
        ]);
        match cli.command {
            Commands::CiRemote {
                commit, repository, ..
            } => {
                assert_eq!(commit, "abc123");
                assert_eq!(
                    repository.map(|u| u.to_string()),
                    Some("https://github.com/example/greetings-api".to_string())
                );
            }
            _ => panic!("Expected ci-remote"),
        }
    }
}
