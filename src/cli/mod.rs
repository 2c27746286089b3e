//! Command-line interface for deepscan
//!
//! `os`, `gitlab` and `github` each expose a `search` subcommand taking the
//! same criteria; `config` inspects the merged configuration.

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

pub mod commands;
pub mod output;

pub use output::Output;

use commands::search::{SearchArgs, SearchTarget};

#[derive(Parser)]
#[command(
    name = "deepscan",
    version = crate::VERSION,
    about = "Search directory trees and remote git organisations by name, path, content and SOPS secrets",
    propagate_version = true
)]
pub struct Cli {
    /// Use custom configuration file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<String>,

    /// Log level
    #[arg(short, long, value_enum, default_value = "info", ignore_case = true, global = true)]
    pub log_level: LogLevel,

    /// Increase verbosity, overrides --log-level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Suppress match reports and summaries
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search the local filesystem
    Os {
        #[command(subcommand)]
        command: OsCommand,
    },
    /// Search every project of a GitLab group
    Gitlab {
        #[command(subcommand)]
        command: GitLabCommand,
    },
    /// Search every repository of a GitHub organisation
    Github {
        #[command(subcommand)]
        command: GitHubCommand,
    },
    /// Configuration management
    Config(commands::config::ConfigArgs),
}

#[derive(Subcommand)]
pub enum OsCommand {
    /// Search a directory tree
    Search(OsSearchArgs),
}

#[derive(Args)]
pub struct OsSearchArgs {
    /// Directory to start from
    #[arg(short, long, default_value = ".")]
    pub dir: String,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Subcommand)]
pub enum GitLabCommand {
    /// Search all projects of a group, including subgroups
    Search(GitLabSearchArgs),
}

#[derive(Args)]
pub struct GitLabSearchArgs {
    /// Group to search
    #[arg(short, long)]
    pub org: String,

    /// GitLab host
    #[arg(long, env = "GITLAB_HOST")]
    pub host: Option<String>,

    /// GitLab access token
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Subcommand)]
pub enum GitHubCommand {
    /// Search all repositories of an organisation
    Search(GitHubSearchArgs),
}

#[derive(Args)]
pub struct GitHubSearchArgs {
    /// Organisation to search
    #[arg(short, long)]
    pub org: String,

    /// GitHub host, github.com when unset
    #[arg(long, env = "GITHUB_HOST")]
    pub host: Option<String>,

    /// GitHub access token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(flatten)]
    pub search: SearchArgs,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        setup_logging(self.log_level, self.verbose, self.log_format);
        let custom_config = self.config.as_deref();

        match self.command {
            Commands::Os {
                command: OsCommand::Search(args),
            } => {
                let target = SearchTarget::Local { dir: args.dir };
                commands::search::execute(target, args.search, custom_config, self.quiet).await
            }
            Commands::Gitlab {
                command: GitLabCommand::Search(args),
            } => {
                let target = SearchTarget::GitLab {
                    group: args.org,
                    host: args.host,
                    token: args.token,
                };
                commands::search::execute(target, args.search, custom_config, self.quiet).await
            }
            Commands::Github {
                command: GitHubCommand::Search(args),
            } => {
                let target = SearchTarget::GitHub {
                    org: args.org,
                    host: args.host,
                    token: args.token,
                };
                commands::search::execute(target, args.search, custom_config, self.quiet).await
            }
            Commands::Config(args) => commands::config::execute(args, custom_config).await,
        }
    }
}

/// Logs go to stderr so stdout only carries reports. `RUST_LOG` wins over flags.
fn setup_logging(level: LogLevel, verbose: u8, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = match verbose {
            0 => level.directive(),
            1 => "debug",
            _ => "trace",
        };
        tracing_subscriber::EnvFilter::new(directive)
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // a subscriber may already be installed when embedded
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
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
    fn test_parse_os_search() {
        let cli = Cli::try_parse_from([
            "deepscan", "-l", "DEBUG", "os", "search", "-d", "src", "-n", "main.rs", "--log-late",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        match cli.command {
            Commands::Os {
                command: OsCommand::Search(args),
            } => {
                assert_eq!(args.dir, "src");
                assert_eq!(args.search.name, vec!["main.rs"]);
                assert!(args.search.log_late);
            }
            _ => panic!("expected os search"),
        }
    }

    #[test]
    fn test_parse_gitlab_search_with_flags() {
        let cli = Cli::try_parse_from([
            "deepscan", "gitlab", "search", "-o", "platform", "--host", "gitlab.example.com",
            "--token", "glpat", "--sops", "--output", "yaml",
        ])
        .unwrap();
        match cli.command {
            Commands::Gitlab {
                command: GitLabCommand::Search(args),
            } => {
                assert_eq!(args.org, "platform");
                assert_eq!(args.host.as_deref(), Some("gitlab.example.com"));
                assert_eq!(args.token.as_deref(), Some("glpat"));
                assert!(args.search.sops);
                assert_eq!(args.search.output, Some(commands::search::OutputFormat::Yaml));
            }
            _ => panic!("expected gitlab search"),
        }
    }

    #[test]
    fn test_remote_search_requires_org() {
        assert!(Cli::try_parse_from(["deepscan", "github", "search"]).is_err());
    }
}
