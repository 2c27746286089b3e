use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};

use crate::config::DeepScanConfig;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display the merged configuration with tokens redacted
    Show {
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ConfigFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
    #[value(alias = "yml")]
    Yaml,
}

pub async fn execute(args: ConfigArgs, custom_config: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommand::Show { format } => {
            let config = DeepScanConfig::load_with_custom_config(custom_config)?;
            println!("{}", render(&config.redacted(), format)?);
        }
    }
    Ok(())
}

fn render(config: &DeepScanConfig, format: ConfigFormat) -> Result<String> {
    let rendered = match format {
        ConfigFormat::Toml => toml::to_string_pretty(config).context("Failed to render TOML")?,
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to render JSON")?
        }
        ConfigFormat::Yaml => serde_yml::to_string(config).context("Failed to render YAML")?,
    };
    Ok(rendered.trim_end().to_string())
}
