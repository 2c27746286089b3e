//! Layered configuration
//!
//! Sources, lowest priority first: embedded defaults, user config, repository
//! config (or a single `--config` file), `DEEPSCAN_` environment variables.

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");
const REDACTED: &str = "********";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepScanConfig {
    pub scan: ScanConfig,
    pub sops: SopsConfig,
    #[serde(default)]
    pub gitlab: ProviderConfig,
    #[serde(default)]
    pub github: ProviderConfig,
    pub http: HttpConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub context_width: usize,
    pub max_concurrency: usize,
    pub io_multiplier: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SopsConfig {
    pub binary: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl DeepScanConfig {
    pub fn load_with_custom_config(custom_config: Option<&str>) -> Result<Self> {
        let config: Self = Self::figment(custom_config)
            .extract()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn figment(custom_config: Option<&str>) -> Figment {
        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG));

        if let Some(custom_path) = custom_config {
            figment = match Path::new(custom_path).extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(custom_path)),
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(custom_path)),
                _ => figment.merge(Toml::file(custom_path)),
            };
        } else {
            let user = user_config_dir();
            figment = figment
                .merge(Toml::file(user.join("config.toml")))
                .merge(Json::file(user.join("config.json")))
                .merge(Yaml::file(user.join("config.yaml")))
                .merge(Yaml::file(user.join("config.yml")))
                .merge(Toml::file("deepscan.toml"))
                .merge(Json::file("deepscan.json"))
                .merge(Yaml::file("deepscan.yaml"))
                .merge(Yaml::file("deepscan.yml"));
        }

        figment.merge(Env::prefixed("DEEPSCAN_").split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sops.timeout_secs == 0 {
            bail!("sops.timeout_secs must be greater than zero");
        }
        if self.http.timeout_secs == 0 {
            bail!("http.timeout_secs must be greater than zero");
        }
        if self.sops.binary.trim().is_empty() {
            bail!("sops.binary must not be empty");
        }
        Ok(())
    }

    /// Copy safe to print: provider tokens are masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for provider in [&mut config.gitlab, &mut config.github] {
            if provider.token.is_some() {
                provider.token = Some(REDACTED.to_string());
            }
        }
        config
    }
}

fn user_config_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".config/deepscan"),
        Err(_) => PathBuf::from("~/.config/deepscan"),
    }
}
