//! `search` subcommand shared by the os, gitlab and github command groups

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::Output;
use crate::config::DeepScanConfig;
use crate::git::{GitHubClient, GitLabClient, RemoteClient};
use crate::scanner::{
    FileMatch, LocalScanner, RemoteScanner, ScanCore, ScanSettings, SearchOptions, Searcher,
    sort_matches,
};
use crate::sops::{DisabledBackend, SopsBackend, SopsCli, SopsDecryptor};
use crate::storage::{MemStorage, OsStorage, Storage};

/// Search criteria; every list flag accepts comma-separated or repeated values
#[derive(Args, Debug, Clone, Default)]
pub struct SearchArgs {
    /// File name equals
    #[arg(short, long, value_delimiter = ',')]
    pub name: Vec<String>,

    /// File name contains
    #[arg(long, value_delimiter = ',')]
    pub name_contains: Vec<String>,

    /// File name matches regex
    #[arg(long, value_delimiter = ',')]
    pub name_regex: Vec<String>,

    /// Directory path equals
    #[arg(short, long, value_delimiter = ',')]
    pub path: Vec<String>,

    /// Directory path contains
    #[arg(long, value_delimiter = ',')]
    pub path_contains: Vec<String>,

    /// Directory path matches regex
    #[arg(long, value_delimiter = ',')]
    pub path_regex: Vec<String>,

    /// Content contains
    #[arg(short, long, value_delimiter = ',')]
    pub content: Vec<String>,

    /// Content matches regex
    #[arg(long, value_delimiter = ',')]
    pub content_regex: Vec<String>,

    /// Decrypt SOPS files and search their plaintext
    #[arg(short, long)]
    pub sops: bool,

    /// Only report decrypted SOPS files (implies --sops)
    #[arg(long)]
    pub sops_only: bool,

    /// SOPS metadata (e.g. a recipient key) contains, checked before decrypting
    #[arg(long, value_delimiter = ',')]
    pub sops_key: Vec<String>,

    /// Skip files whose name equals
    #[arg(long, value_delimiter = ',')]
    pub exclude_name: Vec<String>,

    /// Skip files whose name contains
    #[arg(long, value_delimiter = ',')]
    pub exclude_name_contains: Vec<String>,

    /// Skip files whose directory path equals
    #[arg(long, value_delimiter = ',')]
    pub exclude_path: Vec<String>,

    /// Skip files whose directory path contains
    #[arg(long, value_delimiter = ',')]
    pub exclude_path_contains: Vec<String>,

    /// Skip files whose content contains
    #[arg(long, value_delimiter = ',')]
    pub exclude_content: Vec<String>,

    /// Print matches once the search completes, sorted, instead of as found
    #[arg(long)]
    pub log_late: bool,

    /// Bytes of context around each match (overrides scan.context_width)
    #[arg(long, value_name = "N")]
    pub context_width: Option<usize>,

    /// Maximum concurrent I/O operations (overrides scan.max_concurrency)
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Also write results to output.json or output.yaml
    #[arg(long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Directory for the output file (overrides output.directory)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl OutputFormat {
    fn file_name(self) -> &'static str {
        match self {
            OutputFormat::Json => "output.json",
            OutputFormat::Yaml => "output.yaml",
        }
    }
}

impl SearchArgs {
    pub fn to_options(&self) -> SearchOptions {
        SearchOptions {
            name: self.name.clone(),
            name_contains: self.name_contains.clone(),
            name_regex: self.name_regex.clone(),
            path: self.path.clone(),
            path_contains: self.path_contains.clone(),
            path_regex: self.path_regex.clone(),
            content: self.content.clone(),
            content_regex: self.content_regex.clone(),
            sops: self.sops || self.sops_only,
            sops_only: self.sops_only,
            sops_key: self.sops_key.clone(),
            exclude_name: self.exclude_name.clone(),
            exclude_name_contains: self.exclude_name_contains.clone(),
            exclude_path: self.exclude_path.clone(),
            exclude_path_contains: self.exclude_path_contains.clone(),
            exclude_content: self.exclude_content.clone(),
            log_late: self.log_late,
        }
    }

    fn settings(&self, config: &DeepScanConfig) -> ScanSettings {
        let mut settings = ScanSettings::from_config(&config.scan);
        if let Some(width) = self.context_width {
            settings.context_width = width;
        }
        if let Some(max) = self.max_concurrency {
            settings.max_concurrency = max;
        }
        settings
    }
}

/// Where a search starts and how to reach it
#[derive(Debug, Clone)]
pub enum SearchTarget {
    Local {
        dir: String,
    },
    GitLab {
        group: String,
        host: Option<String>,
        token: Option<String>,
    },
    GitHub {
        org: String,
        host: Option<String>,
        token: Option<String>,
    },
}

impl SearchTarget {
    fn start(&self) -> &str {
        match self {
            SearchTarget::Local { dir } => dir,
            SearchTarget::GitLab { group, .. } => group,
            SearchTarget::GitHub { org, .. } => org,
        }
    }

    fn searcher(
        &self,
        config: &DeepScanConfig,
        settings: ScanSettings,
        backend: Arc<dyn SopsBackend>,
        output: Output,
    ) -> Result<Box<dyn Searcher>> {
        let http_timeout = Duration::from_secs(config.http.timeout_secs);
        let client: Arc<dyn RemoteClient> = match self {
            SearchTarget::Local { .. } => {
                let storage: Arc<dyn Storage> = Arc::new(OsStorage::new());
                let decryptor = Arc::new(SopsDecryptor::new(storage.clone(), backend));
                let core = ScanCore::new(settings, decryptor).with_observer(Arc::new(output));
                return Ok(Box::new(LocalScanner::new(core, storage)));
            }
            SearchTarget::GitLab { host, token, .. } => {
                let host = host.clone().or_else(|| config.gitlab.host.clone());
                let token = token.clone().or_else(|| config.gitlab.token.clone());
                Arc::new(GitLabClient::new(
                    host.as_deref().unwrap_or_default(),
                    token.as_deref().unwrap_or_default(),
                    http_timeout,
                )?)
            }
            SearchTarget::GitHub { host, token, .. } => {
                let host = host.clone().or_else(|| config.github.host.clone());
                let token = token.clone().or_else(|| config.github.token.clone());
                Arc::new(GitHubClient::new(
                    host.as_deref(),
                    token.as_deref().unwrap_or_default(),
                    http_timeout,
                )?)
            }
        };

        let scratch = Arc::new(MemStorage::new());
        let decryptor = Arc::new(SopsDecryptor::new(scratch.clone(), backend));
        let core = ScanCore::new(settings, decryptor).with_observer(Arc::new(output));
        Ok(Box::new(RemoteScanner::new(core, client, scratch)))
    }
}

pub async fn execute(
    target: SearchTarget,
    args: SearchArgs,
    custom_config: Option<&str>,
    quiet: bool,
) -> Result<()> {
    let started = Instant::now();
    let config = DeepScanConfig::load_with_custom_config(custom_config)?;
    let output = Output::new(quiet);
    let options = args.to_options();
    tracing::debug!("Search options: {:?}", options);

    let backend: Arc<dyn SopsBackend> = if options.scans_secrets() {
        Arc::new(SopsCli::locate(
            &config.sops.binary,
            Duration::from_secs(config.sops.timeout_secs),
        )?)
    } else {
        Arc::new(DisabledBackend)
    };

    let searcher = target.searcher(&config, args.settings(&config), backend, output)?;
    let mut matches = searcher
        .search(target.start(), &options)
        .await
        .with_context(|| format!("Search of {} failed", target.start()))?;
    sort_matches(&mut matches);

    if options.log_late {
        output.report_all(&matches);
    }
    tracing::info!("Found {} matching files", matches.len());
    output.summary(matches.len(), started.elapsed());

    if let Some(format) = args.output {
        let directory = args
            .output_dir
            .as_deref()
            .unwrap_or(config.output.directory.as_path());
        let path = write_results(&matches, format, directory).await?;
        output.success(&format!("Output written to {}", path.display()));
    }
    Ok(())
}

async fn write_results(matches: &[FileMatch], format: OutputFormat, directory: &Path) -> Result<PathBuf> {
    let body = match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(matches).context("Failed to serialize results as JSON")?
        }
        OutputFormat::Yaml => {
            serde_yml::to_string(matches).context("Failed to serialize results as YAML")?
        }
    };

    tokio::fs::create_dir_all(directory)
        .await
        .with_context(|| format!("Failed to create {}", directory.display()))?;
    let path = directory.join(format.file_name());
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
