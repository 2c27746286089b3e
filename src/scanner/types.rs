//! Data model shared by the matcher, the filter and both traversal engines

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::matcher::MatchResult;

/// File names that carry SOPS creation rules rather than secrets
const SOPS_CONFIG_NAMES: [&str; 2] = [".sops.yaml", ".sops.yml"];

/// Classification of a scanned file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Ordinary file, content used as-is
    #[serde(rename = "FILE")]
    Plain,
    /// SOPS-encrypted file that decrypted successfully
    #[serde(rename = "SOPS_SECRET")]
    Secret,
    /// SOPS creation-rule configuration
    #[serde(rename = "SOPS_CONFIG")]
    SecretConfig,
}

impl FileType {
    /// Initial type of a file, before any decryption attempt
    pub fn classify(name: &str) -> Self {
        if SOPS_CONFIG_NAMES.contains(&name) {
            FileType::SecretConfig
        } else {
            FileType::Plain
        }
    }
}

/// A candidate file, identified by its directory component and name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

impl File {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let name = name.into();
        let file_type = FileType::classify(&name);
        Self {
            name,
            path: path.into(),
            file_type,
        }
    }

    /// Split an entry path into directory component and name.
    ///
    /// An entry without a parent gets `"."` as its directory, so that
    /// [`File::location`] always points back at the same entry.
    pub fn from_path(entry: &Path) -> Self {
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.to_string_lossy().into_owned());
        let path = match entry.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        };
        Self::new(name, path)
    }

    /// Full entry path (`path` joined with `name`)
    pub fn location(&self) -> PathBuf {
        Path::new(&self.path).join(&self.name)
    }
}

/// A file that satisfied the search, with all evidence gathered for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMatch {
    #[serde(flatten)]
    pub file: File,
    pub matches: Vec<MatchResult>,
}

impl FileMatch {
    pub fn new(file: File, matches: Vec<MatchResult>) -> Self {
        Self { file, matches }
    }
}

/// Sort matches by directory then name; traversal order is never stable.
pub fn sort_matches(matches: &mut [FileMatch]) {
    matches.sort_by(|a, b| {
        a.file
            .path
            .cmp(&b.file.path)
            .then_with(|| a.file.name.cmp(&b.file.name))
    });
}

/// Search criteria. Every pattern list is optional; an empty list is not applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub name: Vec<String>,
    pub name_contains: Vec<String>,
    pub name_regex: Vec<String>,
    pub path: Vec<String>,
    pub path_contains: Vec<String>,
    pub path_regex: Vec<String>,
    pub content: Vec<String>,
    pub content_regex: Vec<String>,
    pub sops: bool,
    pub sops_only: bool,
    pub sops_key: Vec<String>,
    pub exclude_name: Vec<String>,
    pub exclude_name_contains: Vec<String>,
    pub exclude_path: Vec<String>,
    pub exclude_path_contains: Vec<String>,
    pub exclude_content: Vec<String>,
    /// Report matches once the search completes instead of as they are found
    pub log_late: bool,
}

impl SearchOptions {
    /// Whether decryption must be attempted. `sops_only` could never pass without it.
    pub fn scans_secrets(&self) -> bool {
        self.sops || self.sops_only
    }

    /// Whether any criterion needs file content. When false, content is never read.
    pub fn needs_content(&self) -> bool {
        !self.content.is_empty()
            || !self.content_regex.is_empty()
            || !self.exclude_content.is_empty()
            || self.scans_secrets()
    }
}
