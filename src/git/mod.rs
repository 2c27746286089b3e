//! Hosted source-control providers
//!
//! Both clients hide pagination entirely; callers always get complete lists.

mod github;
mod gitlab;

pub use github::GitHubClient;
pub use gitlab::GitLabClient;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::time::Duration;

/// A repository inside a group or organisation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: u64,
    pub name: String,
    /// `group/sub/project` on GitLab, `owner/repo` on GitHub
    pub path_with_namespace: String,
}

impl Project {
    /// First segment of `path_with_namespace`
    pub fn owner(&self) -> &str {
        self.path_with_namespace
            .split('/')
            .next()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNodeKind {
    Tree,
    Blob,
    /// Submodules and anything else the provider reports
    Other(String),
}

impl TreeNodeKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "tree" => TreeNodeKind::Tree,
            "blob" => TreeNodeKind::Blob,
            other => TreeNodeKind::Other(other.to_string()),
        }
    }
}

/// One entry of a repository's recursive file tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub path: String,
    pub kind: TreeNodeKind,
}

impl TreeNode {
    pub fn new(path: impl Into<String>, kind: &str) -> Self {
        Self {
            path: path.into(),
            kind: TreeNodeKind::parse(kind),
        }
    }

    pub fn is_tree(&self) -> bool {
        self.kind == TreeNodeKind::Tree
    }
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn list_group_projects(&self, group: &str) -> Result<Vec<Project>>;

    async fn list_repository_tree(&self, project: &Project) -> Result<Vec<TreeNode>>;

    async fn get_raw_file(&self, project: &Project, path: &str) -> Result<Vec<u8>>;
}

fn user_agent() -> String {
    format!("deepscan/{}", crate::VERSION)
}

/// Shared HTTP client setup for both providers
fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Turn a non-2xx response into an error carrying the status and body
async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} failed with {}: {}", what, status, body.trim())
}

/// Percent-encode every segment of a repository path, keeping the slashes
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
