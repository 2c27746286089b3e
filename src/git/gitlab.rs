use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Duration;

use super::{Project, RemoteClient, TreeNode, build_http_client, ensure_success};

const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct ApiProject {
    id: u64,
    name: String,
    path_with_namespace: String,
}

#[derive(Debug, Deserialize)]
struct ApiTreeNode {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// GitLab REST v4 client authenticated with a personal access token
pub struct GitLabClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl GitLabClient {
    pub fn new(host: &str, token: &str, timeout: Duration) -> Result<Self> {
        if host.trim().is_empty() {
            bail!("GitLab host is required (--host or GITLAB_HOST)");
        }
        if token.trim().is_empty() {
            bail!("GitLab token is required (--token or GITLAB_TOKEN)");
        }
        Ok(Self {
            http: build_http_client(timeout)?,
            api_base: api_base(host),
            token: token.to_string(),
        })
    }

    /// Follow `X-Next-Page` until the last page and concatenate every page
    async fn get_all<T>(&self, url: &str, what: &str) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut items = Vec::new();
        let mut page = "1".to_string();

        loop {
            let response = self
                .http
                .get(url)
                .header("PRIVATE-TOKEN", &self.token)
                .query(&[("per_page", PER_PAGE), ("page", page.as_str())])
                .send()
                .await
                .with_context(|| format!("Request for {what} failed"))?;
            let response = ensure_success(response, what).await?;
            let next = next_page(response.headers());

            let mut batch: Vec<T> = response
                .json()
                .await
                .with_context(|| format!("Invalid response for {what}"))?;
            items.append(&mut batch);

            match next {
                Some(next) => page = next,
                None => break,
            }
        }
        Ok(items)
    }
}

/// Host as given, with `/api/v4` appended unless already present
fn api_base(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let host = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    if host.ends_with("/api/v4") {
        host
    } else {
        format!("{host}/api/v4")
    }
}

/// Empty or missing `X-Next-Page` marks the last page
fn next_page(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-next-page")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl RemoteClient for GitLabClient {
    async fn list_group_projects(&self, group: &str) -> Result<Vec<Project>> {
        tracing::debug!("Fetching projects for group {}", group);
        let url = format!(
            "{}/groups/{}/projects?include_subgroups=true",
            self.api_base,
            urlencoding::encode(group)
        );
        let projects: Vec<ApiProject> = self
            .get_all(&url, &format!("projects of group {group}"))
            .await?;
        Ok(projects
            .into_iter()
            .map(|p| Project {
                id: p.id,
                name: p.name,
                path_with_namespace: p.path_with_namespace,
            })
            .collect())
    }

    async fn list_repository_tree(&self, project: &Project) -> Result<Vec<TreeNode>> {
        tracing::debug!("Fetching tree of {}", project.path_with_namespace);
        let url = format!(
            "{}/projects/{}/repository/tree?recursive=true",
            self.api_base, project.id
        );
        let nodes: Vec<ApiTreeNode> = self
            .get_all(&url, &format!("tree of {}", project.path_with_namespace))
            .await?;
        Ok(nodes
            .into_iter()
            .map(|node| TreeNode::new(node.path, &node.kind))
            .collect())
    }

    async fn get_raw_file(&self, project: &Project, path: &str) -> Result<Vec<u8>> {
        tracing::trace!("Fetching {}/{}", project.path_with_namespace, path);
        let url = format!(
            "{}/projects/{}/repository/files/{}/raw?ref=HEAD",
            self.api_base,
            project.id,
            urlencoding::encode(path)
        );
        let what = format!("raw file {}/{}", project.path_with_namespace, path);
        let response = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .with_context(|| format!("Request for {what} failed"))?;
        let response = ensure_success(response, &what).await?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to download {what}"))?;
        Ok(bytes.to_vec())
    }
}
