use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK};
use serde::Deserialize;
use std::time::Duration;

use super::{Project, RemoteClient, TreeNode, build_http_client, encode_path, ensure_success};

const DEFAULT_API: &str = "https://api.github.com";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

#[derive(Debug, Deserialize)]
struct ApiRepository {
    id: u64,
    name: String,
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct ApiTree {
    tree: Vec<ApiTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct ApiTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// GitHub REST client (github.com or Enterprise Server)
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl GitHubClient {
    pub fn new(host: Option<&str>, token: &str, timeout: Duration) -> Result<Self> {
        if token.trim().is_empty() {
            bail!("GitHub token is required (--token or GITHUB_TOKEN)");
        }
        Ok(Self {
            http: build_http_client(timeout)?,
            api_base: api_base(host),
            token: token.to_string(),
        })
    }

    fn get(&self, url: &str, media_type: &str) -> RequestBuilder {
        self.http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, media_type)
    }
}

/// `None`, empty and `github.com` use the public API; full URLs are taken
/// as-is; any other host is treated as Enterprise Server.
fn api_base(host: Option<&str>) -> String {
    let host = host.map(str::trim).unwrap_or_default().trim_end_matches('/');
    match host {
        "" | "github.com" | "api.github.com" => DEFAULT_API.to_string(),
        url if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
        host => format!("https://{host}/api/v3"),
    }
}

/// URL of the `rel="next"` entry of a `Link` header
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (url, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim() == r#"rel="next""#);
        is_next.then(|| {
            url.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}

#[async_trait]
impl RemoteClient for GitHubClient {
    async fn list_group_projects(&self, group: &str) -> Result<Vec<Project>> {
        tracing::debug!("Fetching repositories for organisation {}", group);
        let what = format!("repositories of {group}");
        let mut next = Some(format!(
            "{}/orgs/{}/repos?per_page=100",
            self.api_base,
            urlencoding::encode(group)
        ));
        let mut projects = Vec::new();

        while let Some(url) = next {
            let response = self
                .get(&url, JSON_MEDIA_TYPE)
                .send()
                .await
                .with_context(|| format!("Request for {what} failed"))?;
            let response = ensure_success(response, &what).await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_link);

            let repos: Vec<ApiRepository> = response
                .json()
                .await
                .with_context(|| format!("Invalid response for {what}"))?;
            projects.extend(repos.into_iter().map(|repo| Project {
                id: repo.id,
                name: repo.name,
                path_with_namespace: repo.full_name,
            }));
        }
        Ok(projects)
    }

    async fn list_repository_tree(&self, project: &Project) -> Result<Vec<TreeNode>> {
        tracing::debug!("Fetching tree of {}", project.path_with_namespace);
        let what = format!("tree of {}", project.path_with_namespace);
        let url = format!(
            "{}/repos/{}/{}/git/trees/HEAD?recursive=1",
            self.api_base,
            urlencoding::encode(project.owner()),
            urlencoding::encode(&project.name)
        );
        let response = self
            .get(&url, JSON_MEDIA_TYPE)
            .send()
            .await
            .with_context(|| format!("Request for {what} failed"))?;
        let response = ensure_success(response, &what).await?;
        let tree: ApiTree = response
            .json()
            .await
            .with_context(|| format!("Invalid response for {what}"))?;

        if tree.truncated {
            tracing::warn!(
                "GitHub truncated the {}; some files will not be searched",
                what
            );
        }
        Ok(tree
            .tree
            .into_iter()
            .map(|entry| TreeNode::new(entry.path, &entry.kind))
            .collect())
    }

    async fn get_raw_file(&self, project: &Project, path: &str) -> Result<Vec<u8>> {
        tracing::trace!("Fetching {}/{}", project.path_with_namespace, path);
        let what = format!("raw file {}/{}", project.path_with_namespace, path);
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            urlencoding::encode(project.owner()),
            urlencoding::encode(&project.name),
            encode_path(path)
        );
        let response = self
            .get(&url, RAW_MEDIA_TYPE)
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
