//! Remote traversal engine
//!
//! Projects and their trees are listed one after another; every non-tree
//! entry becomes its own task. Content that has to be decrypted is staged
//! into an in-memory storage first, so the decryptor works on paths no
//! matter where a file came from, and dropped again once it is decrypted.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

use super::Searcher;
use super::core::{FileSource, ScanCore};
use super::types::{File, FileMatch, SearchOptions};
use crate::git::{Project, RemoteClient};
use crate::storage::{MemStorage, Storage};

pub struct RemoteScanner {
    core: Arc<ScanCore>,
    client: Arc<dyn RemoteClient>,
    scratch: Arc<MemStorage>,
}

impl RemoteScanner {
    /// `core` must decrypt through `scratch`; fetched files are written there
    /// under `<project path>/<file path>` before decryption.
    pub fn new(core: ScanCore, client: Arc<dyn RemoteClient>, scratch: Arc<MemStorage>) -> Self {
        Self {
            core: Arc::new(core),
            client,
            scratch,
        }
    }
}

#[async_trait]
impl Searcher for RemoteScanner {
    async fn search(&self, group: &str, options: &SearchOptions) -> Result<Vec<FileMatch>> {
        tracing::info!("Searching group {}", group);
        let sink = self.core.sink(options);
        let options = Arc::new(options.clone());

        let projects = self.core.gated(self.client.list_group_projects(group)).await?;
        tracing::debug!("Found {} projects in {}", projects.len(), group);

        let mut tasks = JoinSet::new();
        for project in projects {
            let tree = self
                .core
                .gated(self.client.list_repository_tree(&project))
                .await?;
            let project = Arc::new(project);

            for node in tree.into_iter().filter(|node| !node.is_tree()) {
                let location = Path::new(&project.path_with_namespace).join(&node.path);
                let source = RemoteSource {
                    client: self.client.clone(),
                    scratch: self.scratch.clone(),
                    project: project.clone(),
                    tree_path: node.path,
                    location,
                };
                let core = self.core.clone();
                let options = options.clone();
                let sink = sink.clone();
                tasks.spawn(async move {
                    let file = File::from_path(&source.location);
                    if let Some(file_match) = core.process_file(file, &options, &source).await {
                        sink.accept(file_match);
                    }
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Search task in {} failed: {}", group, e);
            }
        }
        Ok(sink.take())
    }
}

struct RemoteSource {
    client: Arc<dyn RemoteClient>,
    scratch: Arc<MemStorage>,
    project: Arc<Project>,
    tree_path: String,
    location: PathBuf,
}

#[async_trait]
impl FileSource for RemoteSource {
    fn location(&self) -> PathBuf {
        self.location.clone()
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        self.client.get_raw_file(&self.project, &self.tree_path).await
    }

    async fn stage(&self, raw: &[u8]) -> Result<PathBuf> {
        if let Some(parent) = self.location.parent() {
            self.scratch.mkdir_all(parent).await?;
        }
        self.scratch.write_file(&self.location, raw).await?;
        Ok(self.location.clone())
    }

    async fn unstage(&self, path: &Path) -> Result<()> {
        self.scratch.remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::TreeNode;
    use crate::scanner::core::ScanSettings;
    use crate::scanner::types::{FileType, sort_matches};
    use crate::sops::tests::{CIPHERTEXT, FakeBackend};
    use crate::sops::{DisabledBackend, SopsBackend, SopsDecryptor};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory provider: project path -> (tree path -> content)
    #[derive(Default)]
    struct FakeClient {
        projects: Vec<Project>,
        files: HashMap<String, Vec<(String, Option<String>)>>,
        fail_projects: bool,
        fail_tree_of: Option<String>,
        fetched: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn with_project(mut self, path: &str, files: &[(&str, Option<&str>)]) -> Self {
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            self.projects.push(Project {
                id: self.projects.len() as u64 + 1,
                name,
                path_with_namespace: path.to_string(),
            });
            self.files.insert(
                path.to_string(),
                files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.map(str::to_string)))
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl RemoteClient for FakeClient {
        async fn list_group_projects(&self, _group: &str) -> Result<Vec<Project>> {
            if self.fail_projects {
                anyhow::bail!("projects unavailable");
            }
            Ok(self.projects.clone())
        }

        async fn list_repository_tree(&self, project: &Project) -> Result<Vec<TreeNode>> {
            if self.fail_tree_of.as_deref() == Some(project.path_with_namespace.as_str()) {
                anyhow::bail!("tree unavailable");
            }
            let mut nodes = Vec::new();
            for (path, _) in &self.files[&project.path_with_namespace] {
                if let Some((dir, _)) = path.rsplit_once('/') {
                    nodes.push(TreeNode::new(dir, "tree"));
                }
                nodes.push(TreeNode::new(path.clone(), "blob"));
            }
            Ok(nodes)
        }

        async fn get_raw_file(&self, project: &Project, path: &str) -> Result<Vec<u8>> {
            self.fetched.lock().unwrap().push(path.to_string());
            let content = self.files[&project.path_with_namespace]
                .iter()
                .find(|(p, _)| p == path)
                .and_then(|(_, content)| content.clone());
            match content {
                Some(content) => Ok(content.into_bytes()),
                None => anyhow::bail!("raw file unavailable"),
            }
        }
    }

    fn scanner(client: Arc<FakeClient>, backend: Arc<dyn SopsBackend>) -> RemoteScanner {
        let scratch = Arc::new(MemStorage::new());
        let decryptor = Arc::new(SopsDecryptor::new(scratch.clone(), backend));
        RemoteScanner::new(ScanCore::new(ScanSettings::default(), decryptor), client, scratch)
    }

    fn org() -> FakeClient {
        FakeClient::default()
            .with_project(
                "org/api",
                &[
                    ("README.md", Some("api docs")),
                    ("src/main.rs", Some("let token = env();")),
                    ("broken.txt", None),
                ],
            )
            .with_project("org/web", &[("config/app.toml", Some("token = 1"))])
    }

    #[tokio::test]
    async fn test_files_are_located_under_project_path() {
        let client = Arc::new(org());
        let mut matches = scanner(client.clone(), Arc::new(DisabledBackend))
            .search("org", &SearchOptions::default())
            .await
            .unwrap();
        sort_matches(&mut matches);

        let found: Vec<_> = matches.iter().map(|m| m.file.location()).collect();
        assert_eq!(
            found,
            vec![
                PathBuf::from("org/api/README.md"),
                PathBuf::from("org/api/broken.txt"),
                PathBuf::from("org/api/src/main.rs"),
                PathBuf::from("org/web/config/app.toml"),
            ]
        );
        // no content criteria, nothing fetched
        assert!(client.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_content_search_skips_unfetchable_files() {
        let client = Arc::new(org());
        let options = SearchOptions {
            content: vec!["token".into()],
            exclude_path_contains: vec!["web".into()],
            ..Default::default()
        };
        let matches = scanner(client.clone(), Arc::new(DisabledBackend))
            .search("org", &options)
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file, File::new("main.rs", "org/api/src"));
        assert_eq!(matches[0].matches[0].start_col, 5);

        // the excluded project's file was rejected before any fetch
        let mut fetched = client.fetched.lock().unwrap().clone();
        fetched.sort();
        assert_eq!(fetched, vec!["README.md", "broken.txt", "src/main.rs"]);
    }

    #[tokio::test]
    async fn test_listing_errors_propagate() {
        let client = Arc::new(FakeClient {
            fail_projects: true,
            ..org()
        });
        let err = scanner(client, Arc::new(DisabledBackend))
            .search("org", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("projects unavailable"));

        let client = Arc::new(FakeClient {
            fail_tree_of: Some("org/web".into()),
            ..org()
        });
        let err = scanner(client, Arc::new(DisabledBackend))
            .search("org", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tree unavailable"));
    }

    #[tokio::test]
    async fn test_secrets_are_staged_and_decrypted() {
        let client = Arc::new(
            FakeClient::default().with_project(
                "org/infra",
                &[
                    ("deploy/secrets.yaml", Some(CIPHERTEXT)),
                    ("deploy/values.yaml", Some("replicas: 2")),
                ],
            ),
        );
        let backend = Arc::new(FakeBackend {
            plaintext: "password: hunter2".to_string(),
            ..Default::default()
        });
        let options = SearchOptions {
            sops_only: true,
            content: vec!["hunter2".into()],
            ..Default::default()
        };
        let scratch = Arc::new(MemStorage::new());
        let decryptor = Arc::new(SopsDecryptor::new(scratch.clone(), backend.clone()));
        let remote = RemoteScanner::new(
            ScanCore::new(ScanSettings::default(), decryptor),
            client,
            scratch.clone(),
        );

        let matches = remote.search("org", &options).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file.location(), PathBuf::from("org/infra/deploy/secrets.yaml"));
        assert_eq!(matches[0].file.file_type, FileType::Secret);
        assert_eq!(*backend.formats.lock().unwrap(), vec!["yaml".to_string()]);

        // the staged ciphertext does not outlive its decryption
        assert!(scratch.read_dir(Path::new("org/infra/deploy")).await.unwrap().is_empty());
        assert!(
            scratch
                .read_file(Path::new("org/infra/deploy/secrets.yaml"))
                .await
                .is_err()
        );
    }
}
