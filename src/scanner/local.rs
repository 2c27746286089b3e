//! Local traversal engine
//!
//! Every entry of a directory becomes its own task; subdirectories recurse
//! the same way. Only the listing of the starting directory can fail the
//! search, everything below it is skipped with a warning on error.

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::Searcher;
use super::core::{FileSource, MatchSink, ScanCore};
use super::types::{File, FileMatch, SearchOptions};
use crate::storage::Storage;

#[derive(Clone)]
pub struct LocalScanner {
    core: Arc<ScanCore>,
    storage: Arc<dyn Storage>,
}

impl LocalScanner {
    /// `core` must decrypt through the same `storage`, since local files are
    /// handed to the decryptor by path.
    pub fn new(core: ScanCore, storage: Arc<dyn Storage>) -> Self {
        Self {
            core: Arc::new(core),
            storage,
        }
    }

    fn search_dir(
        &self,
        dir: PathBuf,
        options: Arc<SearchOptions>,
        sink: Arc<MatchSink>,
    ) -> BoxFuture<'static, Result<()>> {
        let scanner = self.clone();
        async move {
            let entries = scanner.core.gated(scanner.storage.read_dir(&dir)).await?;
            tracing::trace!("{} has {} entries", dir.display(), entries.len());

            let mut tasks = JoinSet::new();
            for entry in entries {
                let scanner = scanner.clone();
                let options = options.clone();
                let sink = sink.clone();
                tasks.spawn(async move { scanner.visit(entry, options, sink).await });
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!("Search task in {} failed: {}", dir.display(), e);
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn visit(self, entry: PathBuf, options: Arc<SearchOptions>, sink: Arc<MatchSink>) {
        let is_dir = match self.core.gated(self.storage.is_dir(&entry)).await {
            Ok(is_dir) => is_dir,
            Err(e) => {
                tracing::warn!("Skipping {}: {:#}", entry.display(), e);
                return;
            }
        };

        if is_dir {
            if let Err(e) = self.search_dir(entry.clone(), options, sink).await {
                tracing::warn!("Skipping directory {}: {:#}", entry.display(), e);
            }
            return;
        }

        let file = File::from_path(&entry);
        let source = LocalSource {
            storage: self.storage.clone(),
            path: entry,
        };
        if let Some(file_match) = self.core.process_file(file, &options, &source).await {
            sink.accept(file_match);
        }
    }
}

#[async_trait]
impl Searcher for LocalScanner {
    async fn search(&self, start: &str, options: &SearchOptions) -> Result<Vec<FileMatch>> {
        tracing::info!("Searching directory {}", start);
        let sink = self.core.sink(options);
        self.search_dir(PathBuf::from(start), Arc::new(options.clone()), sink.clone())
            .await?;
        Ok(sink.take())
    }
}

struct LocalSource {
    storage: Arc<dyn Storage>,
    path: PathBuf,
}

#[async_trait]
impl FileSource for LocalSource {
    fn location(&self) -> PathBuf {
        self.path.clone()
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        self.storage.read_file(&self.path).await
    }

    async fn stage(&self, _raw: &[u8]) -> Result<PathBuf> {
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::core::{MatchObserver, ScanSettings};
    use crate::scanner::types::{FileType, sort_matches};
    use crate::sops::tests::{CIPHERTEXT, FakeBackend};
    use crate::sops::{DisabledBackend, SopsBackend, SopsDecryptor};
    use crate::storage::{MemStorage, OsStorage};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn scanner_with(storage: Arc<dyn Storage>, backend: Arc<dyn SopsBackend>) -> LocalScanner {
        let decryptor = Arc::new(SopsDecryptor::new(storage.clone(), backend));
        LocalScanner::new(ScanCore::new(ScanSettings::default(), decryptor), storage)
    }

    async fn single_file_tree() -> Arc<MemStorage> {
        let storage = Arc::new(MemStorage::new());
        storage.mkdir_all(Path::new("dir")).await.unwrap();
        storage
            .write_file(Path::new("dir/file.txt"), b"file content")
            .await
            .unwrap();
        storage
    }

    async fn search(options: SearchOptions) -> Vec<FileMatch> {
        let storage = single_file_tree().await;
        scanner_with(storage, Arc::new(DisabledBackend))
            .search("dir", &options)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_criteria_matches_every_file() {
        let matches = search(SearchOptions::default()).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file, File::new("file.txt", "dir"));
        assert_eq!(matches[0].file.file_type, FileType::Plain);
        assert!(matches[0].matches.is_empty());
    }

    #[tokio::test]
    async fn test_name_criterion() {
        let found = search(SearchOptions {
            name: vec!["file.txt".into()],
            ..Default::default()
        })
        .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file.name, "file.txt");

        let missing = search(SearchOptions {
            name: vec!["other.txt".into()],
            ..Default::default()
        })
        .await;
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_exclude_content() {
        let matches = search(SearchOptions {
            exclude_content: vec!["file content".into()],
            ..Default::default()
        })
        .await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_content_regex_covers_whole_content() {
        let matches = search(SearchOptions {
            content_regex: vec!["file.*".into()],
            ..Default::default()
        })
        .await;
        assert_eq!(matches.len(), 1);
        let evidence = &matches[0].matches;
        assert_eq!(evidence.len(), 1);
        assert!(evidence[0].exact_match);
        assert_eq!((evidence[0].line, evidence[0].start_col, evidence[0].end_col), (1, 1, 12));
        assert_eq!(evidence[0].snippet, "file content");
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let storage = Arc::new(MemStorage::new());
        storage.mkdir_all(Path::new("empty")).await.unwrap();
        let matches = scanner_with(storage, Arc::new(DisabledBackend))
            .search("empty", &SearchOptions::default())
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    struct FailingStorage;

    #[async_trait]
    impl Storage for FailingStorage {
        async fn read_file(&self, _path: &Path) -> Result<Vec<u8>> {
            anyhow::bail!("read failed")
        }
        async fn read_dir(&self, _path: &Path) -> Result<Vec<PathBuf>> {
            anyhow::bail!("listing failed")
        }
        async fn is_dir(&self, _path: &Path) -> Result<bool> {
            anyhow::bail!("stat failed")
        }
        async fn mkdir_all(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn write_file(&self, _path: &Path, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_root_listing_error_propagates() {
        let scanner = scanner_with(Arc::new(FailingStorage), Arc::new(DisabledBackend));
        let err = scanner
            .search("dir", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("listing failed"));
    }

    #[tokio::test]
    async fn test_nested_tree_search() {
        let storage = Arc::new(MemStorage::new());
        storage.mkdir_all(Path::new("root/a/b")).await.unwrap();
        storage.mkdir_all(Path::new("root/c")).await.unwrap();
        for (path, content) in [
            ("root/top.txt", "needle at the top"),
            ("root/a/mid.txt", "no match here"),
            ("root/a/b/deep.txt", "deep needle"),
            ("root/c/other.md", "needle but wrong name"),
        ] {
            storage.write_file(Path::new(path), content.as_bytes()).await.unwrap();
        }

        let options = SearchOptions {
            name_contains: vec![".txt".into()],
            content: vec!["needle".into()],
            ..Default::default()
        };
        let mut matches = scanner_with(storage, Arc::new(DisabledBackend))
            .search("root", &options)
            .await
            .unwrap();
        sort_matches(&mut matches);

        let found: Vec<_> = matches.iter().map(|m| m.file.location()).collect();
        assert_eq!(
            found,
            vec![PathBuf::from("root/top.txt"), PathBuf::from("root/a/b/deep.txt")]
        );
        // name evidence first, then content evidence
        assert_eq!(matches[0].matches.len(), 2);
        assert_eq!(matches[0].matches[1].start_col, 1);
    }

    /// Tree storage where selected paths fail every operation
    struct FlakyStorage {
        inner: MemStorage,
        broken: Vec<PathBuf>,
    }

    impl FlakyStorage {
        fn check(&self, path: &Path, op: &str) -> Result<()> {
            if self.broken.iter().any(|broken| broken == path) {
                anyhow::bail!("{} failed for {}", op, path.display());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
            self.check(path, "read")?;
            self.inner.read_file(path).await
        }
        async fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
            self.check(path, "listing")?;
            self.inner.read_dir(path).await
        }
        async fn is_dir(&self, path: &Path) -> Result<bool> {
            if path.ends_with("unstatable.txt") {
                anyhow::bail!("stat failed for {}", path.display());
            }
            self.inner.is_dir(path).await
        }
        async fn mkdir_all(&self, path: &Path) -> Result<()> {
            self.inner.mkdir_all(path).await
        }
        async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
            self.inner.write_file(path, data).await
        }
    }

    #[tokio::test]
    async fn test_failing_entries_are_skipped() {
        let inner = MemStorage::new();
        inner.mkdir_all(Path::new("root/locked")).await.unwrap();
        inner.mkdir_all(Path::new("root/open")).await.unwrap();
        for path in [
            "root/good.txt",
            "root/unreadable.txt",
            "root/unstatable.txt",
            "root/locked/hidden.txt",
            "root/open/nested.txt",
        ] {
            inner.write_file(Path::new(path), b"needle").await.unwrap();
        }
        let storage = Arc::new(FlakyStorage {
            inner,
            broken: vec![
                PathBuf::from("root/unreadable.txt"),
                PathBuf::from("root/locked"),
            ],
        });

        let options = SearchOptions {
            content: vec!["needle".into()],
            ..Default::default()
        };
        let mut matches = scanner_with(storage, Arc::new(DisabledBackend))
            .search("root", &options)
            .await
            .unwrap();
        sort_matches(&mut matches);

        let found: Vec<_> = matches.iter().map(|m| m.file.location()).collect();
        assert_eq!(
            found,
            vec![PathBuf::from("root/good.txt"), PathBuf::from("root/open/nested.txt")]
        );
    }

    async fn secret_tree() -> Arc<MemStorage> {
        let storage = Arc::new(MemStorage::new());
        storage.mkdir_all(Path::new("repo")).await.unwrap();
        storage
            .write_file(Path::new("repo/secrets.yaml"), CIPHERTEXT.as_bytes())
            .await
            .unwrap();
        storage
            .write_file(Path::new("repo/plain.yaml"), b"password: visible")
            .await
            .unwrap();
        storage
    }

    fn fake_backend() -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            plaintext: "password: hunter2".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_sops_only_returns_decrypted_secrets() {
        let storage = secret_tree().await;
        let options = SearchOptions {
            sops_only: true,
            ..Default::default()
        };
        let matches = scanner_with(storage, fake_backend())
            .search("repo", &options)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file.name, "secrets.yaml");
        assert_eq!(matches[0].file.file_type, FileType::Secret);
    }

    #[tokio::test]
    async fn test_sops_content_searches_plaintext() {
        let storage = secret_tree().await;
        let options = SearchOptions {
            sops: true,
            content: vec!["password: ".into()],
            sops_key: vec!["age1team".into()],
            ..Default::default()
        };
        let matches = scanner_with(storage, fake_backend())
            .search("repo", &options)
            .await
            .unwrap();

        // plain.yaml has no key metadata, so the key pre-filter drops it
        assert_eq!(matches.len(), 1);
        let secret = &matches[0];
        assert_eq!(secret.file.file_type, FileType::Secret);
        assert_eq!(secret.matches.len(), 2);
        assert!(secret.matches[0].snippet.contains("age1team"));
        assert_eq!(secret.matches[1].snippet, "password: hunter2");
    }

    #[tokio::test]
    async fn test_sops_without_key_keeps_plain_files() {
        let storage = secret_tree().await;
        let options = SearchOptions {
            sops: true,
            content: vec!["password".into()],
            ..Default::default()
        };
        let mut matches = scanner_with(storage, fake_backend())
            .search("repo", &options)
            .await
            .unwrap();
        sort_matches(&mut matches);
        let types: Vec<_> = matches.iter().map(|m| (m.file.name.as_str(), m.file.file_type)).collect();
        assert_eq!(
            types,
            vec![("plain.yaml", FileType::Plain), ("secrets.yaml", FileType::Secret)]
        );
    }

    #[tokio::test]
    async fn test_decryption_failure_searches_raw_content() {
        let storage = secret_tree().await;
        let backend = Arc::new(FakeBackend {
            fail: true,
            ..Default::default()
        });
        let scanner = scanner_with(storage, backend);

        let options = SearchOptions {
            sops: true,
            content: vec!["age1team".into()],
            ..Default::default()
        };
        let matches = scanner.search("repo", &options).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file.name, "secrets.yaml");
        assert_eq!(matches[0].file.file_type, FileType::Plain);

        // still plain, so a secrets-only search has nothing to return
        let sops_only = SearchOptions {
            sops_only: true,
            ..Default::default()
        };
        assert!(scanner.search("repo", &sops_only).await.unwrap().is_empty());
    }

    struct Recorder(Mutex<usize>);

    impl MatchObserver for Recorder {
        fn on_match(&self, _file_match: &FileMatch) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_log_late_defers_reporting() {
        let storage = single_file_tree().await;
        let recorder = Arc::new(Recorder(Mutex::new(0)));
        let decryptor = Arc::new(SopsDecryptor::new(storage.clone(), Arc::new(DisabledBackend)));
        let scanner = LocalScanner::new(
            ScanCore::new(ScanSettings::default(), decryptor).with_observer(recorder.clone()),
            storage,
        );

        scanner.search("dir", &SearchOptions::default()).await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), 1);

        let late = SearchOptions {
            log_late: true,
            ..Default::default()
        };
        assert_eq!(scanner.search("dir", &late).await.unwrap().len(), 1);
        assert_eq!(*recorder.0.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_real_filesystem_with_single_permit() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(root.join("src/nested/lib.rs"), "pub fn token() {}\n").unwrap();
        std::fs::write(root.join("README.md"), "token docs\n").unwrap();

        let storage: Arc<dyn Storage> = Arc::new(OsStorage::new());
        let decryptor = Arc::new(SopsDecryptor::new(storage.clone(), Arc::new(DisabledBackend)));
        let settings = ScanSettings {
            max_concurrency: 1,
            ..Default::default()
        };
        let scanner = LocalScanner::new(ScanCore::new(settings, decryptor), storage);

        let options = SearchOptions {
            content: vec!["token".into()],
            exclude_name_contains: vec![".md".into()],
            ..Default::default()
        };
        let matches = scanner
            .search(&root.to_string_lossy(), &options)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file.name, "lib.rs");
        assert_eq!(matches[0].file.path, root.join("src/nested").to_string_lossy());
        let hit = &matches[0].matches[0];
        assert_eq!((hit.line, hit.start_col, hit.end_col), (1, 8, 12));
    }
}
