//! Per-file pipeline shared by the local and remote engines
//!
//! Both engines enumerate differently but process every candidate file the
//! same way: metadata pre-check, content fetch, SOPS key pre-filter and
//! decryption, full filter evaluation. [`ScanCore`] owns that pipeline and
//! the semaphore that bounds concurrent I/O; [`MatchSink`] is the only state
//! shared across concurrent branches.

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

use super::filters::SearchFilter;
use super::matcher::TextMatcher;
use super::types::{File, FileMatch, FileType, SearchOptions};
use crate::config::ScanConfig;
use crate::sops::{self, Decryption, SecretDecryptor};

/// Engine tuning taken from `[scan]` configuration and CLI overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Bytes of context kept on each side of a match in snippets
    pub context_width: usize,
    /// Maximum concurrent I/O operations, 0 picks a value from the CPU count
    pub max_concurrency: usize,
    /// Multiplier applied to the CPU count when `max_concurrency` is 0
    pub io_multiplier: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            context_width: 15,
            max_concurrency: 0,
            io_multiplier: 8,
        }
    }
}

impl ScanSettings {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            context_width: config.context_width,
            max_concurrency: config.max_concurrency,
            io_multiplier: config.io_multiplier,
        }
    }

    /// Effective size of the I/O gate
    pub fn concurrency(&self) -> usize {
        if self.max_concurrency > 0 {
            self.max_concurrency
        } else {
            (num_cpus::get() * self.io_multiplier).max(1)
        }
    }
}

/// Notified of every accepted file while the search is still running
pub trait MatchObserver: Send + Sync {
    fn on_match(&self, file_match: &FileMatch);
}

/// Where one candidate file's bytes come from
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Path under which the file is reported and decrypted
    fn location(&self) -> PathBuf;

    async fn fetch(&self) -> Result<Vec<u8>>;

    /// Make `raw` readable by the decryptor and return the path to decrypt.
    /// Sources already backed by the decryptor's storage return their location.
    async fn stage(&self, raw: &[u8]) -> Result<PathBuf>;

    /// Release whatever `stage` created once decryption is done
    async fn unstage(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

pub struct ScanCore {
    filter: SearchFilter,
    decryptor: Arc<dyn SecretDecryptor>,
    gate: Arc<Semaphore>,
    observer: Option<Arc<dyn MatchObserver>>,
}

impl ScanCore {
    pub fn new(settings: ScanSettings, decryptor: Arc<dyn SecretDecryptor>) -> Self {
        let matcher = Arc::new(TextMatcher::new());
        let permits = settings.concurrency();
        tracing::debug!("Scanning with up to {} concurrent I/O operations", permits);
        Self {
            filter: SearchFilter::new(matcher, settings.context_width),
            decryptor,
            gate: Arc::new(Semaphore::new(permits)),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn MatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Fresh aggregate for one search. With `log_late` the observer is left
    /// out and matches are only reported from the returned collection.
    pub fn sink(&self, options: &SearchOptions) -> Arc<MatchSink> {
        let observer = if options.log_late {
            None
        } else {
            self.observer.clone()
        };
        Arc::new(MatchSink::new(observer))
    }

    /// Run one I/O future under a gate permit. The permit is released as soon
    /// as the future completes, so callers never hold it across recursion.
    pub async fn gated<F, T>(&self, io: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.gate.acquire().await?;
        io.await
    }

    /// Evaluate one candidate file. `None` means rejected or skipped; per-item
    /// failures are logged here and never reach the caller.
    pub async fn process_file(
        &self,
        mut file: File,
        options: &SearchOptions,
        source: &dyn FileSource,
    ) -> Option<FileMatch> {
        let location = source.location();

        if !self.filter.evaluate_metadata(&file, options).accepted {
            return None;
        }

        let mut evidence = Vec::new();
        let mut content = String::new();

        if options.needs_content() {
            let raw = match self.gated(source.fetch()).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Skipping {}: {:#}", location.display(), e);
                    return None;
                }
            };
            content = String::from_utf8_lossy(&raw).into_owned();

            if options.scans_secrets() {
                let key_check = self.filter.evaluate_secret_key(&content, options);
                if !key_check.accepted {
                    return None;
                }
                evidence = key_check.evidence;

                match self.decrypt(&raw, source).await {
                    Ok(Decryption::Plaintext(plaintext)) => {
                        tracing::debug!("Found SOPS secret {}", location.display());
                        file.file_type = FileType::Secret;
                        content = plaintext;
                    }
                    Ok(Decryption::NotEncrypted) => {}
                    Err(e) => {
                        tracing::warn!(
                            "Could not decrypt {}, searching raw content: {:#}",
                            location.display(),
                            e
                        );
                    }
                }
            }
        }

        let outcome = self.filter.evaluate(&file, &content, options);
        if !outcome.accepted {
            return None;
        }

        evidence.extend(outcome.evidence);
        tracing::debug!("Matched {}", location.display());
        Some(FileMatch::new(file, evidence))
    }

    async fn decrypt(&self, raw: &[u8], source: &dyn FileSource) -> Result<Decryption> {
        if !sops::looks_encrypted(raw) {
            return Ok(Decryption::NotEncrypted);
        }
        let path = source.stage(raw).await?;
        let decrypted = self.gated(self.decryptor.decrypt_file(&path)).await;
        if let Err(e) = source.unstage(&path).await {
            tracing::debug!("Could not release staged {}: {:#}", path.display(), e);
        }
        decrypted
    }
}

/// Result aggregate shared by every branch of one search
pub struct MatchSink {
    matches: Mutex<Vec<FileMatch>>,
    observer: Option<Arc<dyn MatchObserver>>,
}

impl MatchSink {
    /// `observer` sees each match as it is accepted; pass `None` to report
    /// only once the search completes
    pub fn new(observer: Option<Arc<dyn MatchObserver>>) -> Self {
        Self {
            matches: Mutex::new(Vec::new()),
            observer,
        }
    }

    pub fn accept(&self, file_match: FileMatch) {
        if let Some(observer) = &self.observer {
            observer.on_match(&file_match);
        }
        self.matches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(file_match);
    }

    pub fn take(&self) -> Vec<FileMatch> {
        std::mem::take(&mut *self.matches.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
