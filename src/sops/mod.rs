//! SOPS secret detection and decryption
//!
//! [`SopsDecryptor`] reads a file through [`Storage`], resolves its SOPS
//! format from the extension and hands the ciphertext to a [`SopsBackend`].
//! Content that does not carry SOPS metadata is reported as
//! [`Decryption::NotEncrypted`] without touching the backend.

mod backend;

pub use backend::{DisabledBackend, SopsBackend, SopsCli};

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::storage::Storage;

/// Marker SOPS writes into every encrypted value
const ENCRYPTED_VALUE_MARKER: &[u8] = b"ENC[AES256_GCM,";
/// Metadata key SOPS appends to every encrypted document
const METADATA_MARKER: &[u8] = b"sops";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decryption {
    Plaintext(String),
    /// Content is not SOPS-encrypted; callers keep using it as-is
    NotEncrypted,
}

#[async_trait]
pub trait SecretDecryptor: Send + Sync {
    async fn decrypt_file(&self, path: &Path) -> Result<Decryption>;
}

/// Cheap check for SOPS ciphertext, run before any decryption attempt
pub fn looks_encrypted(content: &[u8]) -> bool {
    contains(content, ENCRYPTED_VALUE_MARKER) && contains(content, METADATA_MARKER)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// SOPS `--input-type` for a file: `.env` is dotenv, `.yml`/`.yaml` is yaml,
/// anything else is passed through as its bare extension.
pub fn file_format(path: &Path) -> String {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "env" => "dotenv".to_string(),
        "yml" | "yaml" => "yaml".to_string(),
        _ => extension,
    }
}

pub struct SopsDecryptor {
    storage: Arc<dyn Storage>,
    backend: Arc<dyn SopsBackend>,
}

impl SopsDecryptor {
    pub fn new(storage: Arc<dyn Storage>, backend: Arc<dyn SopsBackend>) -> Self {
        Self { storage, backend }
    }
}

#[async_trait]
impl SecretDecryptor for SopsDecryptor {
    async fn decrypt_file(&self, path: &Path) -> Result<Decryption> {
        let content = self
            .storage
            .read_file(path)
            .await
            .context("Could not read secret file")?;

        if !looks_encrypted(&content) {
            return Ok(Decryption::NotEncrypted);
        }

        let format = file_format(path);
        let plaintext = self
            .backend
            .decrypt(&content, &format)
            .await
            .with_context(|| format!("Could not decrypt secret file {}", path.display()))?;

        tracing::debug!("Decrypted {} as {}", path.display(), format);
        Ok(Decryption::Plaintext(
            String::from_utf8_lossy(&plaintext).into_owned(),
        ))
    }
}
