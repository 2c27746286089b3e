//! Filesystem abstraction used by the local engine and the decryptor
//!
//! [`OsStorage`] talks to the real filesystem; [`MemStorage`] keeps a tree in
//! memory and serves as scratch space for content fetched from remote hosts.

mod mem;
mod os;

pub use mem::MemStorage;
pub use os::OsStorage;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Immediate entries of `path`, each joined onto `path`
    async fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    async fn is_dir(&self, path: &Path) -> Result<bool>;

    async fn mkdir_all(&self, path: &Path) -> Result<()>;

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()>;
}
