use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use super::Storage;

#[derive(Debug, Clone)]
enum MemNode {
    Dir,
    File(Vec<u8>),
}

/// In-memory tree, safe to write from many tasks at distinct paths.
///
/// Paths are normalised by dropping `.` components; the empty path is the
/// root and always exists. Listings are returned in lexical order.
#[derive(Debug, Default)]
pub struct MemStorage {
    nodes: RwLock<BTreeMap<PathBuf, MemNode>>,
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a single file; directories are left in place
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        let key = normalize(path);
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(&key) {
            Some(MemNode::File(_)) => {
                nodes.remove(&key);
                Ok(())
            }
            Some(MemNode::Dir) => bail!("{} is a directory", path.display()),
            None => bail!("{} does not exist", path.display()),
        }
    }

    fn lookup(&self, path: &Path) -> Option<MemNode> {
        if path.as_os_str().is_empty() {
            return Some(MemNode::Dir);
        }
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(path).cloned()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let key = normalize(path);
        match self.lookup(&key) {
            Some(MemNode::File(data)) => Ok(data),
            Some(MemNode::Dir) => bail!("{} is a directory", path.display()),
            None => bail!("{} does not exist", path.display()),
        }
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let key = normalize(path);
        match self.lookup(&key) {
            Some(MemNode::Dir) => {}
            Some(MemNode::File(_)) => bail!("{} is not a directory", path.display()),
            None => bail!("{} does not exist", path.display()),
        }

        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let children = nodes
            .keys()
            .filter(|candidate| candidate.parent() == Some(key.as_path()))
            .filter_map(|candidate| candidate.file_name())
            .map(|name| path.join(name))
            .collect();
        Ok(children)
    }

    async fn is_dir(&self, path: &Path) -> Result<bool> {
        match self.lookup(&normalize(path)) {
            Some(MemNode::Dir) => Ok(true),
            Some(MemNode::File(_)) => Ok(false),
            None => Err(anyhow!("{} does not exist", path.display())),
        }
    }

    async fn mkdir_all(&self, path: &Path) -> Result<()> {
        let key = normalize(path);
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);

        let mut current = PathBuf::new();
        for component in key.components() {
            current.push(component);
            match nodes.get(&current) {
                Some(MemNode::File(_)) => {
                    bail!("{} is a file", current.display())
                }
                Some(MemNode::Dir) => {}
                None => {
                    nodes.insert(current.clone(), MemNode::Dir);
                }
            }
        }
        Ok(())
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = normalize(path);
        if key.as_os_str().is_empty() {
            bail!("Cannot write to the storage root");
        }

        let parent = key.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if !parent.as_os_str().is_empty() && !matches!(nodes.get(&parent), Some(MemNode::Dir)) {
            bail!("Parent directory of {} does not exist", path.display());
        }
        if matches!(nodes.get(&key), Some(MemNode::Dir)) {
            bail!("{} is a directory", path.display());
        }
        nodes.insert(key, MemNode::File(data.to_vec()));
        Ok(())
    }
}
