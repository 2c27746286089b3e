use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Format-aware decryption of SOPS ciphertext
#[async_trait]
pub trait SopsBackend: Send + Sync {
    async fn decrypt(&self, content: &[u8], format: &str) -> Result<Vec<u8>>;
}

/// Runs the `sops` executable with the ciphertext on stdin
#[derive(Debug, Clone)]
pub struct SopsCli {
    binary: PathBuf,
    timeout: Duration,
}

impl SopsCli {
    /// Resolve `binary` on `PATH` (or as a path) and bound every call by `timeout`
    pub fn locate(binary: &str, timeout: Duration) -> Result<Self> {
        let binary = which::which(binary)
            .with_context(|| format!("'{binary}' not found; install sops to scan secrets"))?;
        tracing::debug!("Using sops binary at {}", binary.display());
        Ok(Self { binary, timeout })
    }

    async fn run(&self, content: &[u8], format: &str) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.binary)
            .args(["--decrypt", "--input-type", format, "--output-type", format, "/dev/stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        // Feed stdin from its own task so a large document cannot block on a full pipe
        let writer = child.stdin.take().map(|mut stdin| {
            let content = content.to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&content).await {
                    tracing::debug!("Writing ciphertext to sops stdin failed: {}", e);
                }
            })
        });

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for sops")?;
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                tracing::debug!("sops stdin writer task failed: {}", e);
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("sops exited with {}: {}", output.status, stderr.trim());
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl SopsBackend for SopsCli {
    async fn decrypt(&self, content: &[u8], format: &str) -> Result<Vec<u8>> {
        if format.is_empty() {
            bail!("Cannot determine SOPS format without a file extension");
        }
        tokio::time::timeout(self.timeout, self.run(content, format))
            .await
            .with_context(|| format!("sops timed out after {}s", self.timeout.as_secs()))?
    }
}

/// Backend for searches that never decrypt
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBackend;

#[async_trait]
impl SopsBackend for DisabledBackend {
    async fn decrypt(&self, _content: &[u8], _format: &str) -> Result<Vec<u8>> {
        bail!("Secret scanning is disabled; pass --sops to decrypt")
    }
}
