//! Resumable multi-part upload staging: parts land on disk keyed by a
//! client-chosen `upload_id`, one file per part named by its index.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{VaultError, VaultResult};

pub struct UploadStaging {
    root: PathBuf,
}

impl UploadStaging {
    /// Recreates `root` empty, matching the donor's "wipe the staging
    /// directory at process start" behavior.
    pub async fn new(root: PathBuf) -> VaultResult<Self> {
        if root.exists() {
            fs::remove_dir_all(&root).await?;
        }
        fs::create_dir_all(&root).await?;
        Ok(UploadStaging { root })
    }

    fn upload_dir(&self, upload_id: &str) -> VaultResult<PathBuf> {
        if upload_id.is_empty() || upload_id.contains(['/', '\\', '.']) {
            return Err(VaultError::ClientMalformed(format!(
                "invalid upload_id: {upload_id}"
            )));
        }
        Ok(self.root.join(upload_id))
    }

    /// Streams `data` to disk as part `chunk_index` of `upload_id`.
    pub async fn write_part(&self, upload_id: &str, chunk_index: u64, data: &[u8]) -> VaultResult<()> {
        let dir = self.upload_dir(upload_id)?;
        fs::create_dir_all(&dir).await?;
        let path = dir.join(chunk_index.to_string());
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Returns the part file paths for `upload_id` in canonical order,
    /// after validating the indices form a contiguous `0..n` run (the
    /// original prototype never validated this; this is a deliberate
    /// hardening over it).
    pub async fn ordered_parts(&self, upload_id: &str) -> VaultResult<Vec<PathBuf>> {
        let dir = self.upload_dir(upload_id)?;
        let mut entries = fs::read_dir(&dir).await?;
        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let index: u64 = name.parse().map_err(|_| {
                VaultError::ClientMalformed(format!("non-numeric part file: {name}"))
            })?;
            indices.push(index);
        }
        indices.sort_unstable();

        for (expected, actual) in (0u64..).zip(indices.iter()) {
            if expected != *actual {
                return Err(VaultError::ClientMalformed(format!(
                    "upload {upload_id} has non-contiguous parts: expected index {expected}, found {actual}"
                )));
            }
        }
        if indices.is_empty() {
            return Err(VaultError::ClientMalformed(format!(
                "upload {upload_id} has no parts"
            )));
        }

        Ok(indices.into_iter().map(|i| dir.join(i.to_string())).collect())
    }

    pub async fn cleanup(&self, upload_id: &str) -> VaultResult<()> {
        let dir = self.upload_dir(upload_id)?;
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
