use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Storage for uploaded originals, addressed by collection id and file name.
#[async_trait]
pub trait DocumentStorage: Send + Sync + 'static {
    /// Writes `bytes` and returns the path the orchestrator should read from.
    async fn put_document(
        &self,
        collection_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf>;

    fn document_path(&self, collection_id: &str, file_name: &str) -> PathBuf;

    /// Removes `<document_id>.<ext>` for each extension. Missing files are
    /// not an error.
    async fn remove_document(
        &self,
        collection_id: &str,
        document_id: &str,
        extensions: &[&str],
    ) -> Result<usize>;
}

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentStorage for LocalStorage {
    async fn put_document(
        &self,
        collection_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.root.join(collection_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create directory {}", dir.display()))?;

        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    fn document_path(&self, collection_id: &str, file_name: &str) -> PathBuf {
        self.root.join(collection_id).join(file_name)
    }

    async fn remove_document(
        &self,
        collection_id: &str,
        document_id: &str,
        extensions: &[&str],
    ) -> Result<usize> {
        let mut removed = 0;
        for ext in extensions {
            let path = self.document_path(collection_id, &format!("{document_id}.{ext}"));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "removed document file");
                    removed += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to remove {}", path.display()))
                }
            }
        }
        Ok(removed)
    }
}
