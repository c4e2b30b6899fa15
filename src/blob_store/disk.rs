/// Disk-based blob storage backend
use crate::{
    blob_store::{validate_storage_path, BlobBackend, StoredBlob},
    error::{CmsError, CmsResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::fs;

/// Disk storage backend
///
/// Stores blobs on the local filesystem below a single root directory.
/// Storage paths are relative, '/'-separated and validated before use.
#[derive(Clone)]
pub struct DiskBlobBackend {
    base_path: PathBuf,
}

impl DiskBlobBackend {
    /// Create a new disk storage backend
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Root directory of this backend
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// Get the file path for a storage path
    fn get_blob_path(&self, path: &str) -> CmsResult<PathBuf> {
        validate_storage_path(path)?;
        Ok(path
            .split('/')
            .fold(self.base_path.clone(), |acc, segment| acc.join(segment)))
    }

    /// Ensure the directory for a blob exists
    async fn ensure_blob_dir(&self, path: &str) -> CmsResult<PathBuf> {
        let blob_path = self.get_blob_path(path)?;
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                CmsError::BlobStorage(format!("Failed to create blob directory: {}", e))
            })?;
        }
        Ok(blob_path)
    }
}

#[async_trait]
impl BlobBackend for DiskBlobBackend {
    async fn put(&self, path: &str, data: &[u8]) -> CmsResult<()> {
        let blob_path = self.ensure_blob_dir(path).await?;

        fs::write(&blob_path, data).await.map_err(|e| {
            CmsError::BlobStorage(format!("Failed to write blob {}: {}", path, e))
        })?;

        Ok(())
    }

    async fn get(&self, path: &str) -> CmsResult<Option<Vec<u8>>> {
        let blob_path = self.get_blob_path(path)?;

        match fs::read(&blob_path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CmsError::BlobStorage(format!(
                "Failed to read blob {}: {}",
                path, e
            ))),
        }
    }

    async fn delete(&self, path: &str) -> CmsResult<()> {
        let blob_path = self.get_blob_path(path)?;

        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CmsError::BlobStorage(format!(
                "Failed to delete blob {}: {}",
                path, e
            ))),
        }
    }

    async fn exists(&self, path: &str) -> CmsResult<bool> {
        let blob_path = self.get_blob_path(path)?;
        Ok(fs::try_exists(&blob_path).await.unwrap_or(false))
    }

    async fn list(&self) -> CmsResult<Vec<StoredBlob>> {
        let mut blobs = Vec::new();
        if !fs::try_exists(&self.base_path).await.unwrap_or(false) {
            return Ok(blobs);
        }

        // Iterative walk; (absolute dir, relative prefix)
        let mut pending = vec![(self.base_path.clone(), String::new())];
        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                CmsError::BlobStorage(format!("Failed to read directory {:?}: {}", dir, e))
            })?;

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };

                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push((entry.path(), relative));
                } else if metadata.is_file() {
                    let modified = metadata
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());
                    blobs.push(StoredBlob {
                        path: relative,
                        size: metadata.len(),
                        modified,
                    });
                }
            }
        }

        blobs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(blobs)
    }
}
