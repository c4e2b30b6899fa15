/// Blob Storage System
///
/// Raw byte storage for uploaded media, addressed by relative storage path.
/// Paths are allocated once per stored blob and never reused, so deleting a
/// path can never remove bytes that belong to a newer blob.

pub mod disk;

pub use disk::DiskBlobBackend;

use crate::error::{CmsError, CmsResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};

/// Blob storage backend trait
///
/// Implementations handle the actual storage and retrieval of blob data.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store bytes at a storage path
    async fn put(&self, path: &str, data: &[u8]) -> CmsResult<()>;

    /// Retrieve bytes at a storage path
    async fn get(&self, path: &str) -> CmsResult<Option<Vec<u8>>>;

    /// Delete bytes at a storage path; deleting an absent path succeeds
    async fn delete(&self, path: &str) -> CmsResult<()>;

    /// Check if a path currently holds bytes
    async fn exists(&self, path: &str) -> CmsResult<bool>;

    /// Enumerate everything under the storage root
    async fn list(&self) -> CmsResult<Vec<StoredBlob>>;
}

/// A file found in the backing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Length of the random component in allocated paths
const RANDOM_SUFFIX_LEN: usize = 12;

/// Allocate a fresh storage path for a new blob
///
/// Format: `media/{owner}/{unix_millis}_{random}[.{ext}]`
pub fn allocate_storage_path(owner_id: &str, filename: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect();
    let stem = format!("{}_{}", Utc::now().timestamp_millis(), suffix.to_lowercase());

    let name = match file_extension(filename) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    };

    format!("media/{}/{}", path_segment(owner_id), name)
}

/// Build the public fetch URL for a storage path
pub fn public_url(url_prefix: &str, storage_path: &str) -> String {
    format!(
        "{}/{}",
        url_prefix.trim_end_matches('/'),
        storage_path.trim_start_matches('/')
    )
}

/// Extension after the final '.', lowercased, if it looks like one
fn file_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 16 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Reduce an owner id to a single safe directory name
fn path_segment(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Reject storage paths that could escape the storage root
pub fn validate_storage_path(path: &str) -> CmsResult<()> {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return Err(CmsError::Validation(format!("Invalid storage path: {}", path)));
    }

    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(CmsError::Validation(format!("Invalid storage path: {}", path)));
    }

    Ok(())
}
