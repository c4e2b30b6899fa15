/// Content-addressed media storage
///
/// Uploaded bytes are stored once per distinct content hash. Media records
/// are the user-visible handles; each points at one ContentBlob, which keeps
/// a count of the records that point at it.

pub mod engine;
pub mod metadata;
pub mod models;

pub use engine::{DedupEngine, MediaLimits};
pub use metadata::{MetadataStore, SqliteMetadataStore};
pub use models::*;

use sha2::{Digest, Sha256};

/// Content digest of a byte sequence (lowercase hex SHA-256)
pub fn compute_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
