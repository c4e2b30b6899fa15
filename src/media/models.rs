/// Media data models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One physically stored, deduplicated byte sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlob {
    pub hash: String,
    pub storage_path: String,
    pub display_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub reference_count: i64,
    pub created_at: DateTime<Utc>,
    /// Last reference-count mutation
    pub updated_at: DateTime<Utc>,
}

/// Fields for a ContentBlob created on first ingest
#[derive(Debug, Clone)]
pub struct NewContentBlob {
    pub hash: String,
    pub storage_path: String,
    pub display_filename: String,
    pub file_size: i64,
    pub mime_type: String,
}

/// Result of inserting a ContentBlob row
#[derive(Debug, Clone)]
pub enum BlobInsert {
    Inserted(ContentBlob),
    /// Another request created a row for the same hash first
    AlreadyExists,
}

/// User-facing media entry owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: String,
    pub owner_id: String,
    pub original_filename: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A media record joined with its content row, if that row still exists
#[derive(Debug, Clone)]
pub struct MediaWithContent {
    pub record: MediaRecord,
    pub content: Option<ContentBlob>,
}

/// Listing entry returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaView {
    pub media_id: String,
    pub owner_id: String,
    pub original_filename: String,
    pub public_url: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Media listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaQuery {
    #[serde(rename = "owner")]
    pub owner_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl MediaQuery {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    /// Limit clamped to 1..=MAX_LIMIT
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// An upload handed to the engine
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
    pub owner_id: String,
}

/// Result of a successful ingest
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub media: MediaRecord,
    pub public_url: String,
    pub file_size: i64,
    pub mime_type: String,
    /// True when the bytes were already stored
    pub deduplicated: bool,
}

/// Result of a successful release
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOutcome {
    pub media_id: String,
    /// True when this release dropped the last reference and freed the bytes
    pub blob_reclaimed: bool,
    /// True when the record's ContentBlob row was already gone
    pub content_missing: bool,
}

/// Outcome of dropping one reference from a ContentBlob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceDrop {
    /// Count decremented; the blob stays
    Remaining(i64),
    /// Last reference dropped; row deleted and bytes freed
    Reclaimed { storage_path: String },
    /// No row existed for the hash
    Missing,
}

/// A ContentBlob whose stored count disagrees with its media rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDrift {
    pub hash: String,
    pub recorded: i64,
    pub actual: i64,
}

/// Totals over the content_blob and media tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSummary {
    pub content_blobs: i64,
    pub media_records: i64,
    pub stored_bytes: i64,
    /// Bytes that deduplication avoided writing
    pub deduplicated_bytes: i64,
}
