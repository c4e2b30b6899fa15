/// Activity event payloads
use serde::{Deserialize, Serialize};

/// Entity kinds that activity entries are attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Media,
    System,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Media => "media",
            EntityType::System => "system",
        }
    }
}

/// Known activity shapes, stored as the entry's JSON metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    MediaUploaded {
        filename: String,
        file_size: i64,
        deduplicated: bool,
    },
    MediaDeleted {
        filename: String,
        storage_reclaimed: bool,
    },
    OrphanBlobsSwept {
        removed: u64,
    },
    ReferenceCountsRepaired {
        repaired: u64,
        reclaimed: u64,
    },
}

impl ActivityEvent {
    /// Stable code stored in `activity_log.activity_code`
    pub fn activity_code(&self) -> &'static str {
        match self {
            ActivityEvent::MediaUploaded { .. } => "media_uploaded",
            ActivityEvent::MediaDeleted { .. } => "media_deleted",
            ActivityEvent::OrphanBlobsSwept { .. } => "orphan_blobs_swept",
            ActivityEvent::ReferenceCountsRepaired { .. } => "reference_counts_repaired",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            ActivityEvent::MediaUploaded { .. } | ActivityEvent::MediaDeleted { .. } => EntityType::Media,
            ActivityEvent::OrphanBlobsSwept { .. } | ActivityEvent::ReferenceCountsRepaired { .. } => {
                EntityType::System
            }
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ActivityEvent::MediaUploaded { .. } => "Uploaded a media file",
            ActivityEvent::MediaDeleted { .. } => "Deleted a media file",
            ActivityEvent::OrphanBlobsSwept { .. } => "Removed orphaned blobs",
            ActivityEvent::ReferenceCountsRepaired { .. } => "Repaired reference counts",
        }
    }

    pub fn description(&self) -> String {
        match self {
            ActivityEvent::MediaUploaded { filename, .. } => format!("File: '{}'", filename),
            ActivityEvent::MediaDeleted { filename, .. } => format!("File: '{}'", filename),
            ActivityEvent::OrphanBlobsSwept { removed } => format!("{} orphaned blob(s) removed", removed),
            ActivityEvent::ReferenceCountsRepaired { repaired, reclaimed } => format!(
                "{} count(s) corrected, {} unreferenced blob(s) reclaimed",
                repaired, reclaimed
            ),
        }
    }
}
