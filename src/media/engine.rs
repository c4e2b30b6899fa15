/// Deduplication engine
///
/// Orders blob writes and deletes against metadata mutations:
/// - ingest writes bytes before inserting metadata, so a record never points
///   at bytes that were not written (a failed insert leaves an orphan file)
/// - release removes the ContentBlob row before its bytes, so a row never
///   outlives its bytes (a failed delete leaves an orphan file)
/// Orphan files are removed later by `sweep_orphans`.
use crate::{
    activity::{record_best_effort, ActivityEvent, ActivityLogger},
    blob_store::{allocate_storage_path, public_url, BlobBackend},
    error::{CmsError, CmsResult},
    media::{
        compute_digest,
        metadata::MetadataStore,
        models::{
            BlobInsert, ContentBlob, IngestOutcome, IngestRequest, MediaQuery, MediaRecord, MediaView,
            MediaWithContent, NewContentBlob, ReferenceDrop, ReleaseOutcome,
        },
    },
    metrics,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Bound on hit/miss and decrement/delete reconciliation loops
const MAX_ATTEMPTS: usize = 3;

/// Upload limits and URL mapping
#[derive(Debug, Clone)]
pub struct MediaLimits {
    /// Inclusive upload ceiling in bytes
    pub max_upload_size: usize,
    pub url_prefix: String,
}

/// Summary of a reference-count reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub repaired: u64,
    pub reclaimed: u64,
}

/// Content-addressed media storage with reference-counted deduplication
#[derive(Clone)]
pub struct DedupEngine {
    backend: Arc<dyn BlobBackend>,
    metadata: Arc<dyn MetadataStore>,
    activity: Arc<dyn ActivityLogger>,
    limits: MediaLimits,
}

impl DedupEngine {
    pub fn new(
        backend: Arc<dyn BlobBackend>,
        metadata: Arc<dyn MetadataStore>,
        activity: Arc<dyn ActivityLogger>,
        limits: MediaLimits,
    ) -> Self {
        Self {
            backend,
            metadata,
            activity,
            limits,
        }
    }

    pub fn limits(&self) -> &MediaLimits {
        &self.limits
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    /// Store an upload and create a media record owned by the uploader
    pub async fn ingest(&self, request: IngestRequest) -> CmsResult<IngestOutcome> {
        let IngestRequest {
            bytes,
            mime_type,
            filename,
            owner_id,
        } = request;

        if bytes.is_empty() {
            metrics::record_ingest("rejected", 0);
            return Err(CmsError::MissingFile);
        }
        if bytes.len() > self.limits.max_upload_size {
            metrics::record_ingest("rejected", 0);
            return Err(CmsError::TooLarge {
                size: bytes.len(),
                limit: self.limits.max_upload_size,
            });
        }

        let hash = compute_digest(&bytes);
        let (content, deduplicated) = self
            .acquire_content(&hash, &bytes, &mime_type, &filename, &owner_id)
            .await?;

        let now = Utc::now();
        let record = MediaRecord {
            id: Uuid::new_v4().to_string(),
            owner_id,
            original_filename: filename,
            hash,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.metadata.insert_media(&record).await {
            tracing::error!(hash = %record.hash, error = %e, "Media insert failed, returning reference");
            if let Err(undo) = self.drop_reference(&record.hash).await {
                tracing::warn!(hash = %record.hash, error = %undo, "Failed to return reference after media insert failure");
            }
            return Err(e);
        }

        metrics::record_ingest(
            if deduplicated { "deduplicated" } else { "stored" },
            content.file_size as u64,
        );
        tracing::info!(
            media_id = %record.id,
            owner_id = %record.owner_id,
            hash = %record.hash,
            storage_path = %content.storage_path,
            deduplicated,
            "Ingested media"
        );

        record_best_effort(
            self.activity.as_ref(),
            &record.owner_id,
            Some(&record.id),
            ActivityEvent::MediaUploaded {
                filename: record.original_filename.clone(),
                file_size: content.file_size,
                deduplicated,
            },
        )
        .await;

        Ok(IngestOutcome {
            public_url: public_url(&self.limits.url_prefix, &content.storage_path),
            file_size: content.file_size,
            mime_type: content.mime_type,
            media: record,
            deduplicated,
        })
    }

    /// Take one reference on the content row for `hash`, creating it if needed
    ///
    /// Returns the row and whether it already existed.
    async fn acquire_content(
        &self,
        hash: &str,
        bytes: &[u8],
        mime_type: &str,
        filename: &str,
        owner_id: &str,
    ) -> CmsResult<(ContentBlob, bool)> {
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(blob) = self.metadata.increment_reference(hash).await? {
                tracing::debug!(hash, reference_count = blob.reference_count, "Content already stored");
                return Ok((blob, true));
            }

            let storage_path = allocate_storage_path(owner_id, filename);
            self.backend.put(&storage_path, bytes).await?;

            let new_blob = NewContentBlob {
                hash: hash.to_string(),
                storage_path: storage_path.clone(),
                display_filename: filename.to_string(),
                file_size: bytes.len() as i64,
                mime_type: mime_type.to_string(),
            };

            match self.metadata.insert_blob(&new_blob).await {
                Ok(BlobInsert::Inserted(blob)) => return Ok((blob, false)),
                Ok(BlobInsert::AlreadyExists) => {
                    // Another upload of the same bytes created the row first
                    tracing::debug!(hash, attempt, "Lost content insert race, retrying as hit");
                    if let Err(e) = self.backend.delete(&storage_path).await {
                        tracing::warn!(storage_path = %storage_path, error = %e, "Failed to remove redundant blob");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        hash,
                        storage_path = %storage_path,
                        error = %e,
                        "Blob written but content row insert failed; orphan left for sweep"
                    );
                    return Err(e);
                }
            }
        }

        Err(CmsError::Internal(format!(
            "Could not settle content row for {} after {} attempts",
            hash, MAX_ATTEMPTS
        )))
    }

    /// Remove the requester's media record, freeing storage on last reference
    pub async fn release(&self, media_id: &str, requester_id: &str) -> CmsResult<ReleaseOutcome> {
        let record = self
            .metadata
            .get_media(media_id)
            .await?
            .ok_or_else(|| CmsError::NotFound(format!("Media file not found: {}", media_id)))?;

        if record.owner_id != requester_id {
            tracing::warn!(media_id, requester_id, "Rejected release by non-owner");
            return Err(CmsError::Forbidden(
                "Only the owner may delete this media file".to_string(),
            ));
        }

        // The record goes first: of two concurrent releases only one
        // deletes it, so only one drops the reference.
        if !self.metadata.delete_media(&record).await? {
            return Err(CmsError::NotFound(format!("Media file not found: {}", media_id)));
        }

        let dropped = self.drop_reference(&record.hash).await?;
        let (blob_reclaimed, content_missing, outcome) = match &dropped {
            ReferenceDrop::Remaining(_) => (false, false, "decremented"),
            ReferenceDrop::Reclaimed { .. } => (true, false, "reclaimed"),
            ReferenceDrop::Missing => {
                tracing::warn!(media_id, hash = %record.hash, "Content row already missing on release");
                (false, true, "content_missing")
            }
        };
        metrics::record_release(outcome);
        tracing::info!(media_id, hash = %record.hash, outcome, "Released media");

        record_best_effort(
            self.activity.as_ref(),
            requester_id,
            Some(&record.id),
            ActivityEvent::MediaDeleted {
                filename: record.original_filename.clone(),
                storage_reclaimed: blob_reclaimed,
            },
        )
        .await;

        Ok(ReleaseOutcome {
            media_id: record.id,
            blob_reclaimed,
            content_missing,
        })
    }

    /// Drop one reference from the content row for `hash`
    ///
    /// At the last reference the row is deleted, then its bytes. A failed
    /// byte delete only leaves an orphan file behind.
    pub async fn drop_reference(&self, hash: &str) -> CmsResult<ReferenceDrop> {
        for _ in 0..MAX_ATTEMPTS {
            if let Some(remaining) = self.metadata.decrement_reference(hash).await? {
                return Ok(ReferenceDrop::Remaining(remaining));
            }

            if let Some(blob) = self.metadata.delete_blob_if_last(hash).await? {
                if let Err(e) = self.backend.delete(&blob.storage_path).await {
                    tracing::warn!(
                        hash,
                        storage_path = %blob.storage_path,
                        error = %e,
                        "Content row removed but blob delete failed; orphan left for sweep"
                    );
                }
                return Ok(ReferenceDrop::Reclaimed {
                    storage_path: blob.storage_path,
                });
            }

            if self.metadata.get_blob(hash).await?.is_none() {
                return Ok(ReferenceDrop::Missing);
            }
            // A concurrent ingest raised the count between the two statements
        }

        Err(CmsError::Internal(format!(
            "Could not drop reference on {} after {} attempts",
            hash, MAX_ATTEMPTS
        )))
    }

    /// List media records, newest first
    pub async fn list(&self, query: &MediaQuery) -> CmsResult<Vec<MediaView>> {
        let media = self.metadata.list_media(query).await?;
        Ok(media.into_iter().map(|m| self.to_view(m)).collect())
    }

    /// Fetch one media record
    pub async fn get(&self, media_id: &str) -> CmsResult<Option<MediaView>> {
        Ok(self
            .metadata
            .get_media_with_content(media_id)
            .await?
            .map(|m| self.to_view(m)))
    }

    /// Resolve a storage path to its content row and bytes
    pub async fn open(&self, storage_path: &str) -> CmsResult<Option<(ContentBlob, Vec<u8>)>> {
        let Some(blob) = self.metadata.get_blob_by_path(storage_path).await? else {
            return Ok(None);
        };

        match self.backend.get(&blob.storage_path).await? {
            Some(data) => Ok(Some((blob, data))),
            None => {
                tracing::warn!(hash = %blob.hash, storage_path, "Content row has no bytes");
                Ok(None)
            }
        }
    }

    fn to_view(&self, media: MediaWithContent) -> MediaView {
        let MediaWithContent { record, content } = media;
        MediaView {
            media_id: record.id,
            owner_id: record.owner_id,
            original_filename: record.original_filename,
            public_url: content
                .as_ref()
                .map(|c| public_url(&self.limits.url_prefix, &c.storage_path)),
            file_size: content.as_ref().map(|c| c.file_size),
            mime_type: content.map(|c| c.mime_type),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    /// Delete stored files that no content row owns and that are older than `grace`
    pub async fn sweep_orphans(&self, grace: Duration) -> CmsResult<u64> {
        let cutoff = Utc::now() - grace;
        let known: HashSet<String> = self.metadata.all_storage_paths().await?.into_iter().collect();

        let mut removed = 0;
        for stored in self.backend.list().await? {
            if known.contains(&stored.path) || stored.modified >= cutoff {
                continue;
            }

            match self.backend.delete(&stored.path).await {
                Ok(()) => {
                    tracing::info!(storage_path = %stored.path, size = stored.size, "Deleted orphaned blob");
                    removed += 1;
                }
                Err(e) => tracing::warn!(storage_path = %stored.path, error = %e, "Failed to delete orphaned blob"),
            }
        }

        Ok(removed)
    }

    /// Bring settled reference counts back in line with the media table
    ///
    /// Only rows untouched since `settled_before` are considered, so counts
    /// held by in-flight ingests and releases are left alone.
    pub async fn reconcile_references(&self, settled_before: DateTime<Utc>) -> CmsResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for drift in self.metadata.list_reference_drift(settled_before).await? {
            if drift.actual == 0 {
                if let Some(blob) = self
                    .metadata
                    .delete_blob_if_unreferenced(&drift.hash, settled_before)
                    .await?
                {
                    if let Err(e) = self.backend.delete(&blob.storage_path).await {
                        tracing::warn!(storage_path = %blob.storage_path, error = %e, "Failed to delete unreferenced blob");
                    }
                    tracing::info!(hash = %drift.hash, recorded = drift.recorded, "Reclaimed unreferenced content");
                    report.reclaimed += 1;
                }
            } else if self.metadata.repair_reference_count(&drift, settled_before).await? {
                tracing::info!(
                    hash = %drift.hash,
                    recorded = drift.recorded,
                    actual = drift.actual,
                    "Repaired reference count"
                );
                report.repaired += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        activity::{ActivityQuery, SqliteActivityLog},
        blob_store::{DiskBlobBackend, StoredBlob},
        db,
        media::metadata::SqliteMetadataStore,
    };
    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use tempfile::{tempdir, TempDir};

    const LIMIT: usize = 10 * 1024 * 1024;

    struct Harness {
        engine: DedupEngine,
        db: SqlitePool,
        metadata: SqliteMetadataStore,
        activity: SqliteActivityLog,
        backend: Arc<DiskBlobBackend>,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let db = db::create_memory_pool().await.unwrap();
        let backend = Arc::new(DiskBlobBackend::new(dir.path().join("storage")));
        let metadata = SqliteMetadataStore::new(db.clone());
        let activity = SqliteActivityLog::new(db.clone());

        let engine = DedupEngine::new(
            backend.clone(),
            Arc::new(metadata.clone()),
            Arc::new(activity.clone()),
            MediaLimits {
                max_upload_size: LIMIT,
                url_prefix: "/storage".to_string(),
            },
        );

        Harness {
            engine,
            db,
            metadata,
            activity,
            backend,
            _dir: dir,
        }
    }

    fn upload(bytes: &[u8], filename: &str, owner: &str) -> IngestRequest {
        IngestRequest {
            bytes: bytes.to_vec(),
            mime_type: "image/png".to_string(),
            filename: filename.to_string(),
            owner_id: owner.to_string(),
        }
    }

    async fn stored_files(h: &Harness) -> Vec<StoredBlob> {
        h.backend.list().await.unwrap()
    }

    #[tokio::test]
    async fn test_identical_uploads_share_one_blob() {
        let h = harness().await;

        let a = h.engine.ingest(upload(b"same bytes", "a.png", "alice")).await.unwrap();
        let b = h.engine.ingest(upload(b"same bytes", "b.jpg", "bob")).await.unwrap();

        assert_eq!(a.media.hash, b.media.hash);
        assert!(!a.deduplicated);
        assert!(b.deduplicated);
        assert_eq!(a.public_url, b.public_url);
        assert_eq!(b.media.original_filename, "b.jpg");

        let files = stored_files(&h).await;
        assert_eq!(files.len(), 1);

        let blob = h.metadata.get_blob(&a.media.hash).await.unwrap().unwrap();
        assert_eq!(blob.reference_count, 2);
        // Descriptive fields come from the first upload and never change
        assert_eq!(blob.display_filename, "a.png");
        assert_eq!(format!("/storage/{}", blob.storage_path), a.public_url);
    }

    #[tokio::test]
    async fn test_reference_count_tracks_ingests_minus_releases() {
        let h = harness().await;

        let mut ids = Vec::new();
        for i in 0..5 {
            let outcome = h
                .engine
                .ingest(upload(b"counted", &format!("{}.png", i), "alice"))
                .await
                .unwrap();
            ids.push(outcome.media);
        }
        let hash = ids[0].hash.clone();

        for record in ids.iter().take(3) {
            h.engine.release(&record.id, "alice").await.unwrap();
        }

        let blob = h.metadata.get_blob(&hash).await.unwrap().unwrap();
        assert_eq!(blob.reference_count, 2);
        assert_eq!(h.metadata.count_media_for_hash(&hash).await.unwrap(), 2);
        assert_eq!(stored_files(&h).await.len(), 1);

        for record in ids.iter().skip(3) {
            h.engine.release(&record.id, "alice").await.unwrap();
        }

        assert!(h.metadata.get_blob(&hash).await.unwrap().is_none());
        assert!(stored_files(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_two_records_scenario() {
        let h = harness().await;

        let a = h.engine.ingest(upload(b"shared", "a.png", "alice")).await.unwrap();
        let b = h.engine.ingest(upload(b"shared", "b.png", "alice")).await.unwrap();
        let hash = a.media.hash.clone();

        let first = h.engine.release(&a.media.id, "alice").await.unwrap();
        assert!(!first.blob_reclaimed);
        assert_eq!(h.metadata.get_blob(&hash).await.unwrap().unwrap().reference_count, 1);
        assert_eq!(stored_files(&h).await.len(), 1);

        let second = h.engine.release(&b.media.id, "alice").await.unwrap();
        assert!(second.blob_reclaimed);
        assert!(h.metadata.get_blob(&hash).await.unwrap().is_none());
        assert!(stored_files(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_reingest_after_reclaim_allocates_fresh_path() {
        let h = harness().await;

        let first = h.engine.ingest(upload(b"phoenix", "p.png", "alice")).await.unwrap();
        h.engine.release(&first.media.id, "alice").await.unwrap();

        let second = h.engine.ingest(upload(b"phoenix", "p.png", "alice")).await.unwrap();
        assert!(!second.deduplicated);
        assert_ne!(first.public_url, second.public_url);

        let blob = h.metadata.get_blob(&second.media.hash).await.unwrap().unwrap();
        assert_eq!(blob.reference_count, 1);
        assert!(h.backend.exists(&blob.storage_path).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_forbidden() {
        let h = harness().await;

        let a = h.engine.ingest(upload(b"mine", "a.png", "alice")).await.unwrap();
        let err = h.engine.release(&a.media.id, "mallory").await.unwrap_err();
        assert!(matches!(err, CmsError::Forbidden(_)));

        assert!(h.metadata.get_media(&a.media.id).await.unwrap().is_some());
        let blob = h.metadata.get_blob(&a.media.hash).await.unwrap().unwrap();
        assert_eq!(blob.reference_count, 1);
        assert_eq!(stored_files(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn test_release_unknown_media() {
        let h = harness().await;
        let err = h.engine.release("no-such-id", "alice").await.unwrap_err();
        assert!(matches!(err, CmsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_release_with_missing_content_row_succeeds() {
        let h = harness().await;

        let a = h.engine.ingest(upload(b"lost row", "a.png", "alice")).await.unwrap();
        sqlx::query("DELETE FROM content_blob").execute(&h.db).await.unwrap();

        let outcome = h.engine.release(&a.media.id, "alice").await.unwrap();
        assert!(outcome.content_missing);
        assert!(!outcome.blob_reclaimed);
        assert!(h.metadata.get_media(&a.media.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_size_ceiling_is_inclusive() {
        let h = harness().await;

        let exact = vec![7u8; LIMIT];
        assert!(h.engine.ingest(upload(&exact, "exact.bin", "alice")).await.is_ok());

        let over = vec![8u8; LIMIT + 1];
        let err = h.engine.ingest(upload(&over, "over.bin", "alice")).await.unwrap_err();
        assert!(matches!(err, CmsError::TooLarge { size, limit } if size == LIMIT + 1 && limit == LIMIT));

        // Only the accepted upload left a file and a row
        assert_eq!(stored_files(&h).await.len(), 1);
        assert!(h.metadata.get_blob(&compute_digest(&over)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_upload_is_missing_file() {
        let h = harness().await;
        let err = h.engine.ingest(upload(b"", "empty.txt", "alice")).await.unwrap_err();
        assert!(matches!(err, CmsError::MissingFile));
        assert!(stored_files(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_identical_ingests() {
        let h = harness().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .ingest(upload(b"racing bytes", &format!("{}.png", i), &format!("user-{}", i)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let hash = compute_digest(b"racing bytes");
        let blob = h.metadata.get_blob(&hash).await.unwrap().unwrap();
        assert_eq!(blob.reference_count, 8);
        assert_eq!(stored_files(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn test_content_insert_failure_leaves_sweepable_orphan() {
        let h = harness().await;
        sqlx::query(
            "CREATE TRIGGER fail_blob_insert BEFORE INSERT ON content_blob BEGIN SELECT RAISE(ABORT, 'boom'); END",
        )
        .execute(&h.db)
        .await
        .unwrap();

        let err = h.engine.ingest(upload(b"orphan", "o.png", "alice")).await.unwrap_err();
        assert!(err.is_store_failure());
        assert_eq!(stored_files(&h).await.len(), 1);
        assert!(h.engine.list(&MediaQuery::default()).await.unwrap().is_empty());

        // Inside the grace period the file is left alone
        assert_eq!(h.engine.sweep_orphans(Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(h.engine.sweep_orphans(Duration::seconds(-1)).await.unwrap(), 1);
        assert!(stored_files(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_media_insert_failure_returns_reference() {
        let h = harness().await;
        let kept = h.engine.ingest(upload(b"shared", "a.png", "alice")).await.unwrap();

        sqlx::query("CREATE TRIGGER fail_media_insert BEFORE INSERT ON media BEGIN SELECT RAISE(ABORT, 'boom'); END")
            .execute(&h.db)
            .await
            .unwrap();

        assert!(h.engine.ingest(upload(b"shared", "b.png", "bob")).await.is_err());
        let blob = h.metadata.get_blob(&kept.media.hash).await.unwrap().unwrap();
        assert_eq!(blob.reference_count, 1);

        // A brand new hash is reclaimed entirely
        assert!(h.engine.ingest(upload(b"fresh", "c.png", "bob")).await.is_err());
        assert!(h.metadata.get_blob(&compute_digest(b"fresh")).await.unwrap().is_none());
        assert_eq!(stored_files(&h).await.len(), 1);
    }

    struct BrokenBackend;

    #[async_trait]
    impl BlobBackend for BrokenBackend {
        async fn put(&self, path: &str, _data: &[u8]) -> CmsResult<()> {
            Err(CmsError::BlobStorage(format!("disk full writing {}", path)))
        }
        async fn get(&self, _path: &str) -> CmsResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn delete(&self, _path: &str) -> CmsResult<()> {
            Ok(())
        }
        async fn exists(&self, _path: &str) -> CmsResult<bool> {
            Ok(false)
        }
        async fn list(&self) -> CmsResult<Vec<StoredBlob>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_blob_write_failure_creates_no_metadata() {
        let db = db::create_memory_pool().await.unwrap();
        let metadata = SqliteMetadataStore::new(db.clone());
        let engine = DedupEngine::new(
            Arc::new(BrokenBackend),
            Arc::new(metadata.clone()),
            Arc::new(SqliteActivityLog::new(db)),
            MediaLimits {
                max_upload_size: LIMIT,
                url_prefix: "/storage".to_string(),
            },
        );

        let err = engine.ingest(upload(b"never", "n.png", "alice")).await.unwrap_err();
        assert!(matches!(err, CmsError::BlobStorage(_)));
        assert!(metadata.get_blob(&compute_digest(b"never")).await.unwrap().is_none());
        assert!(metadata.list_media(&MediaQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_get_views() {
        let h = harness().await;
        let a = h.engine.ingest(upload(b"one", "one.png", "alice")).await.unwrap();
        h.engine.ingest(upload(b"two", "two.png", "bob")).await.unwrap();

        let alice = h
            .engine
            .list(&MediaQuery {
                owner_id: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].original_filename, "one.png");
        assert_eq!(alice[0].file_size, Some(3));
        assert_eq!(alice[0].public_url.as_deref(), Some(a.public_url.as_str()));

        let view = h.engine.get(&a.media.id).await.unwrap().unwrap();
        assert_eq!(view.mime_type.as_deref(), Some("image/png"));
        assert!(h.engine.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_resolves_storage_path() {
        let h = harness().await;
        let a = h.engine.ingest(upload(b"serve me", "s.png", "alice")).await.unwrap();
        let path = a.public_url.trim_start_matches("/storage/").to_string();

        let (blob, data) = h.engine.open(&path).await.unwrap().unwrap();
        assert_eq!(data, b"serve me");
        assert_eq!(blob.hash, a.media.hash);
        assert!(h.engine.open("media/alice/unknown.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activity_is_recorded() {
        let h = harness().await;
        let a = h.engine.ingest(upload(b"logged", "l.png", "alice")).await.unwrap();
        h.engine.release(&a.media.id, "alice").await.unwrap();

        let page = h.activity.list(&ActivityQuery::default()).await.unwrap();
        let codes: Vec<&str> = page.activities.iter().map(|e| e.activity_code.as_str()).collect();
        assert_eq!(codes, vec!["media_deleted", "media_uploaded"]);
        assert_eq!(
            page.activities[0].metadata,
            ActivityEvent::MediaDeleted {
                filename: "l.png".to_string(),
                storage_reclaimed: true
            }
        );
    }

    #[tokio::test]
    async fn test_reconcile_repairs_and_reclaims() {
        let h = harness().await;
        let a = h.engine.ingest(upload(b"drifted", "d.png", "alice")).await.unwrap();
        let gone = h.engine.ingest(upload(b"abandoned", "g.png", "alice")).await.unwrap();

        sqlx::query("UPDATE content_blob SET reference_count = 5 WHERE hash = ?1")
            .bind(&a.media.hash)
            .execute(&h.db)
            .await
            .unwrap();
        sqlx::query("DELETE FROM media WHERE id = ?1")
            .bind(&gone.media.id)
            .execute(&h.db)
            .await
            .unwrap();

        // Nothing has settled yet
        let early = h.engine.reconcile_references(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(early, ReconcileReport::default());

        let report = h.engine.reconcile_references(Utc::now() + Duration::seconds(5)).await.unwrap();
        assert_eq!(report, ReconcileReport { repaired: 1, reclaimed: 1 });

        assert_eq!(h.metadata.get_blob(&a.media.hash).await.unwrap().unwrap().reference_count, 1);
        assert!(h.metadata.get_blob(&gone.media.hash).await.unwrap().is_none());
        assert_eq!(stored_files(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_leaves_in_flight_release_alone() {
        let h = harness().await;
        let a = h.engine.ingest(upload(b"shared", "a.png", "alice")).await.unwrap();
        let b = h.engine.ingest(upload(b"shared", "b.png", "bob")).await.unwrap();

        sqlx::query("UPDATE content_blob SET updated_at = ?2 WHERE hash = ?1")
            .bind(&a.media.hash)
            .bind(Utc::now() - Duration::hours(48))
            .execute(&h.db)
            .await
            .unwrap();

        // Release of `a` has removed its record but not yet dropped its reference
        assert!(h.metadata.delete_media(&a.media).await.unwrap());

        let report = h.engine.reconcile_references(Utc::now() - Duration::hours(24)).await.unwrap();
        assert_eq!(report, ReconcileReport::default());

        let dropped = h.engine.drop_reference(&a.media.hash).await.unwrap();
        assert_eq!(dropped, ReferenceDrop::Remaining(1));

        let view = h.engine.get(&b.media.id).await.unwrap().unwrap();
        let url = view.public_url.unwrap();
        let storage_path = url.trim_start_matches("/storage/");
        let (blob, bytes) = h.engine.open(storage_path).await.unwrap().unwrap();
        assert_eq!(blob.reference_count, 1);
        assert_eq!(bytes, b"shared".to_vec());
    }
}
