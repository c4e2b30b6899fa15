/// Metadata store for content blobs and media records
///
/// Every reference-count change is a single conditional statement. Nothing
/// here reads a count and writes it back, so concurrent requests for the same
/// hash are serialized by the database rather than by application locks.
use crate::{
    error::CmsResult,
    media::models::{
        BlobInsert, ContentBlob, MediaQuery, MediaRecord, MediaWithContent, NewContentBlob,
        ReferenceDrift, StorageSummary,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Row-level access to the content_blob and media tables
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a ContentBlob by hash
    async fn get_blob(&self, hash: &str) -> CmsResult<Option<ContentBlob>>;

    /// Fetch a ContentBlob by its storage path
    async fn get_blob_by_path(&self, storage_path: &str) -> CmsResult<Option<ContentBlob>>;

    /// Atomically add one reference; `None` when no row exists for the hash
    async fn increment_reference(&self, hash: &str) -> CmsResult<Option<ContentBlob>>;

    /// Insert a fresh row with a reference count of one
    async fn insert_blob(&self, blob: &NewContentBlob) -> CmsResult<BlobInsert>;

    /// Atomically remove one reference while more than one remains
    ///
    /// Returns the new count, or `None` when the row is absent or holds
    /// exactly one reference.
    async fn decrement_reference(&self, hash: &str) -> CmsResult<Option<i64>>;

    /// Delete the row if it holds its last reference, returning it
    async fn delete_blob_if_last(&self, hash: &str) -> CmsResult<Option<ContentBlob>>;

    /// Insert a media record
    async fn insert_media(&self, record: &MediaRecord) -> CmsResult<()>;

    /// Fetch a media record by id
    async fn get_media(&self, id: &str) -> CmsResult<Option<MediaRecord>>;

    /// Fetch a media record together with its content row
    async fn get_media_with_content(&self, id: &str) -> CmsResult<Option<MediaWithContent>>;

    /// Delete a media record; false when it did not exist
    ///
    /// The content row for the record's hash is touched in the same
    /// transaction, which keeps reconciliation off it until the release
    /// that follows has dropped its reference.
    async fn delete_media(&self, record: &MediaRecord) -> CmsResult<bool>;

    /// List media records, newest first
    async fn list_media(&self, query: &MediaQuery) -> CmsResult<Vec<MediaWithContent>>;

    /// Number of media records that reference a hash
    async fn count_media_for_hash(&self, hash: &str) -> CmsResult<i64>;

    /// Every storage path currently owned by a ContentBlob row
    async fn all_storage_paths(&self) -> CmsResult<Vec<String>>;

    /// Rows whose count disagrees with their media rows and that have not
    /// been touched since `settled_before`
    async fn list_reference_drift(&self, settled_before: DateTime<Utc>) -> CmsResult<Vec<ReferenceDrift>>;

    /// Overwrite a drifted count if the row and its media rows are unchanged
    async fn repair_reference_count(
        &self,
        drift: &ReferenceDrift,
        settled_before: DateTime<Utc>,
    ) -> CmsResult<bool>;

    /// Delete a settled row that no media record references, returning it
    async fn delete_blob_if_unreferenced(
        &self,
        hash: &str,
        settled_before: DateTime<Utc>,
    ) -> CmsResult<Option<ContentBlob>>;
}

const BLOB_COLUMNS: &str =
    "hash, storage_path, display_filename, file_size, mime_type, reference_count, created_at, updated_at";

const MEDIA_JOIN_SELECT: &str = r#"
    SELECT m.id, m.owner_id, m.original_filename, m.hash, m.created_at, m.updated_at,
           b.hash AS b_hash, b.storage_path AS b_storage_path,
           b.display_filename AS b_display_filename, b.file_size AS b_file_size,
           b.mime_type AS b_mime_type, b.reference_count AS b_reference_count,
           b.created_at AS b_created_at, b.updated_at AS b_updated_at
    FROM media m
    LEFT JOIN content_blob b ON b.hash = m.hash
"#;

/// SQLite-backed metadata store
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Row counts and byte totals for readiness reporting
    pub async fn storage_summary(&self) -> CmsResult<StorageSummary> {
        let (content_blobs, stored_bytes, deduplicated_bytes): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(file_size), 0),
                   COALESCE(SUM(file_size * (reference_count - 1)), 0)
            FROM content_blob
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let (media_records,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media")
            .fetch_one(&self.db)
            .await?;

        Ok(StorageSummary {
            content_blobs,
            media_records,
            stored_bytes,
            deduplicated_bytes,
        })
    }
}

fn blob_from_row(row: &SqliteRow) -> Result<ContentBlob, sqlx::Error> {
    Ok(ContentBlob {
        hash: row.try_get("hash")?,
        storage_path: row.try_get("storage_path")?,
        display_filename: row.try_get("display_filename")?,
        file_size: row.try_get("file_size")?,
        mime_type: row.try_get("mime_type")?,
        reference_count: row.try_get("reference_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn media_from_row(row: &SqliteRow) -> Result<MediaRecord, sqlx::Error> {
    Ok(MediaRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        original_filename: row.try_get("original_filename")?,
        hash: row.try_get("hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn media_with_content_from_row(row: &SqliteRow) -> Result<MediaWithContent, sqlx::Error> {
    let record = media_from_row(row)?;

    let content = match row.try_get::<Option<String>, _>("b_hash")? {
        Some(hash) => Some(ContentBlob {
            hash,
            storage_path: row.try_get("b_storage_path")?,
            display_filename: row.try_get("b_display_filename")?,
            file_size: row.try_get("b_file_size")?,
            mime_type: row.try_get("b_mime_type")?,
            reference_count: row.try_get("b_reference_count")?,
            created_at: row.try_get("b_created_at")?,
            updated_at: row.try_get("b_updated_at")?,
        }),
        None => None,
    };

    Ok(MediaWithContent { record, content })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get_blob(&self, hash: &str) -> CmsResult<Option<ContentBlob>> {
        let row = sqlx::query(&format!("SELECT {} FROM content_blob WHERE hash = ?1", BLOB_COLUMNS))
            .bind(hash)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.as_ref().map(blob_from_row).transpose()?)
    }

    async fn get_blob_by_path(&self, storage_path: &str) -> CmsResult<Option<ContentBlob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_blob WHERE storage_path = ?1",
            BLOB_COLUMNS
        ))
        .bind(storage_path)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.as_ref().map(blob_from_row).transpose()?)
    }

    async fn increment_reference(&self, hash: &str) -> CmsResult<Option<ContentBlob>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE content_blob
            SET reference_count = reference_count + 1, updated_at = ?2
            WHERE hash = ?1
            RETURNING {}
            "#,
            BLOB_COLUMNS
        ))
        .bind(hash)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await?;

        Ok(row.as_ref().map(blob_from_row).transpose()?)
    }

    async fn insert_blob(&self, blob: &NewContentBlob) -> CmsResult<BlobInsert> {
        let now = Utc::now();
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO content_blob
                (hash, storage_path, display_filename, file_size, mime_type, reference_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
            RETURNING {}
            "#,
            BLOB_COLUMNS
        ))
        .bind(&blob.hash)
        .bind(&blob.storage_path)
        .bind(&blob.display_filename)
        .bind(blob.file_size)
        .bind(&blob.mime_type)
        .bind(now)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(row) => Ok(BlobInsert::Inserted(blob_from_row(&row)?)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(BlobInsert::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn decrement_reference(&self, hash: &str) -> CmsResult<Option<i64>> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE content_blob
            SET reference_count = reference_count - 1, updated_at = ?2
            WHERE hash = ?1 AND reference_count > 1
            RETURNING reference_count
            "#,
        )
        .bind(hash)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await?;

        Ok(count)
    }

    async fn delete_blob_if_last(&self, hash: &str) -> CmsResult<Option<ContentBlob>> {
        let row = sqlx::query(&format!(
            "DELETE FROM content_blob WHERE hash = ?1 AND reference_count <= 1 RETURNING {}",
            BLOB_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.as_ref().map(blob_from_row).transpose()?)
    }

    async fn insert_media(&self, record: &MediaRecord) -> CmsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO media (id, owner_id, original_filename, hash, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.original_filename)
        .bind(&record.hash)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_media(&self, id: &str) -> CmsResult<Option<MediaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, original_filename, hash, created_at, updated_at
            FROM media
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.as_ref().map(media_from_row).transpose()?)
    }

    async fn get_media_with_content(&self, id: &str) -> CmsResult<Option<MediaWithContent>> {
        let row = sqlx::query(&format!("{} WHERE m.id = ?1", MEDIA_JOIN_SELECT))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.as_ref().map(media_with_content_from_row).transpose()?)
    }

    async fn delete_media(&self, record: &MediaRecord) -> CmsResult<bool> {
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE content_blob SET updated_at = ?2 WHERE hash = ?1")
            .bind(&record.hash)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM media WHERE id = ?1")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_media(&self, query: &MediaQuery) -> CmsResult<Vec<MediaWithContent>> {
        let rows = sqlx::query(&format!(
            r#"
            {}
            WHERE (?1 IS NULL OR m.owner_id = ?1)
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT ?2 OFFSET ?3
            "#,
            MEDIA_JOIN_SELECT
        ))
        .bind(query.owner_id.as_deref())
        .bind(query.effective_limit())
        .bind(query.effective_offset())
        .fetch_all(&self.db)
        .await?;

        let mut media = Vec::with_capacity(rows.len());
        for row in rows {
            media.push(media_with_content_from_row(&row)?);
        }

        Ok(media)
    }

    async fn count_media_for_hash(&self, hash: &str) -> CmsResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM media WHERE hash = ?1")
            .bind(hash)
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }

    async fn all_storage_paths(&self) -> CmsResult<Vec<String>> {
        let paths = sqlx::query_scalar::<_, String>("SELECT storage_path FROM content_blob")
            .fetch_all(&self.db)
            .await?;

        Ok(paths)
    }

    async fn list_reference_drift(&self, settled_before: DateTime<Utc>) -> CmsResult<Vec<ReferenceDrift>> {
        let rows = sqlx::query(
            r#"
            SELECT hash, recorded, actual FROM (
                SELECT b.hash AS hash,
                       b.reference_count AS recorded,
                       (SELECT COUNT(*) FROM media m WHERE m.hash = b.hash) AS actual,
                       b.updated_at AS updated_at
                FROM content_blob b
            )
            WHERE recorded <> actual AND updated_at < ?1
            ORDER BY hash
            "#,
        )
        .bind(settled_before)
        .fetch_all(&self.db)
        .await?;

        let mut drift = Vec::with_capacity(rows.len());
        for row in rows {
            drift.push(ReferenceDrift {
                hash: row.try_get("hash")?,
                recorded: row.try_get("recorded")?,
                actual: row.try_get("actual")?,
            });
        }

        Ok(drift)
    }

    async fn repair_reference_count(
        &self,
        drift: &ReferenceDrift,
        settled_before: DateTime<Utc>,
    ) -> CmsResult<bool> {
        if drift.actual < 1 {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE content_blob
            SET reference_count = ?3, updated_at = ?4
            WHERE hash = ?1
              AND reference_count = ?2
              AND updated_at < ?5
              AND (SELECT COUNT(*) FROM media WHERE media.hash = ?1) = ?3
            "#,
        )
        .bind(&drift.hash)
        .bind(drift.recorded)
        .bind(drift.actual)
        .bind(Utc::now())
        .bind(settled_before)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_blob_if_unreferenced(
        &self,
        hash: &str,
        settled_before: DateTime<Utc>,
    ) -> CmsResult<Option<ContentBlob>> {
        let row = sqlx::query(&format!(
            r#"
            DELETE FROM content_blob
            WHERE hash = ?1
              AND updated_at < ?2
              AND NOT EXISTS (SELECT 1 FROM media WHERE media.hash = ?1)
            RETURNING {}
            "#,
            BLOB_COLUMNS
        ))
        .bind(hash)
        .bind(settled_before)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.as_ref().map(blob_from_row).transpose()?)
    }
}
