/// Activity log
///
/// Records who did what to which entity. Callers treat recording as
/// fire-and-forget: a failed write is logged and never fails the operation
/// that produced the event.

pub mod events;

pub use events::{ActivityEvent, EntityType};

use crate::error::{CmsError, CmsResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Actor id used for entries written by background jobs
pub const SYSTEM_ACTOR: &str = "system";

/// Sink for activity events
#[async_trait]
pub trait ActivityLogger: Send + Sync {
    async fn record(&self, actor_id: &str, entity_id: Option<&str>, event: &ActivityEvent) -> CmsResult<()>;
}

/// Record an event, swallowing any failure
pub async fn record_best_effort(
    logger: &dyn ActivityLogger,
    actor_id: &str,
    entity_id: Option<&str>,
    event: ActivityEvent,
) {
    if let Err(e) = logger.record(actor_id, entity_id, &event).await {
        tracing::warn!(
            activity_code = event.activity_code(),
            actor_id,
            error = %e,
            "Failed to log activity"
        );
    }
}

/// Stored activity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub actor_id: String,
    pub activity_code: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub metadata: ActivityEvent,
    pub created_at: DateTime<Utc>,
}

/// Activity listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityQuery {
    #[serde(rename = "user_id")]
    pub actor_id: Option<String>,
    #[serde(rename = "type")]
    pub activity_code: Option<String>,
    pub entity_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Pagination block of an activity page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub has_more: bool,
}

/// One page of activity entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPage {
    pub activities: Vec<ActivityEntry>,
    pub pagination: Pagination,
}

/// SQLite-backed activity log
#[derive(Clone)]
pub struct SqliteActivityLog {
    db: SqlitePool,
}

impl SqliteActivityLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// List entries newest first
    pub async fn list(&self, query: &ActivityQuery) -> CmsResult<ActivityPage> {
        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        let offset = query.offset.unwrap_or(0).max(0);

        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, activity_code, entity_type, entity_id, title, description, metadata, created_at
            FROM activity_log
            WHERE (?1 IS NULL OR actor_id = ?1)
              AND (?2 IS NULL OR activity_code = ?2)
              AND (?3 IS NULL OR entity_type = ?3)
            ORDER BY created_at DESC, id DESC
            LIMIT ?4 OFFSET ?5
            "#,
        )
        .bind(query.actor_id.as_deref())
        .bind(query.activity_code.as_deref())
        .bind(query.entity_type.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM activity_log
            WHERE (?1 IS NULL OR actor_id = ?1)
              AND (?2 IS NULL OR activity_code = ?2)
              AND (?3 IS NULL OR entity_type = ?3)
            "#,
        )
        .bind(query.actor_id.as_deref())
        .bind(query.activity_code.as_deref())
        .bind(query.entity_type.as_deref())
        .fetch_one(&self.db)
        .await?;

        let mut activities = Vec::with_capacity(rows.len());
        for row in rows {
            activities.push(entry_from_row(&row)?);
        }

        let has_more = offset + (activities.len() as i64) < total;

        Ok(ActivityPage {
            activities,
            pagination: Pagination {
                limit,
                offset,
                total,
                has_more,
            },
        })
    }
}

fn entry_from_row(row: &SqliteRow) -> CmsResult<ActivityEntry> {
    let metadata: String = row.try_get("metadata")?;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| CmsError::Internal(format!("Corrupt activity metadata: {}", e)))?;

    Ok(ActivityEntry {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        activity_code: row.try_get("activity_code")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        metadata,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ActivityLogger for SqliteActivityLog {
    async fn record(&self, actor_id: &str, entity_id: Option<&str>, event: &ActivityEvent) -> CmsResult<()> {
        let metadata = serde_json::to_string(event)
            .map_err(|e| CmsError::Internal(format!("Failed to encode activity: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO activity_log
                (actor_id, activity_code, entity_type, entity_id, title, description, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(actor_id)
        .bind(event.activity_code())
        .bind(event.entity_type().as_str())
        .bind(entity_id)
        .bind(event.title())
        .bind(event.description())
        .bind(metadata)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn create_test_log() -> SqliteActivityLog {
        SqliteActivityLog::new(db::create_memory_pool().await.unwrap())
    }

    fn uploaded(name: &str) -> ActivityEvent {
        ActivityEvent::MediaUploaded {
            filename: name.to_string(),
            file_size: 3,
            deduplicated: false,
        }
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let log = create_test_log().await;
        log.record("alice", Some("m1"), &uploaded("a.png")).await.unwrap();

        let page = log.list(&ActivityQuery::default()).await.unwrap();
        assert_eq!(page.activities.len(), 1);

        let entry = &page.activities[0];
        assert_eq!(entry.activity_code, "media_uploaded");
        assert_eq!(entry.entity_type, "media");
        assert_eq!(entry.entity_id.as_deref(), Some("m1"));
        assert_eq!(entry.description.as_deref(), Some("File: 'a.png'"));
        assert_eq!(entry.metadata, uploaded("a.png"));
        assert_eq!(page.pagination.total, 1);
        assert!(!page.pagination.has_more);
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let log = create_test_log().await;
        for i in 0..3 {
            log.record("alice", Some(format!("m{}", i).as_str()), &uploaded("a.png"))
                .await
                .unwrap();
        }
        log.record(SYSTEM_ACTOR, None, &ActivityEvent::OrphanBlobsSwept { removed: 2 })
            .await
            .unwrap();

        let alice = log
            .list(&ActivityQuery {
                actor_id: Some("alice".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alice.activities.len(), 2);
        assert_eq!(alice.pagination.total, 3);
        assert!(alice.pagination.has_more);

        let system = log
            .list(&ActivityQuery {
                entity_type: Some("system".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(system.activities.len(), 1);
        assert_eq!(system.activities[0].activity_code, "orphan_blobs_swept");
    }

    struct FailingLogger;

    #[async_trait]
    impl ActivityLogger for FailingLogger {
        async fn record(&self, _: &str, _: Option<&str>, _: &ActivityEvent) -> CmsResult<()> {
            Err(CmsError::Internal("log sink down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        // Must return normally rather than propagate
        record_best_effort(&FailingLogger, "alice", None, uploaded("x")).await;
    }
}
