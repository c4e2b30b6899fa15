/// Application context and dependency injection
use crate::{
    activity::SqliteActivityLog,
    blob_store::DiskBlobBackend,
    config::ServerConfig,
    db,
    error::{CmsError, CmsResult},
    media::{DedupEngine, MediaLimits, SqliteMetadataStore},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub blob_backend: Arc<DiskBlobBackend>,
    pub metadata: Arc<SqliteMetadataStore>,
    pub activity_log: Arc<SqliteActivityLog>,
    pub engine: DedupEngine,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> CmsResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        Self::from_parts(config, db).await
    }

    /// Wire services over an already migrated pool
    pub async fn from_parts(config: ServerConfig, db: SqlitePool) -> CmsResult<Self> {
        config.validate()?;
        Self::ensure_directories(&config).await?;

        let blob_backend = Arc::new(DiskBlobBackend::new(config.storage.media.location.clone()));
        let metadata = Arc::new(SqliteMetadataStore::new(db.clone()));
        let activity_log = Arc::new(SqliteActivityLog::new(db.clone()));

        let engine = DedupEngine::new(
            blob_backend.clone(),
            metadata.clone(),
            activity_log.clone(),
            MediaLimits {
                max_upload_size: config.storage.media.max_upload_size,
                url_prefix: config.storage.media.url_prefix.clone(),
            },
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            blob_backend,
            metadata,
            activity_log,
            engine,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> CmsResult<()> {
        let dirs = vec![&config.storage.data_directory, &config.storage.media.location];

        for dir in dirs {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    CmsError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
