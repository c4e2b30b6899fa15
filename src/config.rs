/// Configuration management for the media service
use crate::error::{CmsError, CmsResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default upload ceiling (10MB)
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound on the orphan grace period (one year)
pub const MAX_ORPHAN_GRACE_HOURS: i64 = 24 * 365;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    pub media: MediaStorageConfig,
}

/// Media blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaStorageConfig {
    /// Root directory for stored blobs
    pub location: PathBuf,
    /// URL prefix that storage paths are served under
    pub url_prefix: String,
    /// Maximum accepted upload size in bytes (inclusive)
    pub max_upload_size: usize,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider
    pub jwt_secret: String,
}

/// Background job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub orphan_sweep_interval_secs: u64,
    pub orphan_grace_hours: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> CmsResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CMS_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("CMS_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| CmsError::Validation("Invalid port number".to_string()))?;
        let version = env::var("CMS_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let data_directory: PathBuf = env::var("CMS_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("CMS_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("cms.sqlite"));

        let media = MediaStorageConfig {
            location: env::var("CMS_MEDIA_LOCATION")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_directory.join("storage")),
            url_prefix: env::var("CMS_MEDIA_URL_PREFIX").unwrap_or_else(|_| "/storage".to_string()),
            max_upload_size: env::var("CMS_MAX_UPLOAD_SIZE")
                .unwrap_or_else(|_| DEFAULT_MAX_UPLOAD_SIZE.to_string())
                .parse()
                .unwrap_or(DEFAULT_MAX_UPLOAD_SIZE),
        };

        let jwt_secret = env::var("CMS_JWT_SECRET")
            .map_err(|_| CmsError::Validation("JWT secret required".to_string()))?;

        let orphan_sweep_interval_secs = env::var("CMS_ORPHAN_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "21600".to_string())
            .parse()
            .unwrap_or(21600);
        let orphan_grace_hours = env::var("CMS_ORPHAN_GRACE_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
                media,
            },
            authentication: AuthConfig { jwt_secret },
            jobs: JobsConfig {
                orphan_sweep_interval_secs,
                orphan_grace_hours,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> CmsResult<()> {
        if self.service.hostname.is_empty() {
            return Err(CmsError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(CmsError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.storage.media.max_upload_size == 0 {
            return Err(CmsError::Validation(
                "Upload size limit must be greater than zero".to_string(),
            ));
        }

        if !self.storage.media.url_prefix.starts_with('/') {
            return Err(CmsError::Validation(
                "Media URL prefix must start with '/'".to_string(),
            ));
        }

        // Bytes of an in-flight ingest must stay out of the sweep's reach
        if !(1..=MAX_ORPHAN_GRACE_HOURS).contains(&self.jobs.orphan_grace_hours) {
            return Err(CmsError::Validation(format!(
                "Orphan grace period must be between 1 and {} hours, got {}",
                MAX_ORPHAN_GRACE_HOURS, self.jobs.orphan_grace_hours
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(data_directory: &std::path::Path) -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "127.0.0.1".to_string(),
            port: 0,
            version: "test".to_string(),
        },
        storage: StorageConfig {
            data_directory: data_directory.to_path_buf(),
            database: data_directory.join("cms.sqlite"),
            media: MediaStorageConfig {
                location: data_directory.join("storage"),
                url_prefix: "/storage".to_string(),
                max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            },
        },
        authentication: AuthConfig {
            jwt_secret: "test-secret-that-is-at-least-32-characters".to_string(),
        },
        jobs: JobsConfig {
            orphan_sweep_interval_secs: 3600,
            orphan_grace_hours: 24,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(test_config(dir.path()).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.authentication.jwt_secret = "short".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least 32 characters"));
    }

    #[test]
    fn test_validate_rejects_relative_url_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.storage.media.url_prefix = "storage".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_upload_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.storage.media.max_upload_size = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_orphan_grace() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());

        for hours in [-5, 0, MAX_ORPHAN_GRACE_HOURS + 1, i64::MAX] {
            config.jobs.orphan_grace_hours = hours;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("Orphan grace period"), "{} accepted", hours);
        }

        for hours in [1, 24, MAX_ORPHAN_GRACE_HOURS] {
            config.jobs.orphan_grace_hours = hours;
            assert!(config.validate().is_ok(), "{} rejected", hours);
        }
    }
}
