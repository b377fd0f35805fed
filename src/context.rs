/// Application context and dependency injection
use crate::{
    config::AppConfig,
    db,
    error::{AppViewError, AppViewResult},
    identity::{CachingResolver, DirectoryResolver, HandleCache, HandleResolver},
    ingest::{CursorStore, FeedSource, StateApplier},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: SqlitePool,
    /// The one apply path shared by both feeds and the submission path
    pub applier: Arc<StateApplier>,
    pub firehose_cursor: Arc<CursorStore>,
    pub jetstream_cursor: Arc<CursorStore>,
    pub resolver: Arc<dyn HandleResolver>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: AppConfig) -> AppViewResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        // Initialize the AppView database
        let db =
            db::create_pool(&config.storage.appview_db, db::DatabaseOptions::default()).await?;

        // Run migrations
        db::run_migrations(&db).await?;

        // Test connection
        db::test_connection(&db).await?;

        let applier = Arc::new(StateApplier::new(db.clone()));

        let firehose_cursor = Arc::new(CursorStore::new(
            db.clone(),
            FeedSource::Firehose,
            Duration::from_secs(config.feeds.firehose_cursor_interval_secs),
        ));
        let jetstream_cursor = Arc::new(CursorStore::new(
            db.clone(),
            FeedSource::Jetstream,
            Duration::from_secs(config.feeds.jetstream_cursor_interval_secs),
        ));

        // Initialize identity resolution
        let handle_cache = HandleCache::new(
            db.clone(),
            chrono::Duration::seconds(config.identity.handle_cache_ttl_secs as i64),
        );
        let directory = Arc::new(DirectoryResolver::new(&config.identity)?);
        let resolver: Arc<dyn HandleResolver> =
            Arc::new(CachingResolver::new(handle_cache, directory));

        Ok(Self {
            config: Arc::new(config),
            db,
            applier,
            firehose_cursor,
            jetstream_cursor,
            resolver,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &AppConfig) -> AppViewResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                AppViewError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeedConfig, IdentityConfig, LoggingConfig, StorageConfig};

    fn test_config(root: &std::path::Path) -> AppConfig {
        AppConfig {
            storage: StorageConfig {
                data_directory: root.to_path_buf(),
                appview_db: root.join("appview.sqlite"),
            },
            feeds: FeedConfig {
                relay_url: "wss://relay.test".to_string(),
                jetstream_url: "wss://jetstream.test".to_string(),
                firehose_enabled: true,
                jetstream_enabled: false,
                reconnect_delay_secs: 5,
                read_timeout_secs: 60,
                firehose_cursor_interval_secs: 10,
                jetstream_cursor_interval_secs: 30,
            },
            identity: IdentityConfig {
                did_plc_url: "https://plc.directory".to_string(),
                handle_cache_ttl_secs: 86400,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_context_initializes_database() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path())).await.unwrap();

        assert!(dir.path().join("appview.sqlite").exists());
        // Fresh database: no cursors recorded yet
        assert_eq!(ctx.firehose_cursor.load().await.unwrap(), None);
        assert_eq!(ctx.jetstream_cursor.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_context_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.feeds.firehose_enabled = false;
        config.feeds.jetstream_enabled = false;

        assert!(AppContext::new(config).await.is_err());
    }
}
