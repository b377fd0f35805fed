/// Configuration management for the Aurora Gambit AppView
use crate::error::{AppViewError, AppViewResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main AppView configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub feeds: FeedConfig,
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub appview_db: PathBuf,
}

/// Feed subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Relay firehose endpoint (full replay, system of record)
    pub relay_url: String,
    /// Jetstream endpoint (filtered low-latency feed)
    pub jetstream_url: String,
    /// Subscribe to the relay firehose
    pub firehose_enabled: bool,
    /// Subscribe to jetstream
    pub jetstream_enabled: bool,
    /// Delay between firehose reconnect attempts, in seconds
    pub reconnect_delay_secs: u64,
    /// Liveness timeout on socket reads, in seconds
    pub read_timeout_secs: u64,
    /// Minimum interval between durable firehose cursor writes, in seconds
    pub firehose_cursor_interval_secs: u64,
    /// Minimum interval between durable jetstream cursor writes, in seconds
    pub jetstream_cursor_interval_secs: u64,
}

/// Identity resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub did_plc_url: String,
    pub handle_cache_ttl_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppViewResult<Self> {
        dotenv::dotenv().ok();

        let data_directory: PathBuf = env::var("APPVIEW_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let appview_db = env::var("APPVIEW_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("appview.sqlite"));

        let relay_url = env::var("APPVIEW_RELAY_URL")
            .unwrap_or_else(|_| "wss://bsky.network".to_string());
        let jetstream_url = env::var("APPVIEW_JETSTREAM_URL")
            .unwrap_or_else(|_| "wss://jetstream1.us-east.bsky.network".to_string());
        let firehose_enabled = env::var("APPVIEW_FIREHOSE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let jetstream_enabled = env::var("APPVIEW_JETSTREAM_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let reconnect_delay_secs = env::var("APPVIEW_RECONNECT_DELAY_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let read_timeout_secs = env::var("APPVIEW_READ_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);
        let firehose_cursor_interval_secs = env::var("APPVIEW_FIREHOSE_CURSOR_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let jetstream_cursor_interval_secs = env::var("APPVIEW_JETSTREAM_CURSOR_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let did_plc_url = env::var("APPVIEW_DID_PLC_URL")
            .unwrap_or_else(|_| "https://plc.directory".to_string());
        let handle_cache_ttl_secs = env::var("APPVIEW_HANDLE_CACHE_TTL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86400);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(AppConfig {
            storage: StorageConfig {
                data_directory,
                appview_db,
            },
            feeds: FeedConfig {
                relay_url,
                jetstream_url,
                firehose_enabled,
                jetstream_enabled,
                reconnect_delay_secs,
                read_timeout_secs,
                firehose_cursor_interval_secs,
                jetstream_cursor_interval_secs,
            },
            identity: IdentityConfig {
                did_plc_url,
                handle_cache_ttl_secs,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AppViewResult<()> {
        if !self.feeds.relay_url.starts_with("ws") {
            return Err(AppViewError::Config(
                "Relay URL must be a ws:// or wss:// endpoint".to_string(),
            ));
        }

        if !self.feeds.jetstream_url.starts_with("ws") {
            return Err(AppViewError::Config(
                "Jetstream URL must be a ws:// or wss:// endpoint".to_string(),
            ));
        }

        if !self.feeds.firehose_enabled && !self.feeds.jetstream_enabled {
            return Err(AppViewError::Config(
                "At least one feed source must be enabled".to_string(),
            ));
        }

        Ok(())
    }
}
