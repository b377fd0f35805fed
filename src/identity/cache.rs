/// Handle Cache - Database layer for caching DID-to-handle mappings
use crate::error::{AppViewError, AppViewResult};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

/// Handle cache manager
///
/// Entries older than the TTL are treated as misses and deleted lazily
/// on read, so a renamed account picks up its new handle within one TTL.
#[derive(Clone)]
pub struct HandleCache {
    db: SqlitePool,
    ttl: Duration,
}

impl HandleCache {
    pub fn new(db: SqlitePool, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Get the cached handle for a DID, if present and fresh
    pub async fn get(&self, did: &str) -> AppViewResult<Option<String>> {
        let result = sqlx::query(
            r#"
            SELECT handle, updated_at
            FROM did_handle
            WHERE did = ?1
            "#,
        )
        .bind(did)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = result {
            let handle: String = row.try_get("handle")?;
            let updated_at = parse_timestamp(&row.try_get::<String, _>("updated_at")?)?;

            if Utc::now() - updated_at < self.ttl {
                return Ok(Some(handle));
            }

            // Cache expired, delete it
            self.delete(did).await?;
        }

        Ok(None)
    }

    /// Cache a handle for a DID
    pub async fn put(&self, did: &str, handle: &str) -> AppViewResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO did_handle (did, handle, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(did) DO UPDATE SET
                handle = excluded.handle,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(did)
        .bind(handle)
        .bind(&now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Drop a cached mapping (force re-resolution)
    pub async fn delete(&self, did: &str) -> AppViewResult<()> {
        sqlx::query("DELETE FROM did_handle WHERE did = ?1")
            .bind(did)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Clean up expired cache entries
    pub async fn cleanup_expired(&self) -> AppViewResult<u64> {
        let cutoff = (Utc::now() - self.ttl).to_rfc3339();

        let result = sqlx::query("DELETE FROM did_handle WHERE updated_at < ?1")
            .bind(&cutoff)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Parse RFC3339 timestamp
fn parse_timestamp(s: &str) -> AppViewResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppViewError::Internal(format!("Invalid timestamp: {}", e)))
}
