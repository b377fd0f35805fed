/// Durable feed cursors with time-debounced writes
///
/// Each feed source owns one row in the cursor table. Positions advance in
/// memory on every event; durable writes happen at most once per configured
/// interval, so a crash replays no more than one interval's worth of events.
/// The applier tolerates that redelivery.
use crate::error::AppViewResult;
use crate::ingest::FeedSource;
use crate::metrics;
use sqlx::sqlite::SqlitePool;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct CursorStore {
    db: SqlitePool,
    source: FeedSource,
    min_interval: Duration,
    last_write: Mutex<Option<Instant>>,
}

impl CursorStore {
    pub fn new(db: SqlitePool, source: FeedSource, min_interval: Duration) -> Self {
        Self {
            db,
            source,
            min_interval,
            last_write: Mutex::new(None),
        }
    }

    pub fn source(&self) -> FeedSource {
        self.source
    }

    /// Last durable position. Zero is the unset sentinel and reads as None.
    pub async fn load(&self) -> AppViewResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT seq FROM cursor WHERE id = ?")
            .bind(self.source.cursor_id())
            .fetch_optional(&self.db)
            .await?;

        Ok(match row {
            Some((seq,)) if seq > 0 => Some(seq),
            _ => None,
        })
    }

    /// Record a new position, persisting it only when the write interval
    /// has elapsed. Returns whether a durable write happened.
    pub async fn advance(&self, seq: i64) -> AppViewResult<bool> {
        let due = {
            let last = self.last_write.lock().unwrap_or_else(|e| e.into_inner());
            match *last {
                None => true,
                Some(at) => at.elapsed() >= self.min_interval,
            }
        };

        if !due {
            return Ok(false);
        }

        self.write(seq).await?;
        Ok(true)
    }

    /// Persist a position unconditionally. Used on clean shutdown.
    pub async fn flush(&self, seq: i64) -> AppViewResult<()> {
        self.write(seq).await
    }

    async fn write(&self, seq: i64) -> AppViewResult<()> {
        sqlx::query(
            "INSERT INTO cursor (id, seq) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET seq = excluded.seq",
        )
        .bind(self.source.cursor_id())
        .bind(seq)
        .execute(&self.db)
        .await?;

        *self.last_write.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        metrics::record_cursor_write(self.source.as_str(), seq);
        debug!(source = self.source.as_str(), seq, "cursor checkpoint");
        Ok(())
    }
}
