/// Idempotent application of repository events to the materialized caches
///
/// Every source delivers at-least-once and out-of-order relative to the
/// others, so each apply must be safe to repeat. Creation fields are
/// first-seen-wins; redeliveries only refresh what an origin update may
/// legitimately change. Move numbers are assigned locally from the parent
/// game's moveCount inside a per-game critical section.
use crate::db::models::{Game, GameResult, GameStatus};
use crate::db::now_rfc3339;
use crate::error::AppViewResult;
use crate::ingest::{ApplyOutcome, RepoEvent};
use crate::lexicon::{GameRecord, MoveRecord, GAME_COLLECTION, MOVE_COLLECTION};
use crate::metrics;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub struct StateApplier {
    db: SqlitePool,
    game_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StateApplier {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            game_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one event. Safe to call again with the same event.
    pub async fn apply(&self, event: &RepoEvent) -> AppViewResult<ApplyOutcome> {
        match event {
            RepoEvent::GameWritten { uri, record, .. } => self.apply_game_write(uri, record).await,
            RepoEvent::MoveWritten { uri, did, record } => {
                self.apply_move_write(uri, did, record).await
            }
            RepoEvent::GameDeleted { uri } => self.apply_game_delete(uri).await,
            RepoEvent::MoveDeleted { uri } => self.apply_move_delete(uri).await,
        }
    }

    async fn apply_game_write(
        &self,
        uri: &str,
        record: &GameRecord,
    ) -> AppViewResult<ApplyOutcome> {
        // The lock serializes every write touching this game, so reads
        // against the pool see settled state
        let _guard = self.lock_game(uri).await;
        let now = now_rfc3339();

        let existing: Option<(String,)> = sqlx::query_as("SELECT uri FROM game WHERE uri = ?")
            .bind(uri)
            .fetch_optional(&self.db)
            .await?;

        if existing.is_some() {
            // Redelivery: creation fields are first-seen-wins
            sqlx::query("UPDATE game SET indexedAt = ? WHERE uri = ?")
                .bind(&now)
                .bind(uri)
                .execute(&self.db)
                .await?;

            debug!(uri, "game redelivered, refreshed indexedAt");
            metrics::record_indexed(GAME_COLLECTION, "refresh");
            return Ok(ApplyOutcome::GameRefreshed);
        }

        let inserted = sqlx::query(
            "INSERT INTO game (uri, challenger, challenged, startsFirst, status, \
             timeControl, rated, createdAt, indexedAt, moveCount) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0) \
             ON CONFLICT(uri) DO UPDATE SET indexedAt = excluded.indexedAt",
        )
        .bind(uri)
        .bind(&record.challenger)
        .bind(&record.challenged)
        .bind(&record.starts_first)
        .bind(GameStatus::Pending.as_str())
        .bind(&record.time_control)
        .bind(record.is_rated())
        .bind(&record.created_at)
        .bind(&now)
        .execute(&self.db)
        .await;

        if let Err(e) = inserted {
            // A fresh rkey carrying the same (challenger, challenged,
            // createdAt) triple trips the duplicate-challenge index. The
            // record will never index, so it is malformed input, not a
            // transient storage error that should stall the feed
            if is_unique_violation(&e) {
                warn!(uri, error = %e, "duplicate game challenge, dropping");
                metrics::record_dropped("applier", "duplicate_challenge");
                return Ok(ApplyOutcome::Ignored);
            }
            return Err(e.into());
        }

        info!(
            uri,
            challenger = %record.challenger,
            challenged = %record.challenged,
            "indexed game"
        );
        metrics::record_indexed(GAME_COLLECTION, "create");
        Ok(ApplyOutcome::GameInserted)
    }

    async fn apply_move_write(
        &self,
        uri: &str,
        did: &str,
        record: &MoveRecord,
    ) -> AppViewResult<ApplyOutcome> {
        let game_uri = record.game.uri.as_str();
        let _guard = self.lock_game(game_uri).await;
        let now = now_rfc3339();

        let game: Option<Game> = sqlx::query_as("SELECT * FROM game WHERE uri = ?")
            .bind(game_uri)
            .fetch_optional(&self.db)
            .await?;

        let game = match game {
            Some(game) => game,
            None => {
                // The full replay will deliver the game eventually and the
                // move again after it
                warn!(uri, game_uri, "move references unknown game, dropping");
                return Ok(ApplyOutcome::MissingGame);
            }
        };

        let existing: Option<(String,)> = sqlx::query_as("SELECT uri FROM move WHERE uri = ?")
            .bind(uri)
            .fetch_optional(&self.db)
            .await?;

        if existing.is_some() {
            // Redelivery: refresh mutable fields, keep the assigned number,
            // leave the game row alone
            sqlx::query(
                "UPDATE move SET move = ?, fen = ?, timeRemaining = ?, drawOffer = ?, \
                 resignation = ?, indexedAt = ? WHERE uri = ?",
            )
            .bind(&record.r#move)
            .bind(&record.fen)
            .bind(record.time_remaining)
            .bind(record.offers_draw())
            .bind(record.is_resignation())
            .bind(&now)
            .bind(uri)
            .execute(&self.db)
            .await?;

            debug!(uri, "move redelivered, refreshed fields");
            metrics::record_indexed(MOVE_COLLECTION, "refresh");
            return Ok(ApplyOutcome::MoveRefreshed);
        }

        let move_number = game.move_count + 1;

        // Write-only transaction: the move row and the game row change as
        // one unit
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO move (uri, gameUri, playerDid, move, fen, moveNumber, \
             previousMoveUri, timeRemaining, drawOffer, resignation, createdAt, indexedAt) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(uri) DO UPDATE SET move = excluded.move, fen = excluded.fen, \
             timeRemaining = excluded.timeRemaining, drawOffer = excluded.drawOffer, \
             resignation = excluded.resignation, indexedAt = excluded.indexedAt",
        )
        .bind(uri)
        .bind(game_uri)
        .bind(did)
        .bind(&record.r#move)
        .bind(&record.fen)
        .bind(move_number)
        .bind(record.previous_move.as_ref().map(|r| r.uri.as_str()))
        .bind(record.time_remaining)
        .bind(record.offers_draw())
        .bind(record.is_resignation())
        .bind(&record.created_at)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if record.is_resignation() {
            let winner = game.opponent_of(did).to_string();
            // startsFirst plays white
            let result = if game.plays_white(did) {
                GameResult::BlackWins
            } else {
                GameResult::WhiteWins
            };

            sqlx::query(
                "UPDATE game SET lastMoveAt = ?, moveCount = ?, status = ?, winner = ?, \
                 result = ?, indexedAt = ? WHERE uri = ?",
            )
            .bind(&record.created_at)
            .bind(move_number)
            .bind(GameStatus::Completed.as_str())
            .bind(&winner)
            .bind(result.as_str())
            .bind(&now)
            .bind(game_uri)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            info!(
                uri,
                game_uri,
                winner = %winner,
                result = result.as_str(),
                "resignation, game completed"
            );
            metrics::record_indexed(MOVE_COLLECTION, "create");
            return Ok(ApplyOutcome::MoveIndexed { move_number });
        }

        // A move on a finished game still indexes, but must not revive it
        let status = match game.status() {
            Some(GameStatus::Completed) | Some(GameStatus::Abandoned) => game.status.as_str(),
            _ => GameStatus::Active.as_str(),
        };

        sqlx::query(
            "UPDATE game SET lastMoveAt = ?, moveCount = ?, status = ?, indexedAt = ? \
             WHERE uri = ?",
        )
        .bind(&record.created_at)
        .bind(move_number)
        .bind(status)
        .bind(&now)
        .bind(game_uri)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(uri, game_uri, move_number, "indexed move");
        metrics::record_indexed(MOVE_COLLECTION, "create");
        Ok(ApplyOutcome::MoveIndexed { move_number })
    }

    async fn apply_game_delete(&self, uri: &str) -> AppViewResult<ApplyOutcome> {
        let _guard = self.lock_game(uri).await;

        let result = sqlx::query("UPDATE game SET status = ?, indexedAt = ? WHERE uri = ?")
            .bind(GameStatus::Abandoned.as_str())
            .bind(now_rfc3339())
            .bind(uri)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            debug!(uri, "delete for unknown game, ignoring");
            return Ok(ApplyOutcome::Ignored);
        }

        info!(uri, "game deleted at origin, marked abandoned");
        metrics::record_indexed(GAME_COLLECTION, "delete");
        Ok(ApplyOutcome::GameAbandoned)
    }

    async fn apply_move_delete(&self, uri: &str) -> AppViewResult<ApplyOutcome> {
        // Moves are append-only in practice; the parent game's moveCount
        // keeps its value when an origin deletes a move record
        let result = sqlx::query("DELETE FROM move WHERE uri = ?")
            .bind(uri)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            debug!(uri, "delete for unknown move, ignoring");
            return Ok(ApplyOutcome::Ignored);
        }

        info!(uri, "move deleted at origin");
        metrics::record_indexed(MOVE_COLLECTION, "delete");
        Ok(ApplyOutcome::MoveDeleted)
    }

    /// Serialize applies that touch one game. Different games proceed in
    /// parallel. Entries nobody holds are swept on each acquisition, so
    /// the registry stays bounded by the number of in-flight applies.
    async fn lock_game(&self, uri: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.game_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(uri.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.game_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
