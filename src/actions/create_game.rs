/// Game challenge submission
use crate::db::models::Game;
use crate::db::{now_rfc3339, queries};
use crate::error::{AppViewError, AppViewResult, SubmitError};
use crate::ingest::{RepoEvent, StateApplier};
use crate::lexicon::{self, tid::next_tid, ChessRecord, GameRecord, GAME_COLLECTION};
use crate::metrics;
use crate::repo::RepoWriter;
use serde_json::Map;
use sqlx::SqlitePool;
use tracing::info;

/// Parameters for a new game challenge
#[derive(Debug, Clone)]
pub struct CreateGameParams {
    pub challenged: String,
    pub starts_first: String,
    pub time_control: Option<String>,
    pub rated: Option<bool>,
}

/// Create a game challenge on behalf of `challenger_did`.
///
/// Publishes a `com.atpchess.game` record to the challenger's repo and
/// indexes it immediately; the feeds will later observe the same record
/// and no-op on it.
pub async fn create_game(
    db: &SqlitePool,
    applier: &StateApplier,
    writer: &dyn RepoWriter,
    challenger_did: &str,
    params: CreateGameParams,
) -> AppViewResult<Game> {
    let result = create_game_inner(db, applier, writer, challenger_did, params).await;
    match &result {
        Ok(_) => metrics::record_submission(GAME_COLLECTION, "accepted"),
        Err(AppViewError::Submit(_)) => metrics::record_submission(GAME_COLLECTION, "rejected"),
        Err(_) => metrics::record_submission(GAME_COLLECTION, "failed"),
    }
    result
}

async fn create_game_inner(
    db: &SqlitePool,
    applier: &StateApplier,
    writer: &dyn RepoWriter,
    challenger_did: &str,
    params: CreateGameParams,
) -> AppViewResult<Game> {
    if challenger_did == params.challenged {
        return Err(SubmitError::ChallengeSelf.into());
    }

    if params.starts_first != challenger_did && params.starts_first != params.challenged {
        return Err(SubmitError::InvalidPlayer.into());
    }

    let record = GameRecord {
        record_type: GAME_COLLECTION.to_string(),
        challenger: challenger_did.to_string(),
        challenged: params.challenged,
        starts_first: params.starts_first,
        time_control: params.time_control,
        rated: Some(params.rated.unwrap_or(false)),
        created_at: now_rfc3339(),
        extra: Map::new(),
    };

    let record_value = serde_json::to_value(&record)
        .map_err(|e| AppViewError::Internal(format!("Failed to serialize game record: {}", e)))?;
    let validated = match lexicon::validate_record(GAME_COLLECTION, &record_value) {
        Ok(ChessRecord::Game(game)) => game,
        Ok(ChessRecord::Move(_)) => {
            return Err(AppViewError::Internal(
                "Game record validated as a move".to_string(),
            ))
        }
        Err(errors) => {
            let detail = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SubmitError::InvalidRequest(detail).into());
        }
    };

    let rkey = next_tid();
    let record_ref = writer
        .put_record(challenger_did, GAME_COLLECTION, &rkey, &record_value)
        .await?;

    applier
        .apply(&RepoEvent::GameWritten {
            uri: record_ref.uri.clone(),
            did: challenger_did.to_string(),
            record: validated,
        })
        .await?;

    info!(
        uri = %record_ref.uri,
        challenger = %challenger_did,
        "game challenge created"
    );

    queries::get_game(db, &record_ref.uri)
        .await?
        .ok_or_else(|| AppViewError::Internal("Game row missing after apply".to_string()))
}
