/// Move submission
use crate::db::models::{GameStatus, Move};
use crate::db::{now_rfc3339, queries};
use crate::error::{AppViewError, AppViewResult, SubmitError};
use crate::ingest::{ApplyOutcome, RepoEvent, StateApplier};
use crate::lexicon::{
    self, tid::next_tid, ChessRecord, MoveRecord, StrongRef, MOVE_COLLECTION,
};
use crate::metrics;
use crate::repo::RepoWriter;
use serde_json::Map;
use sqlx::SqlitePool;
use tracing::info;

/// Parameters for one submitted ply
#[derive(Debug, Clone)]
pub struct MakeMoveParams {
    pub game: String,
    pub previous_move: Option<String>,
    pub r#move: String,
    pub fen: Option<String>,
    pub time_remaining: Option<i64>,
    pub draw_offer: Option<bool>,
    pub resignation: Option<bool>,
}

/// Submit a move on behalf of `player_did`.
///
/// Preconditions run in a fixed order against the current cache row:
/// game exists, game is pending or active, submitter is a party, it is
/// the submitter's derived turn, and after the first move a matching
/// previousMove reference is supplied. Only then is the record published
/// to the mover's repo and applied locally.
pub async fn make_move(
    db: &SqlitePool,
    applier: &StateApplier,
    writer: &dyn RepoWriter,
    player_did: &str,
    params: MakeMoveParams,
) -> AppViewResult<Move> {
    let result = make_move_inner(db, applier, writer, player_did, params).await;
    match &result {
        Ok(_) => metrics::record_submission(MOVE_COLLECTION, "accepted"),
        Err(AppViewError::Submit(_)) => metrics::record_submission(MOVE_COLLECTION, "rejected"),
        Err(_) => metrics::record_submission(MOVE_COLLECTION, "failed"),
    }
    result
}

async fn make_move_inner(
    db: &SqlitePool,
    applier: &StateApplier,
    writer: &dyn RepoWriter,
    player_did: &str,
    params: MakeMoveParams,
) -> AppViewResult<Move> {
    let game = queries::get_game(db, &params.game)
        .await?
        .ok_or_else(|| SubmitError::GameNotFound(params.game.clone()))?;

    match game.status() {
        Some(GameStatus::Pending) | Some(GameStatus::Active) => {}
        _ => return Err(SubmitError::GameNotActive(game.status.clone()).into()),
    }

    if !game.is_player(player_did) {
        return Err(SubmitError::NotYourTurn.into());
    }

    // startsFirst plays white; white moves on even move counts
    let white_turn = game.move_count % 2 == 0;
    if white_turn != game.plays_white(player_did) {
        return Err(SubmitError::NotYourTurn.into());
    }

    if game.move_count > 0 && params.previous_move.is_none() {
        return Err(SubmitError::PreviousMoveRequired.into());
    }

    if let Some(previous_uri) = &params.previous_move {
        if let Some(latest) = queries::get_latest_move(db, &game.uri).await? {
            if latest.uri != *previous_uri {
                return Err(SubmitError::InvalidPreviousMove.into());
            }
        }
    }

    let record = MoveRecord {
        record_type: MOVE_COLLECTION.to_string(),
        // The cache stores no cids; the reference carries the rkey segment
        game: StrongRef {
            uri: game.uri.clone(),
            cid: uri_rkey(&game.uri).to_string(),
        },
        previous_move: params.previous_move.as_ref().map(|uri| StrongRef {
            uri: uri.clone(),
            cid: uri_rkey(uri).to_string(),
        }),
        r#move: params.r#move,
        fen: params.fen,
        time_remaining: params.time_remaining,
        draw_offer: Some(params.draw_offer.unwrap_or(false)),
        resignation: Some(params.resignation.unwrap_or(false)),
        created_at: now_rfc3339(),
        extra: Map::new(),
    };

    let record_value = serde_json::to_value(&record)
        .map_err(|e| AppViewError::Internal(format!("Failed to serialize move record: {}", e)))?;
    let validated = match lexicon::validate_record(MOVE_COLLECTION, &record_value) {
        Ok(ChessRecord::Move(mv)) => mv,
        Ok(ChessRecord::Game(_)) => {
            return Err(AppViewError::Internal(
                "Move record validated as a game".to_string(),
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
        .put_record(player_did, MOVE_COLLECTION, &rkey, &record_value)
        .await?;

    let outcome = applier
        .apply(&RepoEvent::MoveWritten {
            uri: record_ref.uri.clone(),
            did: player_did.to_string(),
            record: validated,
        })
        .await?;
    if matches!(outcome, ApplyOutcome::MissingGame) {
        // Game row vanished between precondition check and apply
        return Err(SubmitError::GameNotFound(game.uri).into());
    }

    info!(
        uri = %record_ref.uri,
        game = %game.uri,
        player = %player_did,
        "move submitted"
    );

    queries::get_move(db, &record_ref.uri)
        .await?
        .ok_or_else(|| AppViewError::Internal("Move row missing after apply".to_string()))
}

/// Last path segment of an AT-URI (the record key)
fn uri_rkey(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}
