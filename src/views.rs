/// View hydration for game and move rows
///
/// Views are the read-side shapes handed to API consumers: row fields
/// plus player DIDs resolved to handles. Resolution failures degrade to
/// the `handle.invalid` placeholder instead of failing the read.
use crate::db::models::{Game, Move};
use crate::identity::{HandleResolver, INVALID_HANDLE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub did: String,
    pub handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub uri: String,
    pub challenger: PlayerView,
    pub challenged: PlayerView,
    pub starts_first: String,
    pub created_at: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_control: Option<String>,
    pub rated: bool,
    pub move_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_move_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveView {
    pub uri: String,
    pub game: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_move: Option<String>,
    pub r#move: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
    pub player: PlayerView,
    pub created_at: String,
    pub move_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<i64>,
    pub draw_offer: bool,
    pub resignation: bool,
}

/// Resolve a DID into a player view, never failing
pub async fn player_view(resolver: &dyn HandleResolver, did: &str) -> PlayerView {
    let handle = match resolver.resolve_did_to_handle(did).await {
        // A DID coming back where a handle belongs is unusable
        Ok(handle) if !handle.starts_with("did:") => handle,
        _ => INVALID_HANDLE.to_string(),
    };

    PlayerView {
        did: did.to_string(),
        handle,
        display_name: None,
        avatar: None,
    }
}

pub async fn game_to_view(resolver: &dyn HandleResolver, game: &Game) -> GameView {
    let (challenger, challenged) = tokio::join!(
        player_view(resolver, &game.challenger),
        player_view(resolver, &game.challenged)
    );

    GameView {
        uri: game.uri.clone(),
        challenger,
        challenged,
        starts_first: game.starts_first.clone(),
        created_at: game.created_at.clone(),
        status: game.status.clone(),
        winner: game.winner.clone(),
        result: game.result.clone(),
        time_control: game.time_control.clone(),
        rated: game.rated,
        move_count: game.move_count,
        last_move_at: game.last_move_at.clone(),
    }
}

pub async fn move_to_view(resolver: &dyn HandleResolver, mv: &Move) -> MoveView {
    let player = player_view(resolver, &mv.player_did).await;

    MoveView {
        uri: mv.uri.clone(),
        game: mv.game_uri.clone(),
        previous_move: mv.previous_move_uri.clone(),
        r#move: mv.r#move.clone(),
        fen: mv.fen.clone(),
        player,
        created_at: mv.created_at.clone(),
        move_number: mv.move_number,
        time_remaining: mv.time_remaining,
        draw_offer: mv.draw_offer,
        resignation: mv.resignation,
    }
}
