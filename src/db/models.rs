/// Row models for the materialized chess caches
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a cached game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Pending,
    Active,
    Completed,
    Abandoned,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Pending => "pending",
            GameStatus::Active => "active",
            GameStatus::Completed => "completed",
            GameStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<GameStatus> {
        match s {
            "pending" => Some(GameStatus::Pending),
            "active" => Some(GameStatus::Active),
            "completed" => Some(GameStatus::Completed),
            "abandoned" => Some(GameStatus::Abandoned),
            _ => None,
        }
    }
}

/// Terminal result of a completed game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
    Stalemate,
}

impl GameResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameResult::WhiteWins => "white-wins",
            GameResult::BlackWins => "black-wins",
            GameResult::Draw => "draw",
            GameResult::Stalemate => "stalemate",
        }
    }
}

/// Cached game row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[sqlx(rename_all = "camelCase")]
pub struct Game {
    pub uri: String,
    pub challenger: String,
    pub challenged: String,
    pub starts_first: String,
    pub status: String,
    pub winner: Option<String>,
    pub result: Option<String>,
    pub time_control: Option<String>,
    pub rated: bool,
    pub created_at: String,
    pub indexed_at: String,
    pub last_move_at: Option<String>,
    pub move_count: i64,
}

impl Game {
    pub fn status(&self) -> Option<GameStatus> {
        GameStatus::parse(&self.status)
    }

    /// Whether `did` is one of the two parties
    pub fn is_player(&self, did: &str) -> bool {
        self.challenger == did || self.challenged == did
    }

    /// The opposing party's DID. `did` must be a player.
    pub fn opponent_of(&self, did: &str) -> &str {
        if self.challenger == did {
            &self.challenged
        } else {
            &self.challenger
        }
    }

    /// startsFirst plays white
    pub fn plays_white(&self, did: &str) -> bool {
        self.starts_first == did
    }
}

/// Cached move row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[sqlx(rename_all = "camelCase")]
pub struct Move {
    pub uri: String,
    pub game_uri: String,
    pub player_did: String,
    pub r#move: String,
    pub fen: Option<String>,
    pub move_number: i64,
    pub previous_move_uri: Option<String>,
    pub time_remaining: Option<i64>,
    pub draw_offer: bool,
    pub resignation: bool,
    pub created_at: String,
    pub indexed_at: String,
}

/// Feed cursor row
#[derive(Debug, Clone, FromRow)]
pub struct CursorRow {
    pub id: i64,
    pub seq: i64,
}
