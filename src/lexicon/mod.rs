/// Lexicon layer for the com.atpchess record types
///
/// Typed record structs, field validation against the lexicon constraints,
/// and TID record-key generation.

pub mod records;
pub mod tid;

pub use records::{
    validate_game_record, validate_move_record, GameRecord, MoveRecord, StrongRef,
    ValidationError,
};

use serde_json::Value;

/// Game challenge records
pub const GAME_COLLECTION: &str = "com.atpchess.game";
/// Move records
pub const MOVE_COLLECTION: &str = "com.atpchess.move";

/// The collections this AppView indexes
pub const CHESS_COLLECTIONS: [&str; 2] = [GAME_COLLECTION, MOVE_COLLECTION];

pub fn is_chess_collection(collection: &str) -> bool {
    CHESS_COLLECTIONS.contains(&collection)
}

/// Build an AT-URI from its parts
pub fn at_uri(did: &str, collection: &str, rkey: &str) -> String {
    format!("at://{}/{}/{}", did, collection, rkey)
}

/// A validated record from one of the chess collections
#[derive(Debug, Clone)]
pub enum ChessRecord {
    Game(GameRecord),
    Move(MoveRecord),
}

/// Validate a record against its collection's lexicon
pub fn validate_record(
    collection: &str,
    record: &Value,
) -> Result<ChessRecord, Vec<ValidationError>> {
    match collection {
        GAME_COLLECTION => validate_game_record(record).map(ChessRecord::Game),
        MOVE_COLLECTION => validate_move_record(record).map(ChessRecord::Move),
        _ => Err(vec![ValidationError {
            path: "$".to_string(),
            message: format!("Unknown collection: {}", collection),
        }]),
    }
}
