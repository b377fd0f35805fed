/// Synchronous Submission Path
///
/// Game challenges and moves originate here: preconditions are checked
/// against the current cache row, the record is published to the acting
/// player's own repo, and the same apply step the feeds use runs
/// immediately so the submitter's next read is consistent without
/// waiting for the firehose to echo the write back.
pub mod create_game;
pub mod make_move;

pub use create_game::{create_game, CreateGameParams};
pub use make_move::{make_move, MakeMoveParams};
