/// Event ingestion engine
///
/// Three write paths race to keep the materialized caches current: the
/// relay firehose (full replay), jetstream (filtered push feed), and the
/// synchronous submission path. All three normalize into [`RepoEvent`] and
/// flow through the one [`StateApplier`].

pub mod applier;
pub mod cursor;
pub mod firehose;
pub mod jetstream;

pub use applier::StateApplier;
pub use cursor::CursorStore;

use crate::lexicon::{GameRecord, MoveRecord};

/// Which feed produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    Firehose,
    Jetstream,
}

impl FeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::Firehose => "firehose",
            FeedSource::Jetstream => "jetstream",
        }
    }

    /// Row id in the cursor table
    pub fn cursor_id(&self) -> i64 {
        match self {
            FeedSource::Firehose => 1,
            FeedSource::Jetstream => 2,
        }
    }
}

/// A normalized repository event, independent of which source observed it
#[derive(Debug, Clone, PartialEq)]
pub enum RepoEvent {
    GameWritten {
        uri: String,
        did: String,
        record: GameRecord,
    },
    MoveWritten {
        uri: String,
        did: String,
        record: MoveRecord,
    },
    GameDeleted {
        uri: String,
    },
    MoveDeleted {
        uri: String,
    },
}

impl RepoEvent {
    /// AT-URI of the record this event concerns
    pub fn uri(&self) -> &str {
        match self {
            RepoEvent::GameWritten { uri, .. } => uri,
            RepoEvent::MoveWritten { uri, .. } => uri,
            RepoEvent::GameDeleted { uri } => uri,
            RepoEvent::MoveDeleted { uri } => uri,
        }
    }
}

/// What applying an event did to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New game row created
    GameInserted,
    /// Known game redelivered; indexedAt refreshed
    GameRefreshed,
    /// New move row created with a locally assigned number
    MoveIndexed { move_number: i64 },
    /// Known move redelivered; mutable fields refreshed
    MoveRefreshed,
    /// Move references a game the cache has never seen; dropped
    MissingGame,
    /// Game soft-deleted
    GameAbandoned,
    /// Move row hard-deleted
    MoveDeleted,
    /// Delete for a row the cache never held
    Ignored,
}
