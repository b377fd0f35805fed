/// Aurora Gambit - ATProto AppView for correspondence chess
///
/// Ingests `com.atpchess.game` and `com.atpchess.move` records from the
/// relay firehose and jetstream into a local SQLite cache, assigns
/// per-game move numbers, derives game state (turn, completion,
/// resignation), and offers the synchronous submission path that writes
/// records back to players' own repos.
pub mod actions;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod lexicon;
pub mod metrics;
pub mod repo;
pub mod views;
