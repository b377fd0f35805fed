/// End-to-end convergence tests for the ingestion core
///
/// Exercises the guarantees the feeds rely on: at-least-once delivery
/// from racing sources converges to one state, and a crash replayed
/// from the last durable cursor ends up byte-identical to an
/// uninterrupted run.
use aurora_gambit::db::{self, queries, DatabaseOptions};
use aurora_gambit::ingest::{CursorStore, FeedSource, RepoEvent, StateApplier};
use aurora_gambit::lexicon::{GameRecord, MoveRecord, StrongRef};
use serde_json::Map;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;

const ALICE: &str = "did:plc:alice";
const BOB: &str = "did:plc:bob";
const CAROL: &str = "did:plc:carol";
const DAVE: &str = "did:plc:dave";

const G1: &str = "at://did:plc:alice/com.atpchess.game/3g1";
const G2: &str = "at://did:plc:carol/com.atpchess.game/3g2";

fn game_record(challenger: &str, challenged: &str, starts_first: &str) -> GameRecord {
    GameRecord {
        record_type: "com.atpchess.game".to_string(),
        challenger: challenger.to_string(),
        challenged: challenged.to_string(),
        starts_first: starts_first.to_string(),
        time_control: None,
        rated: Some(false),
        created_at: "2024-05-01T10:00:00.000Z".to_string(),
        extra: Map::new(),
    }
}

fn move_record(
    game_uri: &str,
    previous: Option<&str>,
    notation: &str,
    resignation: bool,
    created_at: &str,
) -> MoveRecord {
    MoveRecord {
        record_type: "com.atpchess.move".to_string(),
        game: StrongRef {
            uri: game_uri.to_string(),
            cid: "bafygame".to_string(),
        },
        previous_move: previous.map(|uri| StrongRef {
            uri: uri.to_string(),
            cid: "bafyprev".to_string(),
        }),
        r#move: notation.to_string(),
        fen: None,
        time_remaining: None,
        draw_offer: Some(false),
        resignation: Some(resignation),
        created_at: created_at.to_string(),
        extra: Map::new(),
    }
}

fn move_uri(n: u32) -> String {
    format!("at://did:plc:alice/com.atpchess.move/3m{}", n)
}

/// Two interleaved games; game one ends in a resignation by the party
/// playing black
fn script() -> Vec<RepoEvent> {
    vec![
        RepoEvent::GameWritten {
            uri: G1.to_string(),
            did: ALICE.to_string(),
            record: game_record(ALICE, BOB, ALICE),
        },
        RepoEvent::MoveWritten {
            uri: move_uri(1),
            did: ALICE.to_string(),
            record: move_record(G1, None, "e4", false, "2024-05-01T10:01:00.000Z"),
        },
        RepoEvent::GameWritten {
            uri: G2.to_string(),
            did: CAROL.to_string(),
            record: game_record(CAROL, DAVE, DAVE),
        },
        RepoEvent::MoveWritten {
            uri: move_uri(2),
            did: BOB.to_string(),
            record: move_record(
                G1,
                Some(&move_uri(1)),
                "e5",
                false,
                "2024-05-01T10:02:00.000Z",
            ),
        },
        RepoEvent::MoveWritten {
            uri: move_uri(3),
            did: DAVE.to_string(),
            record: move_record(G2, None, "d4", false, "2024-05-01T10:03:00.000Z"),
        },
        RepoEvent::MoveWritten {
            uri: move_uri(4),
            did: ALICE.to_string(),
            record: move_record(
                G1,
                Some(&move_uri(2)),
                "Nf3",
                false,
                "2024-05-01T10:04:00.000Z",
            ),
        },
        RepoEvent::MoveWritten {
            uri: move_uri(5),
            did: BOB.to_string(),
            record: move_record(
                G1,
                Some(&move_uri(4)),
                "resign",
                true,
                "2024-05-01T10:05:00.000Z",
            ),
        },
    ]
}

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

#[derive(Debug, PartialEq)]
struct GameSnapshot {
    status: String,
    winner: Option<String>,
    result: Option<String>,
    move_count: i64,
    last_move_at: Option<String>,
}

async fn snapshot_game(pool: &SqlitePool, uri: &str) -> GameSnapshot {
    let game = queries::get_game(pool, uri).await.unwrap().unwrap();
    GameSnapshot {
        status: game.status,
        winner: game.winner,
        result: game.result,
        move_count: game.move_count,
        last_move_at: game.last_move_at,
    }
}

/// (uri, number, previous) per move, in board order
async fn snapshot_moves(pool: &SqlitePool, uri: &str) -> Vec<(String, i64, Option<String>)> {
    let (moves, _) = queries::list_moves(pool, uri, None, None).await.unwrap();
    moves
        .into_iter()
        .map(|m| (m.uri, m.move_number, m.previous_move_uri))
        .collect()
}

/// The previousMoveUri chain from the latest move reaches the chainless
/// first move in exactly moveCount steps
async fn assert_chain_integrity(pool: &SqlitePool, game_uri: &str) {
    let game = queries::get_game(pool, game_uri).await.unwrap().unwrap();
    let mut steps = 0;
    let mut current = queries::get_latest_move(pool, game_uri).await.unwrap();
    while let Some(mv) = current {
        steps += 1;
        current = match mv.previous_move_uri {
            Some(prev) => Some(
                queries::get_move(pool, &prev)
                    .await
                    .unwrap()
                    .expect("chain link points at a missing move"),
            ),
            None => None,
        };
    }
    assert_eq!(steps, game.move_count, "chain length != moveCount");
}

#[tokio::test]
async fn test_racing_duplicate_sources_converge() {
    // Reference state: the script applied once, in order
    let reference = memory_pool().await;
    let ref_applier = StateApplier::new(reference.clone());
    for event in script() {
        ref_applier.apply(&event).await.unwrap();
    }

    // Same script delivered twice concurrently, as if both feeds raced.
    // File-backed so the connections in the pool share one database.
    let dir = tempfile::tempdir().unwrap();
    let pool = db::create_pool(
        &dir.path().join("racing.sqlite"),
        DatabaseOptions {
            max_connections: 4,
            enable_wal: true,
        },
    )
    .await
    .unwrap();
    db::run_migrations(&pool).await.unwrap();
    let applier = Arc::new(StateApplier::new(pool.clone()));

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let applier = applier.clone();
        tasks.push(tokio::spawn(async move {
            for event in script() {
                applier.apply(&event).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for game_uri in [G1, G2] {
        assert_eq!(
            snapshot_game(&pool, game_uri).await,
            snapshot_game(&reference, game_uri).await,
        );
        assert_eq!(
            snapshot_moves(&pool, game_uri).await,
            snapshot_moves(&reference, game_uri).await,
        );
        assert_chain_integrity(&pool, game_uri).await;
    }

    // Resignation by the black-playing party: white wins
    let g1 = snapshot_game(&pool, G1).await;
    assert_eq!(g1.status, "completed");
    assert_eq!(g1.winner.as_deref(), Some(ALICE));
    assert_eq!(g1.result.as_deref(), Some("white-wins"));
    assert_eq!(g1.move_count, 4);

    let g2 = snapshot_game(&pool, G2).await;
    assert_eq!(g2.status, "active");
    assert_eq!(g2.move_count, 1);
}

#[tokio::test]
async fn test_crash_redelivery_from_durable_cursor_converges() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("appview.sqlite");

    // Reference state: uninterrupted processing
    let reference = memory_pool().await;
    let ref_applier = StateApplier::new(reference.clone());
    for event in script() {
        ref_applier.apply(&event).await.unwrap();
    }

    let events: Vec<(i64, RepoEvent)> = script()
        .into_iter()
        .enumerate()
        .map(|(i, event)| (((i as i64) + 1) * 100, event))
        .collect();

    // First run: long throttle interval, so only the first advance is
    // durable. Crash after event four.
    let durable_seq;
    {
        let pool = db::create_pool(&db_path, DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let applier = StateApplier::new(pool.clone());
        let cursor = CursorStore::new(pool.clone(), FeedSource::Firehose, Duration::from_secs(3600));

        for (seq, event) in &events[..4] {
            applier.apply(event).await.unwrap();
            cursor.advance(*seq).await.unwrap();
        }
        durable_seq = cursor.load().await.unwrap().unwrap();
        assert_eq!(durable_seq, 100);

        pool.close().await;
    }

    // Restart: resume from the durable checkpoint and redeliver
    // everything after it, including the three already-applied events
    {
        let pool = db::create_pool(&db_path, DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let applier = StateApplier::new(pool.clone());
        let cursor = CursorStore::new(pool.clone(), FeedSource::Firehose, Duration::ZERO);

        assert_eq!(cursor.load().await.unwrap(), Some(durable_seq));

        let mut last_seq = durable_seq;
        for (seq, event) in events.iter().filter(|(seq, _)| *seq > durable_seq) {
            applier.apply(event).await.unwrap();
            cursor.advance(*seq).await.unwrap();
            last_seq = *seq;
        }
        cursor.flush(last_seq).await.unwrap();

        for game_uri in [G1, G2] {
            assert_eq!(
                snapshot_game(&pool, game_uri).await,
                snapshot_game(&reference, game_uri).await,
            );
            assert_eq!(
                snapshot_moves(&pool, game_uri).await,
                snapshot_moves(&reference, game_uri).await,
            );
            assert_chain_integrity(&pool, game_uri).await;
        }
        assert_eq!(cursor.load().await.unwrap(), Some(700));
    }
}
