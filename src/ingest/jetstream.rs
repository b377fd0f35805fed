/// Jetstream subscriber
///
/// Consumes a jetstream `/subscribe` endpoint: server-side filtered JSON
/// events for just the chess collections, cheaper and lower-latency than
/// the full firehose. Positions are microsecond timestamps (time_us).
///
/// This feed is best-effort. The cursor advances on every inbound message
/// whether or not it applied, per-message failures never close the
/// subscription, and a closed subscription stays closed; the firehose
/// replay is the system of record and converges the cache afterwards.
use crate::config::FeedConfig;
use crate::error::AppViewResult;
use crate::ingest::{ApplyOutcome, CursorStore, RepoEvent, StateApplier};
use crate::lexicon::{self, ChessRecord, CHESS_COLLECTIONS, GAME_COLLECTION, MOVE_COLLECTION};
use crate::metrics;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// One jetstream event
#[derive(Debug, Deserialize)]
pub struct JetstreamEvent {
    pub did: String,
    pub time_us: i64,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub commit: Option<JetstreamCommit>,
}

/// Commit payload of a `kind: "commit"` event
#[derive(Debug, Deserialize)]
pub struct JetstreamCommit {
    pub operation: String, // "create", "update", "delete"
    pub collection: String,
    pub rkey: String,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub record: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Open,
    Closed,
}

pub struct JetstreamIngester {
    endpoint: String,
    applier: Arc<StateApplier>,
    cursor: Arc<CursorStore>,
    shutdown: watch::Receiver<bool>,
    state: SubscriptionState,
    /// Highest time_us seen this session, flushed on close
    position: Option<i64>,
}

impl JetstreamIngester {
    pub fn new(
        config: &FeedConfig,
        applier: Arc<StateApplier>,
        cursor: Arc<CursorStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            endpoint: config.jetstream_url.clone(),
            applier,
            cursor,
            shutdown,
            state: SubscriptionState::Idle,
            position: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Subscribe and stream until the server closes or shutdown is
    /// signalled. Does not reconnect. Calling again while open is a no-op.
    pub async fn run(&mut self) -> AppViewResult<()> {
        if self.state == SubscriptionState::Open {
            warn!("jetstream subscription already open");
            return Ok(());
        }

        let resume_from = self.cursor.load().await?;
        let url = self.subscribe_url(resume_from);
        info!(url = %url, cursor = ?resume_from, "connecting to jetstream");

        let (mut ws_stream, _) = connect_async(&url).await?;
        self.state = SubscriptionState::Open;
        info!("connected to jetstream");

        let mut shutdown = self.shutdown.clone();
        loop {
            let msg = tokio::select! {
                msg = ws_stream.next() => msg,
                _ = shutdown.changed() => {
                    let _ = ws_stream.close(None).await;
                    break;
                }
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    self.handle_message(&text).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_stream.send(Message::Pong(data)).await {
                        warn!(error = %e, "failed to answer jetstream ping");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("jetstream closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if *self.shutdown.borrow() {
                        debug!(error = %e, "jetstream socket error during shutdown");
                    } else {
                        error!(error = %e, "jetstream socket error");
                    }
                    break;
                }
                None => {
                    info!("jetstream stream ended");
                    break;
                }
            }
        }

        self.close_out().await
    }

    /// Record the close, flush the position, and return the machine to
    /// Idle so the owner may start a fresh subscription.
    async fn close_out(&mut self) -> AppViewResult<()> {
        self.state = SubscriptionState::Closed;
        if let Some(seq) = self.position {
            self.cursor.flush(seq).await?;
        }
        info!("jetstream subscription closed");
        self.state = SubscriptionState::Idle;
        Ok(())
    }

    fn subscribe_url(&self, cursor: Option<i64>) -> String {
        let collections = CHESS_COLLECTIONS.join(",");
        let mut url = format!(
            "{}/subscribe?wantedCollections={}",
            self.endpoint,
            urlencoding::encode(&collections)
        );
        if let Some(time_us) = cursor {
            url.push_str(&format!("&cursor={}", time_us));
        }
        url
    }

    /// Handle one message. The cursor advances first, unconditionally; any
    /// failure after that is logged and swallowed.
    async fn handle_message(&mut self, text: &str) {
        let event: JetstreamEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "unparseable jetstream event, skipping");
                metrics::record_dropped("jetstream", "unparseable");
                return;
            }
        };

        let kind = if event.kind.is_empty() {
            "unknown"
        } else {
            event.kind.as_str()
        };
        metrics::record_feed_event("jetstream", kind);

        self.position = Some(event.time_us);
        if let Err(e) = self.cursor.advance(event.time_us).await {
            error!(error = %e, "failed to persist jetstream cursor");
        }

        if event.kind != "commit" {
            return;
        }
        let commit = match &event.commit {
            Some(commit) => commit,
            None => {
                debug!(did = %event.did, "commit event without commit payload");
                return;
            }
        };
        if !lexicon::is_chess_collection(&commit.collection) {
            return;
        }

        let repo_event = match decode_commit(&event.did, commit) {
            Ok(repo_event) => repo_event,
            Err(reason) => {
                warn!(
                    did = %event.did,
                    collection = %commit.collection,
                    rkey = %commit.rkey,
                    operation = %commit.operation,
                    reason,
                    "dropping undecodable jetstream commit"
                );
                metrics::record_dropped("jetstream", reason);
                return;
            }
        };

        match self.applier.apply(&repo_event).await {
            Ok(ApplyOutcome::MissingGame) => {
                metrics::record_dropped("jetstream", "missing_game");
            }
            Ok(_) => {}
            Err(e) => {
                // The firehose replay will deliver this event again
                error!(error = %e, uri = repo_event.uri(), "jetstream apply failed");
                metrics::record_apply_failure("jetstream");
            }
        }
    }
}

/// Decode one matching jetstream commit into a repo event
fn decode_commit(did: &str, commit: &JetstreamCommit) -> Result<RepoEvent, &'static str> {
    let uri = lexicon::at_uri(did, &commit.collection, &commit.rkey);

    match commit.operation.as_str() {
        "create" | "update" => {
            let record = commit.record.as_ref().ok_or("missing_record")?;
            match lexicon::validate_record(&commit.collection, record) {
                Ok(ChessRecord::Game(record)) => Ok(RepoEvent::GameWritten {
                    uri,
                    did: did.to_string(),
                    record,
                }),
                Ok(ChessRecord::Move(record)) => Ok(RepoEvent::MoveWritten {
                    uri,
                    did: did.to_string(),
                    record,
                }),
                Err(_) => Err("invalid_record"),
            }
        }
        "delete" => match commit.collection.as_str() {
            GAME_COLLECTION => Ok(RepoEvent::GameDeleted { uri }),
            MOVE_COLLECTION => Ok(RepoEvent::MoveDeleted { uri }),
            _ => Err("unknown_collection"),
        },
        _ => Err("unknown_operation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queries;
    use crate::ingest::FeedSource;
    use serde_json::json;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
    use std::time::Duration;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    fn test_ingester(pool: &SqlitePool) -> (JetstreamIngester, watch::Sender<bool>) {
        let config = FeedConfig {
            relay_url: "wss://relay.test".to_string(),
            jetstream_url: "wss://jetstream.test".to_string(),
            firehose_enabled: false,
            jetstream_enabled: true,
            reconnect_delay_secs: 1,
            read_timeout_secs: 30,
            firehose_cursor_interval_secs: 0,
            jetstream_cursor_interval_secs: 0,
        };
        let applier = Arc::new(StateApplier::new(pool.clone()));
        let cursor = Arc::new(CursorStore::new(
            pool.clone(),
            FeedSource::Jetstream,
            Duration::ZERO,
        ));
        let (tx, rx) = watch::channel(false);
        (JetstreamIngester::new(&config, applier, cursor, rx), tx)
    }

    fn game_event(time_us: i64) -> String {
        json!({
            "did": "did:plc:alice",
            "time_us": time_us,
            "kind": "commit",
            "commit": {
                "rev": "3rev",
                "operation": "create",
                "collection": "com.atpchess.game",
                "rkey": "3jza",
                "cid": "bafygame",
                "record": {
                    "$type": "com.atpchess.game",
                    "challenger": "did:plc:alice",
                    "challenged": "did:plc:bob",
                    "startsFirst": "did:plc:alice",
                    "createdAt": "2024-05-01T10:00:00.000Z"
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_subscribe_url_construction() {
        let pool = setup_test_db().await;
        let (ingester, _tx) = test_ingester(&pool);

        assert_eq!(
            ingester.subscribe_url(None),
            "wss://jetstream.test/subscribe?wantedCollections=com.atpchess.game%2Ccom.atpchess.move"
        );
        assert_eq!(
            ingester.subscribe_url(Some(1_725_911_162_329_308)),
            "wss://jetstream.test/subscribe?wantedCollections=com.atpchess.game%2Ccom.atpchess.move&cursor=1725911162329308"
        );
    }

    #[test]
    fn test_event_deserialization() {
        let event: JetstreamEvent = serde_json::from_str(&game_event(1000)).unwrap();
        assert_eq!(event.did, "did:plc:alice");
        assert_eq!(event.kind, "commit");
        let commit = event.commit.unwrap();
        assert_eq!(commit.operation, "create");
        assert_eq!(commit.collection, "com.atpchess.game");
        assert!(commit.record.is_some());

        // Identity events carry no commit
        let identity: JetstreamEvent = serde_json::from_str(
            r#"{"did":"did:plc:x","time_us":2000,"kind":"identity","identity":{"did":"did:plc:x","handle":"x.test","seq":4,"time":"2024-05-01T10:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(identity.kind, "identity");
        assert!(identity.commit.is_none());
    }

    #[tokio::test]
    async fn test_handle_message_applies_commit() {
        let pool = setup_test_db().await;
        let (mut ingester, _tx) = test_ingester(&pool);

        ingester.handle_message(&game_event(5000)).await;

        let game = queries::get_game(&pool, "at://did:plc:alice/com.atpchess.game/3jza")
            .await
            .unwrap();
        assert!(game.is_some());
        assert_eq!(ingester.cursor.load().await.unwrap(), Some(5000));
    }

    #[tokio::test]
    async fn test_cursor_advances_on_every_kind() {
        let pool = setup_test_db().await;
        let (mut ingester, _tx) = test_ingester(&pool);

        ingester
            .handle_message(r#"{"did":"did:plc:x","time_us":111,"kind":"identity"}"#)
            .await;
        assert_eq!(ingester.cursor.load().await.unwrap(), Some(111));

        ingester
            .handle_message(r#"{"did":"did:plc:x","time_us":222,"kind":"account"}"#)
            .await;
        assert_eq!(ingester.cursor.load().await.unwrap(), Some(222));
    }

    #[tokio::test]
    async fn test_cursor_advances_even_when_apply_drops() {
        let pool = setup_test_db().await;
        let (mut ingester, _tx) = test_ingester(&pool);

        // Move for a game the cache has never seen
        let event = json!({
            "did": "did:plc:bob",
            "time_us": 333,
            "kind": "commit",
            "commit": {
                "operation": "create",
                "collection": "com.atpchess.move",
                "rkey": "3m",
                "record": {
                    "$type": "com.atpchess.move",
                    "game": { "uri": "at://did:plc:alice/com.atpchess.game/missing", "cid": "bafy" },
                    "move": "e4",
                    "createdAt": "2024-05-01T10:05:00.000Z"
                }
            }
        })
        .to_string();
        ingester.handle_message(&event).await;

        assert_eq!(ingester.cursor.load().await.unwrap(), Some(333));
        let (moves, _) = queries::list_moves(
            &pool,
            "at://did:plc:alice/com.atpchess.game/missing",
            None,
            None,
        )
        .await
        .unwrap();
        assert!(moves.is_empty());

        // Invalid record: cursor still advances
        let event = json!({
            "did": "did:plc:bob",
            "time_us": 444,
            "kind": "commit",
            "commit": {
                "operation": "create",
                "collection": "com.atpchess.move",
                "rkey": "3n",
                "record": { "$type": "com.atpchess.move" }
            }
        })
        .to_string();
        ingester.handle_message(&event).await;
        assert_eq!(ingester.cursor.load().await.unwrap(), Some(444));
    }

    #[tokio::test]
    async fn test_garbage_does_not_advance_cursor() {
        let pool = setup_test_db().await;
        let (mut ingester, _tx) = test_ingester(&pool);

        ingester.handle_message("{{{{").await;
        assert_eq!(ingester.cursor.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_flushes_position_and_returns_to_idle() {
        let pool = setup_test_db().await;
        let (mut ingester, _tx) = test_ingester(&pool);
        ingester.state = SubscriptionState::Open;
        ingester.position = Some(9_000);

        ingester.close_out().await.unwrap();

        assert_eq!(ingester.state(), SubscriptionState::Idle);
        assert_eq!(ingester.cursor.load().await.unwrap(), Some(9_000));
    }

    #[test]
    fn test_decode_commit_delete() {
        let commit = JetstreamCommit {
            operation: "delete".to_string(),
            collection: "com.atpchess.move".to_string(),
            rkey: "3m".to_string(),
            rev: None,
            cid: None,
            record: None,
        };
        let event = decode_commit("did:plc:alice", &commit).unwrap();
        match event {
            RepoEvent::MoveDeleted { uri } => {
                assert_eq!(uri, "at://did:plc:alice/com.atpchess.move/3m");
            }
            _ => panic!("expected move delete"),
        }
    }
}
