/// Relay firehose subscriber
///
/// Consumes com.atproto.sync.subscribeRepos from a relay: every commit on
/// the network, as JSON frames tagged with `$type`. This is the full-replay
/// source and the system of record for the caches; it resumes from the last
/// durable cursor and reconnects on its own.
///
/// Frames arrive in seq order. A frame's cursor position is only recorded
/// after the frame is fully handled, so a failed apply tears the connection
/// down and replays from the last checkpoint instead of skipping events.
use crate::config::FeedConfig;
use crate::error::AppViewResult;
use crate::ingest::{ApplyOutcome, CursorStore, RepoEvent, StateApplier};
use crate::lexicon::{self, ChessRecord, GAME_COLLECTION, MOVE_COLLECTION};
use crate::metrics;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Firehose event frame
#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
pub enum FirehoseFrame {
    #[serde(rename = "#commit")]
    Commit(FirehoseCommit),
    #[serde(rename = "#identity")]
    Identity(FirehoseIdentity),
    #[serde(rename = "#account")]
    Account(FirehoseAccount),
    #[serde(rename = "#info")]
    Info(FirehoseInfo),
}

/// Commit event frame
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseCommit {
    pub seq: i64,
    pub repo: String,
    #[serde(default)]
    pub too_big: bool,
    #[serde(default)]
    pub ops: Vec<FirehoseOp>,
}

/// Operation in a commit
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseOp {
    pub action: String, // "create", "update", "delete"
    pub path: String,   // "collection/rkey"
    #[serde(default)]
    pub cid: Option<String>,
    /// Record body, inline for create and update ops
    #[serde(default)]
    pub record: Option<Value>,
}

/// Identity event frame
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseIdentity {
    pub seq: i64,
    pub did: String,
}

/// Account event frame
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseAccount {
    pub seq: i64,
    pub did: String,
}

/// Info message frame
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseInfo {
    pub name: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Reconnecting,
    Closed,
}

enum StreamEnd {
    Disconnected,
    Shutdown,
}

pub struct FirehoseIngester {
    relay_url: String,
    applier: Arc<StateApplier>,
    cursor: Arc<CursorStore>,
    reconnect_delay: Duration,
    read_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    state: ConnectionState,
    /// Highest position seen this session, flushed on shutdown
    position: Option<i64>,
}

impl FirehoseIngester {
    pub fn new(
        config: &FeedConfig,
        applier: Arc<StateApplier>,
        cursor: Arc<CursorStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            relay_url: config.relay_url.clone(),
            applier,
            cursor,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            shutdown,
            state: ConnectionState::Connecting,
            position: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Subscribe and stream until shutdown, reconnecting on any failure
    pub async fn run(&mut self) -> AppViewResult<()> {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.state = ConnectionState::Connecting;
            match self.stream_once().await {
                Ok(StreamEnd::Shutdown) => break,
                Ok(StreamEnd::Disconnected) => {
                    info!("firehose disconnected");
                }
                Err(e) => {
                    error!(error = %e, "firehose connection failed");
                }
            }

            self.state = ConnectionState::Reconnecting;
            metrics::record_reconnect("firehose");
            info!(
                delay_secs = self.reconnect_delay.as_secs(),
                "reconnecting to relay firehose"
            );

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.state = ConnectionState::Closed;
        if let Some(seq) = self.position {
            self.cursor.flush(seq).await?;
        }
        info!("firehose ingester stopped");
        Ok(())
    }

    async fn stream_once(&mut self) -> AppViewResult<StreamEnd> {
        let resume_from = self.cursor.load().await?;
        let url = self.subscribe_url(resume_from);
        info!(url = %url, cursor = ?resume_from, "connecting to relay firehose");

        let (mut ws_stream, _) = connect_async(&url).await?;
        self.state = ConnectionState::Streaming;
        info!("connected to relay firehose");

        let mut shutdown = self.shutdown.clone();
        loop {
            let msg = tokio::select! {
                msg = tokio::time::timeout(self.read_timeout, ws_stream.next()) => {
                    match msg {
                        Ok(msg) => msg,
                        Err(_) => {
                            warn!(
                                timeout_secs = self.read_timeout.as_secs(),
                                "no frames within read timeout"
                            );
                            return Ok(StreamEnd::Disconnected);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    let _ = ws_stream.close(None).await;
                    return Ok(StreamEnd::Shutdown);
                }
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = self.handle_frame(&text).await {
                        error!(error = %e, "failed to apply frame, resuming from checkpoint");
                        metrics::record_apply_failure("firehose");
                        return Ok(StreamEnd::Disconnected);
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    ws_stream.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) => {
                    info!("relay closed connection");
                    return Ok(StreamEnd::Disconnected);
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "websocket error");
                    return Ok(StreamEnd::Disconnected);
                }
                None => {
                    info!("relay stream ended");
                    return Ok(StreamEnd::Disconnected);
                }
            }
        }
    }

    fn subscribe_url(&self, cursor: Option<i64>) -> String {
        let base = format!("{}/xrpc/com.atproto.sync.subscribeRepos", self.relay_url);
        match cursor {
            Some(seq) => format!("{}?cursor={}", base, seq),
            None => base,
        }
    }

    /// Handle one frame, then record its position. Errors mean the frame
    /// was not fully applied and must be replayed.
    async fn handle_frame(&mut self, text: &str) -> AppViewResult<()> {
        let frame: FirehoseFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "unparseable frame, skipping");
                metrics::record_dropped("firehose", "unparseable");
                return Ok(());
            }
        };

        match frame {
            FirehoseFrame::Commit(commit) => {
                metrics::record_feed_event("firehose", "commit");
                self.handle_commit(&commit).await?;
                self.advance(commit.seq).await?;
            }
            FirehoseFrame::Identity(identity) => {
                metrics::record_feed_event("firehose", "identity");
                self.advance(identity.seq).await?;
            }
            FirehoseFrame::Account(account) => {
                metrics::record_feed_event("firehose", "account");
                self.advance(account.seq).await?;
            }
            FirehoseFrame::Info(info) => {
                metrics::record_feed_event("firehose", "info");
                info!(name = %info.name, message = ?info.message, "firehose info");
            }
        }

        Ok(())
    }

    async fn handle_commit(&self, commit: &FirehoseCommit) -> AppViewResult<()> {
        if commit.too_big {
            debug!(seq = commit.seq, repo = %commit.repo, "oversized commit, records not inline");
        }

        for op in &commit.ops {
            let collection = match op.path.split_once('/') {
                Some((collection, _)) => collection,
                None => continue,
            };
            if !lexicon::is_chess_collection(collection) {
                continue;
            }

            let event = match decode_op(&commit.repo, collection, op) {
                Ok(event) => event,
                Err(reason) => {
                    warn!(
                        repo = %commit.repo,
                        path = %op.path,
                        action = %op.action,
                        reason,
                        "dropping undecodable op"
                    );
                    metrics::record_dropped("firehose", reason);
                    continue;
                }
            };

            if self.applier.apply(&event).await? == ApplyOutcome::MissingGame {
                metrics::record_dropped("firehose", "missing_game");
            }
        }

        Ok(())
    }

    async fn advance(&mut self, seq: i64) -> AppViewResult<()> {
        self.position = Some(seq);
        self.cursor.advance(seq).await?;
        Ok(())
    }
}

/// Decode one matching commit op into a repo event
fn decode_op(repo: &str, collection: &str, op: &FirehoseOp) -> Result<RepoEvent, &'static str> {
    let uri = format!("at://{}/{}", repo, op.path);

    match op.action.as_str() {
        "create" | "update" => {
            let record = op.record.as_ref().ok_or("missing_record")?;
            match lexicon::validate_record(collection, record) {
                Ok(ChessRecord::Game(record)) => Ok(RepoEvent::GameWritten {
                    uri,
                    did: repo.to_string(),
                    record,
                }),
                Ok(ChessRecord::Move(record)) => Ok(RepoEvent::MoveWritten {
                    uri,
                    did: repo.to_string(),
                    record,
                }),
                Err(_) => Err("invalid_record"),
            }
        }
        "delete" => match collection {
            GAME_COLLECTION => Ok(RepoEvent::GameDeleted { uri }),
            MOVE_COLLECTION => Ok(RepoEvent::MoveDeleted { uri }),
            _ => Err("unknown_collection"),
        },
        _ => Err("unknown_action"),
    }
}
