/// Repo Writer - Publishes records to the acting player's PDS
///
/// Submissions are canonically stored in the player's own ATProto repo;
/// the local cache is only updated after the PDS write succeeds. The
/// trait keeps the XRPC transport swappable in tests.
use crate::error::{AppViewError, AppViewResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Reference to a committed record, as returned by putRecord
#[derive(Debug, Clone, Deserialize)]
pub struct RecordRef {
    pub uri: String,
    pub cid: String,
}

#[async_trait]
pub trait RepoWriter: Send + Sync {
    /// Write a record at (repo, collection, rkey), creating or replacing it
    async fn put_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
        record: &Value,
    ) -> AppViewResult<RecordRef>;
}

/// Writer that calls com.atproto.repo.putRecord on a real PDS
#[derive(Clone)]
pub struct XrpcRepoWriter {
    http_client: reqwest::Client,
    pds_url: String,
    access_token: String,
}

impl XrpcRepoWriter {
    pub fn new(pds_url: &str, access_token: &str) -> AppViewResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent("aurora-gambit/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppViewError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            pds_url: pds_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/xrpc/com.atproto.repo.putRecord", self.pds_url)
    }
}

/// Request body for putRecord
///
/// validate is false because the PDS does not know the com.atpchess
/// lexicons; records are validated locally before submission.
fn put_record_body(repo: &str, collection: &str, rkey: &str, record: &Value) -> Value {
    json!({
        "repo": repo,
        "collection": collection,
        "rkey": rkey,
        "record": record,
        "validate": false,
    })
}

#[async_trait]
impl RepoWriter for XrpcRepoWriter {
    async fn put_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
        record: &Value,
    ) -> AppViewResult<RecordRef> {
        let response = self
            .http_client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&put_record_body(repo, collection, rkey, record))
            .send()
            .await
            .map_err(|e| AppViewError::UpstreamFailure(format!("putRecord request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppViewError::UpstreamFailure(format!(
                "putRecord returned {}: {}",
                status, body
            )));
        }

        let record_ref: RecordRef = response.json().await.map_err(|e| {
            AppViewError::UpstreamFailure(format!("Invalid putRecord response: {}", e))
        })?;

        Ok(record_ref)
    }
}
