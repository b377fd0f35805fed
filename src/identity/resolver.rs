/// Identity Resolver - Reverse DID-to-handle resolution with caching
use crate::{
    config::IdentityConfig,
    error::{AppViewError, AppViewResult},
    identity::HandleCache,
    metrics,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Resolves a DID to its declared handle
#[async_trait]
pub trait HandleResolver: Send + Sync {
    async fn resolve_did_to_handle(&self, did: &str) -> AppViewResult<String>;
}

/// Minimal DID document shape; only alsoKnownAs is needed here
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidDocument {
    #[serde(default)]
    also_known_as: Vec<String>,
}

/// Resolver that fetches DID documents from their authoritative source
#[derive(Clone)]
pub struct DirectoryResolver {
    http_client: reqwest::Client,
    plc_url: String,
}

impl DirectoryResolver {
    pub fn new(config: &IdentityConfig) -> AppViewResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent("aurora-gambit/0.1")
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AppViewError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            plc_url: config.did_plc_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch DID document from source
    ///
    /// Supports did:plc and did:web methods
    async fn fetch_did_document(&self, did: &str) -> AppViewResult<DidDocument> {
        let url = if did.starts_with("did:plc:") {
            format!("{}/{}", self.plc_url, did)
        } else if did.starts_with("did:web:") {
            web_did_url(did)?
        } else {
            return Err(AppViewError::IdentityResolution(format!(
                "Unsupported DID method: {}",
                did
            )));
        };

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                AppViewError::IdentityResolution(format!("Failed to fetch DID document: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppViewError::IdentityResolution(format!(
                "DID document fetch returned error: {}",
                response.status()
            )));
        }

        let doc: DidDocument = response.json().await.map_err(|e| {
            AppViewError::IdentityResolution(format!("Invalid DID document: {}", e))
        })?;

        Ok(doc)
    }
}

#[async_trait]
impl HandleResolver for DirectoryResolver {
    async fn resolve_did_to_handle(&self, did: &str) -> AppViewResult<String> {
        let doc = self.fetch_did_document(did).await?;

        handle_from_doc(&doc).ok_or_else(|| {
            AppViewError::IdentityResolution(format!("DID document for {} declares no handle", did))
        })
    }
}

/// Map a did:web to its document URL
///
/// did:web:example.com -> https://example.com/.well-known/did.json
/// did:web:example.com:user:alice -> https://example.com/user/alice/did.json
fn web_did_url(did: &str) -> AppViewResult<String> {
    let did_suffix = did
        .strip_prefix("did:web:")
        .ok_or_else(|| AppViewError::IdentityResolution("Invalid did:web format".to_string()))?;

    let parts: Vec<&str> = did_suffix.split(':').collect();
    let domain = parts
        .first()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppViewError::IdentityResolution("Missing domain in did:web".to_string()))?;

    if parts.len() == 1 {
        Ok(format!("https://{}/.well-known/did.json", domain))
    } else {
        let path = parts[1..].join("/");
        Ok(format!("https://{}/{}/did.json", domain, path))
    }
}

/// Extract the declared handle from a DID document's alsoKnownAs
fn handle_from_doc(doc: &DidDocument) -> Option<String> {
    doc.also_known_as
        .iter()
        .find_map(|aka| aka.strip_prefix("at://"))
        .map(|handle| handle.to_string())
}

/// Caching layer over any resolver
///
/// Cache hits skip the network entirely. Successful resolutions are
/// written back; failures are not cached, so a flaky directory retries
/// on the next lookup.
#[derive(Clone)]
pub struct CachingResolver {
    cache: HandleCache,
    inner: Arc<dyn HandleResolver>,
}

impl CachingResolver {
    pub fn new(cache: HandleCache, inner: Arc<dyn HandleResolver>) -> Self {
        Self { cache, inner }
    }
}

#[async_trait]
impl HandleResolver for CachingResolver {
    async fn resolve_did_to_handle(&self, did: &str) -> AppViewResult<String> {
        if let Some(handle) = self.cache.get(did).await? {
            metrics::record_handle_resolution("cache_hit");
            return Ok(handle);
        }

        match self.inner.resolve_did_to_handle(did).await {
            Ok(handle) => {
                debug!(did = %did, handle = %handle, "resolved handle");
                self.cache.put(did, &handle).await?;
                metrics::record_handle_resolution("resolved");
                Ok(handle)
            }
            Err(e) => {
                metrics::record_handle_resolution("failed");
                Err(e)
            }
        }
    }
}
