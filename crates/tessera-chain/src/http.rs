//! HTTP bindings: relayer, content gateway and archival service

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tessera_types::{Address, AssetKind, BlockRange, NewDeposit};

use crate::{
    ArchivalCallbacks, ArchivalStore, ChainClient, ChainError, ContentStore, Readiness, Result,
    TxReceipt,
};

/// Connection settings shared by every HTTP binding
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
}

impl HttpEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

#[derive(Clone)]
struct HttpBinding {
    endpoint: Arc<HttpEndpoint>,
    client: Client,
}

impl HttpBinding {
    fn new(endpoint: HttpEndpoint) -> Result<Self> {
        let client = Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        Ok(Self {
            endpoint: Arc::new(endpoint),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.endpoint.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check(resp: Response) -> Result<Response> {
        if !resp.status().is_success() {
            return Err(ChainError::Api {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp)
    }
}

// ============================================================================
// Relayer
// ============================================================================

#[derive(Serialize)]
struct DiscoverRequest<'a> {
    asset: &'a Address,
    chain_id: u64,
    from_block: Option<u64>,
    to_block: Option<u64>,
}

#[derive(Deserialize)]
struct DiscoverResponse {
    deposits: Vec<NewDeposit>,
}

#[derive(Serialize)]
struct CreateVaultRequest<'a> {
    controller: &'a Address,
}

#[derive(Serialize)]
struct AnchorRequest<'a> {
    nonce: u64,
    content_id: &'a str,
}

#[derive(Deserialize)]
struct TxHashResponse {
    tx_hash: String,
}

/// Chain client backed by a relayer that signs and submits transactions
#[derive(Clone)]
pub struct RelayerChainClient {
    http: HttpBinding,
}

impl RelayerChainClient {
    pub fn new(endpoint: HttpEndpoint) -> Result<Self> {
        Ok(Self {
            http: HttpBinding::new(endpoint)?,
        })
    }
}

#[async_trait]
impl ChainClient for RelayerChainClient {
    async fn discover_deposits(
        &self,
        asset: &AssetKind,
        chain_id: u64,
        range: BlockRange,
    ) -> Result<Vec<NewDeposit>> {
        let asset = asset.address();
        let body = DiscoverRequest {
            asset: &asset,
            chain_id,
            from_block: range.from_block,
            to_block: range.to_block,
        };
        let resp = self
            .http
            .authorize(self.http.client.post(self.http.url("/v1/deposits/discover")))
            .json(&body)
            .send()
            .await?;
        let found: DiscoverResponse = HttpBinding::check(resp).await?.json().await?;

        debug!(asset = %asset, chain_id, count = found.deposits.len(), "Deposits discovered");
        Ok(found.deposits)
    }

    async fn create_vault(&self, controller: &Address) -> Result<TxReceipt> {
        let resp = self
            .http
            .authorize(self.http.client.post(self.http.url("/v1/vaults")))
            .json(&CreateVaultRequest { controller })
            .send()
            .await?;
        let receipt: TxReceipt = HttpBinding::check(resp).await?.json().await?;

        info!(tx_hash = %receipt.tx_hash, controller = %controller, "Vault creation mined");
        Ok(receipt)
    }

    async fn submit_bundle(&self, nonce: u64, content_id: &str) -> Result<String> {
        let resp = self
            .http
            .authorize(self.http.client.post(self.http.url("/v1/anchors")))
            .json(&AnchorRequest { nonce, content_id })
            .send()
            .await?;
        let anchored: TxHashResponse = HttpBinding::check(resp).await?.json().await?;
        Ok(anchored.tx_hash)
    }
}

// ============================================================================
// Content-addressed storage
// ============================================================================

#[derive(Deserialize)]
struct PutResponse {
    cid: String,
}

/// Content store behind an HTTP pinning gateway
#[derive(Clone)]
pub struct HttpContentStore {
    http: HttpBinding,
}

impl HttpContentStore {
    pub fn new(endpoint: HttpEndpoint) -> Result<Self> {
        Ok(Self {
            http: HttpBinding::new(endpoint)?,
        })
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        let size = bytes.len();
        let resp = self
            .http
            .authorize(self.http.client.post(self.http.url("/v1/content")))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await?;
        let stored: PutResponse = HttpBinding::check(resp).await?.json().await?;

        debug!(cid = %stored.cid, size, "Content stored");
        Ok(stored.cid)
    }
}

// ============================================================================
// Archival storage
// ============================================================================

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    piece_id: Option<String>,
    #[serde(default)]
    confirmed: bool,
}

/// Archival service behind HTTP
///
/// Confirmation normally arrives later through the node's confirmation
/// endpoint; an upload response that is already confirmed is reported
/// immediately.
#[derive(Clone)]
pub struct HttpArchivalStore {
    http: HttpBinding,
}

impl HttpArchivalStore {
    pub fn new(endpoint: HttpEndpoint) -> Result<Self> {
        Ok(Self {
            http: HttpBinding::new(endpoint)?,
        })
    }
}

#[async_trait]
impl ArchivalStore for HttpArchivalStore {
    async fn check_readiness(&self, size: usize) -> Result<Readiness> {
        let resp = self
            .http
            .authorize(self.http.client.get(self.http.url("/v1/readiness")))
            .query(&[("size", size)])
            .send()
            .await?;
        Ok(HttpBinding::check(resp).await?.json().await?)
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_id: &str,
        callbacks: Arc<dyn ArchivalCallbacks>,
    ) -> Result<()> {
        let resp = self
            .http
            .authorize(self.http.client.post(self.http.url("/v1/uploads")))
            .header("x-content-id", content_id)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await?;
        let upload: UploadResponse = HttpBinding::check(resp).await?.json().await?;

        if let Some(tx_hash) = upload.tx_hash {
            callbacks.on_tx_submitted(tx_hash).await;
        }
        if let Some(piece_id) = upload.piece_id {
            callbacks.on_complete(piece_id).await;
        }
        if upload.confirmed {
            callbacks.on_confirmed().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let endpoint = HttpEndpoint::new("http://relayer:8545/", Duration::from_secs(5));
        assert_eq!(endpoint.base_url, "http://relayer:8545");
        let binding = HttpBinding::new(endpoint).unwrap();
        assert_eq!(binding.url("/v1/vaults"), "http://relayer:8545/v1/vaults");
    }

    #[tokio::test]
    async fn test_unreachable_relayer_is_transient() {
        let client = RelayerChainClient::new(HttpEndpoint::new(
            "http://127.0.0.1:1",
            Duration::from_millis(200),
        ))
        .unwrap();
        let err = client.submit_bundle(1, "cid").await.unwrap_err();
        assert!(err.class().is_retryable());
    }
}
