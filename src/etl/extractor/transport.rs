//! HTTP transport for JSON-RPC calls.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

/// Sends one JSON-RPC body and returns the raw response body.
///
/// Non-2xx statuses are not an error at this layer: the body is handed back
/// and the caller's decode step decides.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn post_json(&self, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// `reqwest` transport with a whole-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post_json(&self, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(
                target: "erc20_ledger::extractor",
                url = %self.url,
                status = %status,
                "Non-success HTTP status from RPC node"
            );
        }

        Ok(response.bytes().await?.to_vec())
    }
}
