use async_trait::async_trait;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

use super::error::{Endpoint, FetchError};
use crate::models::{Feed, FeedPayload};

/// Source of feed payloads and of the backend recompute call.
/// Implementations perform exactly one request per call and never retry.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetches and decodes the current payload for `feed`.
    async fn fetch_feed(&self, feed: Feed) -> Result<FeedPayload, FetchError>;

    /// Asks the backend to regenerate its data. The response body is ignored.
    async fn request_recompute(&self) -> Result<(), FetchError>;
}

/// Fetcher backed by the analytics HTTP API.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs one request and returns the raw body of a 2xx response.
    async fn send(&self, method: Method, endpoint: Endpoint) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        debug!(%endpoint, %url, %method, "Sending request.");

        let response = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(endpoint, self.timeout_ms, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(endpoint, self.timeout_ms, e))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FeedSource for HttpFetcher {
    async fn fetch_feed(&self, feed: Feed) -> Result<FeedPayload, FetchError> {
        let endpoint = Endpoint::Feed(feed);
        let body = self.send(Method::GET, endpoint).await?;
        FeedPayload::decode(feed, &body).map_err(|e| FetchError::Decode {
            endpoint,
            message: e.to_string(),
        })
    }

    async fn request_recompute(&self) -> Result<(), FetchError> {
        self.send(Method::POST, Endpoint::RefreshData).await?;
        Ok(())
    }
}
