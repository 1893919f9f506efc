//! HTTP client for feed listings and media downloads
//!
//! Listing requests share one rate limiter. Every request races the cancellation token so a
//! shutdown never waits on the network.

use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, Response,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::AppConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("HTTP request failed with status {status}: {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid payload from {url}: {message}")]
    Payload { url: String, message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client setup failed: {0}")]
    Setup(String),
}

impl FetchError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Payload { .. } | Self::Cancelled | Self::Io(_) | Self::Setup(_) => false,
        }
    }

    fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = error.status() {
            Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else if error.is_decode() {
            Self::Payload {
                url: url.to_string(),
                message: error.to_string(),
            }
        } else {
            Self::Connect {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub download_timeout_seconds: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

impl HttpClientConfig {
    #[must_use]
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            user_agent: config.feed.user_agent.clone(),
            timeout_seconds: config.feed.timeout_seconds,
            max_requests_per_second: config.feed.max_requests_per_second,
            download_timeout_seconds: config.media.download_timeout_seconds,
        }
    }
}

/// HTTP client with rate limiting for listing calls
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| FetchError::Setup(format!("Invalid user agent: {e}")))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Setup(format!("Failed to create HTTP client: {e}")))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .ok_or_else(|| FetchError::Setup("Rate limit must be greater than 0".into()))?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<Response, FetchError> {
        let response = tokio::select! {
            result = request.send() => result.map_err(|e| FetchError::from_reqwest(url, &e))?,
            () = cancellation_token.cancelled() => {
                tracing::warn!("🛑 HTTP request cancelled for URL: {}", url);
                return Err(FetchError::Cancelled);
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Rate-limited GET returning the decoded JSON body.
    pub async fn get_json(
        &self,
        url: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<serde_json::Value, FetchError> {
        if cancellation_token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        tokio::select! {
            () = self.rate_limiter.until_ready() => {},
            () = cancellation_token.cancelled() => return Err(FetchError::Cancelled),
        }

        tracing::debug!("Fetching listing: {}", url);
        let response = self
            .send(self.client.get(url), url, cancellation_token)
            .await?;

        let text = tokio::select! {
            result = response.text() => result.map_err(|e| FetchError::from_reqwest(url, &e))?,
            () = cancellation_token.cancelled() => return Err(FetchError::Cancelled),
        };

        serde_json::from_str(&text).map_err(|e| FetchError::Payload {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Streams `url` into `destination`, returning the number of bytes written.
    ///
    /// The caller owns cleanup of `destination` when this fails.
    pub async fn download_to(
        &self,
        url: &str,
        destination: &Path,
        cancellation_token: &CancellationToken,
    ) -> Result<u64, FetchError> {
        if cancellation_token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let timeout = Duration::from_secs(self.config.download_timeout_seconds);
        let transfer = async {
            let response = self
                .send(self.client.get(url).timeout(timeout), url, cancellation_token)
                .await?;

            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::File::create(destination).await?;
            let mut written = 0u64;
            let mut body = response.bytes_stream();

            loop {
                let chunk = tokio::select! {
                    chunk = body.next() => chunk,
                    () = cancellation_token.cancelled() => return Err(FetchError::Cancelled),
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes).await?;
                        written += bytes.len() as u64;
                    }
                    Some(Err(e)) => return Err(FetchError::from_reqwest(url, &e)),
                    None => break,
                }
            }

            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, FetchError>(written)
        };

        match tokio::time::timeout(timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = HttpClient::new(HttpClientConfig::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_zero_rate_limit_is_rejected() {
        let config = HttpClientConfig {
            max_requests_per_second: 0,
            ..HttpClientConfig::default()
        };
        assert!(matches!(HttpClient::new(config), Err(FetchError::Setup(_))));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = client.get_json("http://127.0.0.1:9/never", &token).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[test]
    fn test_transient_classification() {
        let status = |status| FetchError::Status {
            url: "u".into(),
            status,
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(FetchError::Timeout { url: "u".into() }.is_transient());
        assert!(!FetchError::Cancelled.is_transient());
    }
}
