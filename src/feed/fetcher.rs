use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use super::parser::parse_feed;
use super::types::{FeedData, FetchResult, Validators};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while retrieving one feed.
///
/// All variants end up as a `FetchResult::Failed` for the mixer; the
/// distinction only matters for logging.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Feed document could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::Timeout(_) => "timeout",
            FetchError::ResponseTooLarge => "too_large",
            FetchError::Parse(_) => "parse",
        }
    }
}

/// What a single fetch attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A full answer: parsed feed or error, plus validators for next time
    Complete {
        result: FetchResult,
        validators: Validators,
    },
    /// The server confirmed the previously cached copy is still current
    NotModified,
}

impl FetchOutcome {
    pub fn complete(result: FetchResult) -> Self {
        FetchOutcome::Complete {
            result,
            validators: Validators::default(),
        }
    }
}

/// Something that can retrieve one feed.
///
/// Implementations must never panic or return early with an error: every
/// failure is folded into the returned outcome.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str, validators: Option<&Validators>) -> FetchOutcome;
}

/// HTTP feed fetcher: one GET per call, no retries.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self::with_client(client, timeout))
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch_once(
        &self,
        url: &str,
        validators: Option<&Validators>,
    ) -> Result<Option<(FeedData, Validators)>, FetchError> {
        let mut request = self.client.get(url);
        if let Some(v) = validators {
            if let Some(etag) = &v.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = &v.last_modified {
                request = request.header(IF_MODIFIED_SINCE, modified);
            }
        }

        let response = request.send().await?;

        if response.status() == StatusCode::NOT_MODIFIED && validators.is_some() {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let validators = read_validators(response.headers());
        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        let feed = parse_feed(&bytes).map_err(|e| FetchError::Parse(format!("{e:#}")))?;

        Ok(Some((feed, validators)))
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str, validators: Option<&Validators>) -> FetchOutcome {
        let attempt = tokio::time::timeout(self.timeout, self.fetch_once(url, validators))
            .await
            .unwrap_or(Err(FetchError::Timeout(self.timeout)));

        match attempt {
            Ok(Some((feed, validators))) => {
                tracing::debug!(url = %url, entries = feed.entries.len(), "Fetched feed");
                FetchOutcome::Complete {
                    result: FetchResult::Fetched(feed),
                    validators,
                }
            }
            Ok(None) => {
                tracing::debug!(url = %url, "Feed not modified");
                FetchOutcome::NotModified
            }
            Err(e) => {
                tracing::warn!(url = %url, kind = e.kind(), error = %e, "Feed fetch failed");
                FetchOutcome::complete(FetchResult::failed(url, e.to_string()))
            }
        }
    }
}

fn read_validators(headers: &HeaderMap) -> Validators {
    let get = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Validators {
        etag: get(ETAG),
        last_modified: get(LAST_MODIFIED),
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
