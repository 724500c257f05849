//! HTTP front end for the mixer.
//!
//! `GET /atom`, `GET /rss` and `GET /json` all take the same query:
//!
//! - `f` - feed URL, repeated once per feed
//! - `n` - entries kept per feed (absent, 0 or negative = all)
//! - `full` - `1`/`true` to prefer full content over summaries
//!
//! Feed failures never fail the response: the document is always served with
//! status 200 and the failures are reported in the `X-fm-errors` header.

use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::feed::FeedRequest;
use crate::mixer::Mixer;
use crate::output::{self, Format, ERRORS_HEADER};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    mixer: Arc<Mixer>,
    ttl: Duration,
}

impl AppState {
    pub fn new(mixer: Mixer, ttl: Duration) -> Self {
        Self {
            mixer: Arc::new(mixer),
            ttl,
        }
    }
}

/// Query parameters of a mix request.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct MixQuery {
    pub feeds: Vec<String>,
    pub entry_limit: usize,
    pub prefer_full_content: bool,
}

impl MixQuery {
    /// Parse a raw query string. `f` may repeat, which rules out a plain
    /// serde `Query` extractor.
    pub(crate) fn parse(raw: Option<&str>) -> Self {
        let mut query = MixQuery::default();

        for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            match &*key {
                "f" if !value.trim().is_empty() => query.feeds.push(value.trim().to_string()),
                "n" => {
                    query.entry_limit = match value.trim().parse::<i64>() {
                        Ok(n) => usize::try_from(n).unwrap_or(0),
                        Err(_) => {
                            tracing::warn!(n = %value, "Ignoring invalid entry limit");
                            0
                        }
                    }
                }
                "full" => {
                    query.prefer_full_content = matches!(&*value, "1" | "true" | "yes")
                }
                _ => {}
            }
        }

        query
    }

    fn requests(&self) -> Vec<FeedRequest> {
        FeedRequest::batch(
            self.feeds.iter().cloned(),
            self.entry_limit,
            self.prefer_full_content,
        )
    }
}

async fn mix_response(
    state: AppState,
    format: Format,
    headers: HeaderMap,
    uri: Uri,
    raw_query: Option<String>,
) -> Response {
    let query = MixQuery::parse(raw_query.as_deref());
    let mixed = state.mixer.mix(&query.requests(), state.ttl).await;

    // Absolute self link when the client told us the host
    let link = match headers.get(header::HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{host}{uri}"),
        None => uri.to_string(),
    };

    let body = match output::render(&mixed, format, &link) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(format = %format, error = %e, "Failed to render feed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render feed").into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    if let Some(report) = output::error_header(&mixed.errors) {
        match HeaderValue::from_str(&report) {
            Ok(value) => {
                response_headers.insert(ERRORS_HEADER, value);
            }
            Err(e) => tracing::warn!(error = %e, "Error report is not a valid header value"),
        }
    }

    (StatusCode::OK, response_headers, body).into_response()
}

async fn atom(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> Response {
    mix_response(state, Format::Atom, headers, uri, query).await
}

async fn rss(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> Response {
    mix_response(state, Format::Rss, headers, uri, query).await
}

async fn json(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> Response {
    mix_response(state, Format::Json, headers, uri, query).await
}

/// Build the axum application router.
///
/// Separated from `run_server` to enable testing without TCP binding.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/atom", get(atom))
        .route("/rss", get(rss))
        .route("/json", get(json))
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn run_server(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let app = build_app(state);

    let listener = TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "feedmix server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
        })
        .await
}
