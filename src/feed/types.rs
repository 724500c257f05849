use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Requests
// ============================================================================

/// One feed the caller wants mixed, with its per-feed options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    /// Feed URL as received (not normalized)
    pub url: String,
    /// Maximum entries taken from this feed (0 = unlimited)
    pub entry_limit: usize,
    /// Use full entry content instead of the summary when both exist
    pub prefer_full_content: bool,
}

impl FeedRequest {
    pub fn new(url: impl Into<String>, entry_limit: usize, prefer_full_content: bool) -> Self {
        Self {
            url: url.into(),
            entry_limit,
            prefer_full_content,
        }
    }

    /// Build one request per URL sharing the same options.
    pub fn batch<I, S>(urls: I, entry_limit: usize, prefer_full_content: bool) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .map(|url| Self::new(url, entry_limit, prefer_full_content))
            .collect()
    }
}

// ============================================================================
// Parsed feed data (cached payload)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// An entry as it came out of the parser.
///
/// Both `summary` and `content` are kept so a single cached feed can answer
/// requests with either content preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    pub author: Option<Author>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Successfully fetched and parsed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedData {
    pub title: String,
    pub link: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// A feed that could not be fetched or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedError {
    pub url: String,
    pub message: String,
}

/// Outcome of resolving one feed URL: either parsed data or an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResult {
    Fetched(FeedData),
    Failed(FeedError),
}

impl FetchResult {
    pub fn failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchResult::Failed(FeedError {
            url: url.into(),
            message: message.into(),
        })
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchResult::Fetched(_))
    }
}

/// HTTP cache validators captured from a successful response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

// ============================================================================
// Merged output
// ============================================================================

/// An entry of the mixed feed, with its body already chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    pub author: Option<Author>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub body: String,
    pub source_feed_url: String,
}

impl Entry {
    /// Build an output entry from a parsed one.
    ///
    /// Body: full content when preferred and present, else summary, else
    /// whatever exists.
    pub fn from_feed_entry(entry: &FeedEntry, source_feed_url: &str, prefer_full: bool) -> Self {
        let (first, second) = if prefer_full {
            (&entry.content, &entry.summary)
        } else {
            (&entry.summary, &entry.content)
        };
        let body = first
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(second.as_deref())
            .unwrap_or_default()
            .to_string();

        Self {
            id: entry.id.clone(),
            title: entry.title.clone(),
            link: entry.link.clone(),
            author: entry.author.clone(),
            published_at: entry.published,
            updated_at: entry.updated,
            body,
            source_feed_url: source_feed_url.to_string(),
        }
    }

    /// Update time if present, else publish time. `None` sorts as oldest.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.published_at)
    }
}

/// The unified result of one mix call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedFeed {
    pub title: String,
    pub entries: Vec<Entry>,
    pub errors: Vec<FeedError>,
}
