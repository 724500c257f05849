use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::Format;
use crate::feed::{Entry, MixedFeed};

const JSON_FEED_VERSION: &str = "https://jsonfeed.org/version/1";

#[derive(Serialize)]
struct JsonFeed<'a> {
    version: &'static str,
    title: &'a str,
    home_page_url: &'a str,
    feed_url: &'a str,
    description: String,
    items: Vec<JsonItem<'a>>,
}

#[derive(Serialize)]
struct JsonItem<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    title: &'a str,
    content_html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_published: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<JsonAuthor<'a>>,
}

#[derive(Serialize)]
struct JsonAuthor<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

fn timestamp(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl<'a> From<&'a Entry> for JsonItem<'a> {
    fn from(entry: &'a Entry) -> Self {
        Self {
            id: &entry.id,
            url: entry.link.as_deref(),
            title: &entry.title,
            content_html: &entry.body,
            date_published: timestamp(entry.published_at),
            date_modified: timestamp(entry.updated_at),
            author: entry.author.as_ref().map(|a| JsonAuthor {
                name: &a.name,
                url: a.url.as_deref(),
            }),
        }
    }
}

/// JSON Feed v1 document.
pub(super) fn render(feed: &MixedFeed, link: &str) -> Result<String> {
    let doc = JsonFeed {
        version: JSON_FEED_VERSION,
        title: &feed.title,
        home_page_url: link,
        feed_url: link,
        description: Format::Json.description(),
        items: feed.entries.iter().map(JsonItem::from).collect(),
    };
    serde_json::to_string_pretty(&doc).context("Failed to serialize JSON feed")
}
