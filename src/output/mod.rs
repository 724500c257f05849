//! Serialization of a [`MixedFeed`] for consumers.
//!
//! Three formats are supported: Atom 1.0, RSS 2.0 and JSON Feed v1. Errors
//! collected during the mix are not part of the document itself; they travel
//! next to it as the value produced by [`error_header`].

mod atom;
mod json;
mod rss;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::feed::{FeedError, MixedFeed};

/// Response header carrying the per-URL error report (`X-fm-errors`).
///
/// Kept lowercase so it can be used directly as an `http` header name.
pub const ERRORS_HEADER: &str = "x-fm-errors";

/// Output document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Atom,
    Rss,
    Json,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::Atom => "atom",
            Format::Rss => "rss",
            Format::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Format::Atom => "application/atom+xml",
            Format::Rss => "application/rss+xml",
            Format::Json => "application/json",
        }
    }

    /// Feed-level description embedded in every document.
    pub fn description(self) -> String {
        format!("{} feed created by feedmix.", self.name())
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atom" => Ok(Format::Atom),
            "rss" => Ok(Format::Rss),
            "json" => Ok(Format::Json),
            other => Err(format!("Unknown format '{other}' (expected atom, rss or json)")),
        }
    }
}

/// Render `feed` as a complete document. `link` is where the document is
/// served from (or any URL identifying the mix).
pub fn render(feed: &MixedFeed, format: Format, link: &str) -> Result<String> {
    match format {
        Format::Atom => atom::render(feed, link),
        Format::Rss => rss::render(feed, link),
        Format::Json => json::render(feed, link),
    }
}

/// URL-encoded JSON object mapping each failed URL to its message.
///
/// `None` when there is nothing to report.
pub fn error_header(errors: &[FeedError]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }

    let report: BTreeMap<&str, &str> = errors
        .iter()
        .map(|e| (e.url.as_str(), e.message.as_str()))
        .collect();
    let json = serde_json::to_string(&report).ok()?;

    // byte_serialize writes spaces as '+' and escapes literal '+', so the
    // swap below yields plain percent-encoding
    let encoded: String = url::form_urlencoded::byte_serialize(json.as_bytes()).collect();
    Some(encoded.replace('+', "%20"))
}

/// Newest timestamp in the mix, used as the document's own update time.
fn last_updated(feed: &MixedFeed) -> DateTime<Utc> {
    feed.entries
        .iter()
        .filter_map(|e| e.effective_timestamp())
        .max()
        .unwrap_or_else(Utc::now)
}

// ============================================================================
// XML helpers shared by the Atom and RSS writers
// ============================================================================

fn xml_writer() -> Writer<Vec<u8>> {
    Writer::new_with_indent(Vec::new(), b' ', 2)
}

fn start<W: Write>(writer: &mut Writer<W>, element: BytesStart<'_>) -> Result<()> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    writer
        .write_event(Event::Start(element))
        .with_context(|| format!("Failed to write {name} element"))
}

fn end<W: Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("Failed to write {name} end"))
}

fn empty<W: Write>(writer: &mut Writer<W>, element: BytesStart<'_>) -> Result<()> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    writer
        .write_event(Event::Empty(element))
        .with_context(|| format!("Failed to write {name} element"))
}

/// `<name>text</name>`, with `text` escaped.
fn text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    start(writer, BytesStart::new(name))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("Failed to write {name} text"))?;
    end(writer, name)
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(writer.into_inner()).context("Generated XML contains invalid UTF-8")
}
