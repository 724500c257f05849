use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesStart, Event};

use super::{empty, end, into_string, last_updated, start, text_element, xml_writer, Format};
use crate::feed::{Entry, MixedFeed};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Atom 1.0 document.
pub(super) fn render(feed: &MixedFeed, link: &str) -> Result<String> {
    let mut writer = xml_writer();
    let updated = last_updated(feed);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut root = BytesStart::new("feed");
    root.push_attribute(("xmlns", ATOM_NS));
    start(&mut writer, root)?;

    text_element(&mut writer, "title", &feed.title)?;
    text_element(&mut writer, "subtitle", &Format::Atom.description())?;
    let mut self_link = BytesStart::new("link");
    self_link.push_attribute(("href", link));
    self_link.push_attribute(("rel", "alternate"));
    empty(&mut writer, self_link)?;
    text_element(&mut writer, "id", link)?;
    text_element(&mut writer, "updated", &timestamp(updated))?;

    for entry in &feed.entries {
        write_entry(&mut writer, entry, updated)?;
    }

    end(&mut writer, "feed")?;
    into_string(writer)
}

fn write_entry(
    writer: &mut quick_xml::Writer<Vec<u8>>,
    entry: &Entry,
    feed_updated: DateTime<Utc>,
) -> Result<()> {
    start(writer, BytesStart::new("entry"))?;

    text_element(writer, "title", &entry.title)?;
    if let Some(ref href) = entry.link {
        let mut link = BytesStart::new("link");
        link.push_attribute(("href", href.as_str()));
        link.push_attribute(("rel", "alternate"));
        empty(writer, link)?;
    }
    text_element(writer, "id", &entry.id)?;

    // <updated> is mandatory in Atom
    let updated = entry.effective_timestamp().unwrap_or(feed_updated);
    text_element(writer, "updated", &timestamp(updated))?;
    if let Some(published) = entry.published_at {
        text_element(writer, "published", &timestamp(published))?;
    }

    if let Some(ref author) = entry.author {
        start(writer, BytesStart::new("author"))?;
        text_element(writer, "name", &author.name)?;
        if let Some(ref uri) = author.url {
            text_element(writer, "uri", uri)?;
        }
        end(writer, "author")?;
    }

    let mut summary = BytesStart::new("summary");
    summary.push_attribute(("type", "html"));
    start(writer, summary)?;
    writer
        .write_event(Event::Text(quick_xml::events::BytesText::new(&entry.body)))
        .context("Failed to write summary text")?;
    end(writer, "summary")?;

    end(writer, "entry")
}
