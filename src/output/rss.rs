use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Writer;

use super::{end, into_string, last_updated, start, text_element, xml_writer, Format};
use crate::feed::{Entry, MixedFeed};

const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

/// RSS 2.0 document. Authors go in `dc:creator` since RSS's own `<author>`
/// wants an email address.
pub(super) fn render(feed: &MixedFeed, link: &str) -> Result<String> {
    let mut writer = xml_writer();

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:dc", DC_NS));
    start(&mut writer, rss)?;
    start(&mut writer, BytesStart::new("channel"))?;

    text_element(&mut writer, "title", &feed.title)?;
    text_element(&mut writer, "link", link)?;
    text_element(&mut writer, "description", &Format::Rss.description())?;
    text_element(
        &mut writer,
        "lastBuildDate",
        &last_updated(feed).to_rfc2822(),
    )?;

    for entry in &feed.entries {
        write_item(&mut writer, entry)?;
    }

    end(&mut writer, "channel")?;
    end(&mut writer, "rss")?;
    into_string(writer)
}

fn write_item(writer: &mut Writer<Vec<u8>>, entry: &Entry) -> Result<()> {
    start(writer, BytesStart::new("item"))?;

    text_element(writer, "title", &entry.title)?;
    if let Some(ref link) = entry.link {
        text_element(writer, "link", link)?;
    }
    text_element(writer, "description", &entry.body)?;
    if let Some(ref author) = entry.author {
        text_element(writer, "dc:creator", &author.name)?;
    }
    if let Some(date) = entry.published_at.or(entry.updated_at) {
        text_element(writer, "pubDate", &date.to_rfc2822())?;
    }

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    start(writer, guid)?;
    writer
        .write_event(Event::Text(quick_xml::events::BytesText::new(&entry.id)))
        .context("Failed to write guid text")?;
    end(writer, "guid")?;

    end(writer, "item")
}
