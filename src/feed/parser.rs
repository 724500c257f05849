use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::Person;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use super::types::{Author, FeedData, FeedEntry};

/// Parse raw Atom/RSS bytes into feed data, keeping document order.
///
/// Entries without an author inherit the feed-level author, so every entry
/// carries one whenever the feed does.
///
/// Entries without an id of their own get a SHA-256 over `link|title|published`.
/// feed-rs would otherwise synthesize one, so its generator is blanked out.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedData> {
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .context("Malformed feed document")?;

    let feed_author = feed.authors.first().map(to_author);
    let link = feed.links.first().map(|l| l.href.clone());
    let title = feed
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled".to_string());

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let author = entry
                .authors
                .first()
                .map(to_author)
                .or_else(|| feed_author.clone());
            let summary = entry.summary.map(|s| s.content);
            let content = entry.content.and_then(|c| c.body);
            let id = generate_id(&entry.id, link.as_deref(), &title, entry.published);

            FeedEntry {
                id,
                title,
                link,
                author,
                summary,
                content,
                published: entry.published,
                updated: entry.updated,
            }
        })
        .collect();

    Ok(FeedData {
        title,
        link,
        entries,
    })
}

fn to_author(person: &Person) -> Author {
    Author {
        name: person.name.clone(),
        url: person.uri.clone(),
    }
}

fn generate_id(
    existing: &str,
    link: Option<&str>,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    let trimmed = existing.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    let input = format!(
        "{}|{}|{}",
        link.unwrap_or(""),
        title,
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
