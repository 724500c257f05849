//! Feed retrieval, parsing and merging.
//!
//! - [`parser`] - turns Atom/RSS bytes into [`FeedData`] using the `feed-rs` crate
//! - [`fetcher`] - one HTTP GET per feed with timeout and conditional requests
//! - [`merger`] - per-feed truncation and the global newest-first ordering
//!
//! The value types shared by the engine live in `types`.

mod fetcher;
mod merger;
mod parser;
mod types;

pub use fetcher::{FeedFetcher, FeedSource, FetchError, FetchOutcome, DEFAULT_FETCH_TIMEOUT};
pub use merger::merge_entries;
pub use parser::parse_feed;
pub use types::{
    Author, Entry, FeedData, FeedEntry, FeedError, FeedRequest, FetchResult, MixedFeed, Validators,
};
