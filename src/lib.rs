//! feedmix: fetch several Atom/RSS feeds concurrently, cache them, and merge
//! their entries into one newest-first feed.
//!
//! The engine is [`Mixer`]; it talks to the network through a
//! [`FeedSource`](feed::FeedSource) and to storage through a
//! [`CacheStore`](cache::CacheStore), so either side can be swapped out.

pub mod cache;
pub mod config;
pub mod feed;
pub mod mixer;
pub mod output;
pub mod server;

pub use cache::{CacheStore, MemoryCache, SqliteCache};
pub use config::Config;
pub use feed::{FeedFetcher, FeedRequest, MixedFeed};
pub use mixer::Mixer;
pub use output::Format;
