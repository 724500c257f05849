//! Fan-out, cache short-circuit and aggregation for one mix request.
//!
//! Every requested URL is resolved independently: a fresh cache record is
//! served as is, anything else goes to the [`FeedSource`] and the answer
//! (success or failure) is written back. Once every URL has resolved, the
//! successes are merged and the failures reported alongside them.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::{cache_key, CacheRecord, CacheStore};
use crate::config::Config;
use crate::feed::{
    merge_entries, FeedError, FeedRequest, FeedSource, FetchOutcome, FetchResult, MixedFeed,
    Validators,
};

/// Title given to mixed feeds unless configured otherwise.
pub const DEFAULT_TITLE: &str = "feedmix feed";

/// Fetches in flight per mix call unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 10;

/// What the mixer stores under each cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedFeed {
    result: FetchResult,
    #[serde(default)]
    validators: Validators,
}

/// Combines several feeds into one, through a shared cache.
#[derive(Clone)]
pub struct Mixer {
    cache: Arc<dyn CacheStore>,
    source: Arc<dyn FeedSource>,
    title: String,
    max_concurrent_fetches: usize,
    deadline: Option<Duration>,
}

impl Mixer {
    pub fn new(cache: Arc<dyn CacheStore>, source: Arc<dyn FeedSource>) -> Self {
        Self {
            cache,
            source,
            title: DEFAULT_TITLE.to_string(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            deadline: None,
        }
    }

    /// Mixer with title, concurrency cap and deadline taken from `config`.
    pub fn from_config(
        cache: Arc<dyn CacheStore>,
        source: Arc<dyn FeedSource>,
        config: &Config,
    ) -> Self {
        Self::new(cache, source)
            .with_title(config.title.clone())
            .with_max_concurrent_fetches(config.max_concurrent_fetches)
            .with_deadline(config.request_deadline())
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Cap on simultaneous fetches within one mix call (minimum 1).
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    /// Overall time budget for one mix call. Feeds still unresolved when it
    /// runs out are reported as errors and not cached.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Resolve every request, then merge.
    ///
    /// Never fails: each request contributes entries or exactly one error.
    pub async fn mix(&self, requests: &[FeedRequest], ttl: Duration) -> MixedFeed {
        // A budget too large to represent is no deadline at all
        let deadline = self
            .deadline
            .and_then(|budget| Instant::now().checked_add(budget));

        // buffer_unordered frees a slot as soon as any fetch finishes; the
        // index restores request order, which the merge tie-break relies on
        let mut resolved: Vec<(usize, FetchResult)> =
            stream::iter(requests.iter().cloned().enumerate())
                .map(|(index, request)| async move {
                    let result = match deadline {
                        Some(at) => tokio::time::timeout_at(at, self.resolve(&request, ttl))
                            .await
                            .unwrap_or_else(|_| {
                                tracing::warn!(url = %request.url, "request deadline exceeded");
                                FetchResult::failed(&request.url, "request deadline exceeded")
                            }),
                        None => self.resolve(&request, ttl).await,
                    };
                    (index, result)
                })
                .buffer_unordered(self.max_concurrent_fetches)
                .collect()
                .await;
        resolved.sort_by_key(|(index, _)| *index);

        let inputs: Vec<(FeedRequest, FetchResult)> = requests
            .iter()
            .cloned()
            .zip(resolved.into_iter().map(|(_, result)| result))
            .collect();

        let errors: Vec<FeedError> = inputs
            .iter()
            .filter_map(|(request, result)| match result {
                FetchResult::Failed(err) => Some(FeedError {
                    url: request.url.clone(),
                    message: err.message.clone(),
                }),
                FetchResult::Fetched(_) => None,
            })
            .collect();

        let entries = merge_entries(&inputs);

        tracing::info!(
            feeds = requests.len(),
            entries = entries.len(),
            errors = errors.len(),
            "Mixed feeds"
        );

        MixedFeed {
            title: self.title.clone(),
            entries,
            errors,
        }
    }

    /// pending → (cache hit | fetching) → resolved
    async fn resolve(&self, request: &FeedRequest, ttl: Duration) -> FetchResult {
        let key = cache_key(&request.url);
        let cached = self.lookup(&key).await;

        if let Some((record, payload)) = &cached {
            if record.is_fresh(Utc::now(), ttl) {
                tracing::debug!(url = %request.url, "Cache hit");
                return payload.result.clone();
            }
        }

        // Only a stale success is worth revalidating
        let validators = cached
            .as_ref()
            .map(|(_, payload)| payload)
            .filter(|payload| payload.result.is_fetched() && !payload.validators.is_empty())
            .map(|payload| &payload.validators);

        tracing::debug!(url = %request.url, conditional = validators.is_some(), "Fetching feed");

        match self.source.fetch(&request.url, validators).await {
            FetchOutcome::Complete { result, validators } => {
                let payload = CachedFeed { result, validators };
                self.store(&key, &payload).await;
                payload.result
            }
            FetchOutcome::NotModified => match cached {
                Some((_, payload)) => {
                    self.store(&key, &payload).await;
                    payload.result
                }
                None => FetchResult::failed(&request.url, "Not modified, but nothing cached"),
            },
        }
    }

    /// Cache read; any failure (storage or decoding) counts as a miss.
    async fn lookup(&self, key: &str) -> Option<(CacheRecord, CachedFeed)> {
        let record = match self.cache.get(key).await {
            Ok(record) => record?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, fetching live");
                return None;
            }
        };

        match serde_json::from_str(&record.value) {
            Ok(payload) => Some((record, payload)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache record");
                None
            }
        }
    }

    /// Cache write; failures are logged and swallowed.
    async fn store(&self, key: &str, payload: &CachedFeed) {
        let value = match serde_json::to_string(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode cache record");
                return;
            }
        };

        if let Err(e) = self.cache.put(key, &value, Utc::now()).await {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCache};
    use crate::feed::{FeedData, FeedEntry};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const HOUR: Duration = Duration::from_secs(3600);

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn entry(id: &str, d: u32) -> FeedEntry {
        FeedEntry {
            id: id.to_string(),
            title: id.to_string(),
            link: None,
            author: None,
            summary: Some(format!("summary {id}")),
            content: Some(format!("content {id}")),
            published: Some(day(d)),
            updated: None,
        }
    }

    fn feed(entries: Vec<FeedEntry>) -> FeedData {
        FeedData {
            title: "Fake".to_string(),
            link: None,
            entries,
        }
    }

    /// Scripted source that counts calls per URL.
    #[derive(Default)]
    struct FakeSource {
        feeds: HashMap<String, FeedData>,
        delays: HashMap<String, Duration>,
        honour_validators: bool,
        calls: Mutex<HashMap<String, usize>>,
        conditional_calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSource {
        fn with_feed(mut self, url: &str, data: FeedData) -> Self {
            self.feeds.insert(url.to_string(), data);
            self
        }

        fn with_delay(mut self, url: &str, delay: Duration) -> Self {
            self.delays.insert(url.to_string(), delay);
            self
        }

        fn calls(&self, url: &str) -> usize {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl FeedSource for FakeSource {
        async fn fetch(&self, url: &str, validators: Option<&Validators>) -> FetchOutcome {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(url) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if validators.is_some() {
                self.conditional_calls.fetch_add(1, Ordering::SeqCst);
                if self.honour_validators {
                    return FetchOutcome::NotModified;
                }
            }

            match self.feeds.get(url) {
                Some(data) => FetchOutcome::Complete {
                    result: FetchResult::Fetched(data.clone()),
                    validators: Validators {
                        etag: Some(format!("\"{url}\"")),
                        last_modified: None,
                    },
                },
                None => FetchOutcome::complete(FetchResult::failed(url, "Parse error: boom")),
            }
        }
    }

    /// Store whose every operation fails.
    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<CacheRecord>, CacheError> {
            Err(CacheError::Unavailable(sqlx::Error::PoolClosed))
        }

        async fn put(&self, _: &str, _: &str, _: DateTime<Utc>) -> Result<(), CacheError> {
            Err(CacheError::Unavailable(sqlx::Error::PoolClosed))
        }

        async fn prune(&self, _older_than: Duration) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable(sqlx::Error::PoolClosed))
        }
    }

    fn three_feeds() -> FakeSource {
        FakeSource::default()
            .with_feed("https://a.example/feed", feed(vec![entry("a3", 3), entry("a1", 1)]))
            .with_feed("https://c.example/feed", feed(vec![entry("c2", 2)]))
    }

    fn requests(urls: &[&str], limit: usize) -> Vec<FeedRequest> {
        FeedRequest::batch(urls.iter().copied(), limit, false)
    }

    fn ids(mixed: &MixedFeed) -> Vec<&str> {
        mixed.entries.iter().map(|e| e.id.as_str()).collect()
    }

    const URLS: [&str; 3] = [
        "https://a.example/feed",
        "https://b.example/feed",
        "https://c.example/feed",
    ];

    #[tokio::test]
    async fn test_empty_request_list() {
        let source = Arc::new(FakeSource::default());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source.clone());

        let mixed = mixer.mix(&[], HOUR).await;
        assert!(mixed.entries.is_empty());
        assert!(mixed.errors.is_empty());
        assert_eq!(mixed.title, DEFAULT_TITLE);
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source.clone());

        let mixed = mixer.mix(&requests(&URLS, 0), HOUR).await;

        assert_eq!(ids(&mixed), vec!["a3", "c2", "a1"]);
        assert_eq!(
            mixed.errors,
            vec![FeedError {
                url: URLS[1].to_string(),
                message: "Parse error: boom".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_every_feed_failing_still_returns() {
        let source = Arc::new(FakeSource::default());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source);

        let mixed = mixer.mix(&requests(&URLS, 0), HOUR).await;
        assert!(mixed.entries.is_empty());
        let urls: Vec<_> = mixed.errors.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, URLS.to_vec());
    }

    #[tokio::test]
    async fn test_within_ttl_no_refetch() {
        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source.clone());

        let first = mixer.mix(&requests(&URLS, 0), HOUR).await;
        let second = mixer.mix(&requests(&URLS, 0), HOUR).await;

        assert_eq!(first, second);
        for url in URLS {
            assert_eq!(source.calls(url), 1, "{url} fetched more than once");
        }
    }

    #[tokio::test]
    async fn test_cached_error_reused() {
        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source.clone());

        mixer.mix(&requests(&URLS, 0), HOUR).await;
        let second = mixer.mix(&requests(&URLS, 0), HOUR).await;

        assert_eq!(source.calls(URLS[1]), 1);
        assert_eq!(second.errors.len(), 1);
        assert_eq!(second.errors[0].url, URLS[1]);
    }

    #[tokio::test]
    async fn test_expired_ttl_refetches_once() {
        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source.clone());

        mixer.mix(&requests(&URLS, 0), Duration::ZERO).await;
        mixer.mix(&requests(&URLS, 0), Duration::ZERO).await;

        for url in URLS {
            assert_eq!(source.calls(url), 2);
        }
    }

    #[tokio::test]
    async fn test_stale_record_refreshed_and_rewritten() {
        let cache = MemoryCache::new();
        let stale = CachedFeed {
            result: FetchResult::Fetched(feed(vec![entry("old", 1)])),
            validators: Validators::default(),
        };
        let two_hours_ago = Utc::now() - chrono::Duration::hours(2);
        cache
            .put(
                "https://a.example/feed",
                &serde_json::to_string(&stale).unwrap(),
                two_hours_ago,
            )
            .await
            .unwrap();

        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(cache.clone()), source.clone());

        let mixed = mixer.mix(&requests(&URLS[..1], 0), HOUR).await;
        assert_eq!(ids(&mixed), vec!["a3", "a1"]);
        assert_eq!(source.calls(URLS[0]), 1);

        let record = cache.get("https://a.example/feed").await.unwrap().unwrap();
        assert!(record.fetched_at > two_hours_ago);
    }

    #[tokio::test]
    async fn test_not_modified_reuses_cached_entries() {
        let cache = MemoryCache::new();
        let stale = CachedFeed {
            result: FetchResult::Fetched(feed(vec![entry("kept", 1)])),
            validators: Validators {
                etag: Some("\"v1\"".to_string()),
                last_modified: None,
            },
        };
        let two_hours_ago = Utc::now() - chrono::Duration::hours(2);
        cache
            .put(URLS[0], &serde_json::to_string(&stale).unwrap(), two_hours_ago)
            .await
            .unwrap();

        let source = Arc::new(FakeSource {
            honour_validators: true,
            ..three_feeds()
        });
        let mixer = Mixer::new(Arc::new(cache.clone()), source.clone());

        let mixed = mixer.mix(&requests(&URLS[..1], 0), HOUR).await;
        assert_eq!(ids(&mixed), vec!["kept"]);
        assert_eq!(source.conditional_calls.load(Ordering::SeqCst), 1);

        let record = cache.get(URLS[0]).await.unwrap().unwrap();
        assert!(record.fetched_at > two_hours_ago);
    }

    #[tokio::test]
    async fn test_cache_key_is_normalized() {
        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source.clone());

        mixer.mix(&requests(&["https://a.example/feed"], 0), HOUR).await;
        let mixed = mixer
            .mix(&requests(&["HTTPS://A.EXAMPLE:443/feed"], 0), HOUR)
            .await;

        assert_eq!(mixed.entries.len(), 2);
        assert_eq!(source.calls("https://a.example/feed"), 1);
        assert_eq!(source.calls("HTTPS://A.EXAMPLE:443/feed"), 0);
    }

    #[tokio::test]
    async fn test_broken_cache_degrades_to_live_fetch() {
        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(BrokenCache), source.clone());

        let first = mixer.mix(&requests(&URLS, 0), HOUR).await;
        let second = mixer.mix(&requests(&URLS, 0), HOUR).await;

        assert_eq!(ids(&first), vec!["a3", "c2", "a1"]);
        assert_eq!(first, second);
        assert_eq!(source.calls(URLS[0]), 2);
    }

    #[tokio::test]
    async fn test_undecodable_record_is_a_miss() {
        let cache = MemoryCache::new();
        cache.put(URLS[0], "not json", Utc::now()).await.unwrap();

        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(cache), source.clone());

        let mixed = mixer.mix(&requests(&URLS[..1], 0), HOUR).await;
        assert_eq!(mixed.entries.len(), 2);
        assert_eq!(source.calls(URLS[0]), 1);
    }

    #[tokio::test]
    async fn test_per_request_options_applied_to_cached_feed() {
        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source.clone());

        let summary = mixer.mix(&requests(&URLS[..1], 1), HOUR).await;
        let full = mixer
            .mix(&[FeedRequest::new(URLS[0], 0, true)], HOUR)
            .await;

        assert_eq!(ids(&summary), vec!["a3"]);
        assert_eq!(summary.entries[0].body, "summary a3");
        assert_eq!(ids(&full), vec!["a3", "a1"]);
        assert_eq!(full.entries[0].body, "content a3");
        assert_eq!(source.calls(URLS[0]), 1);
    }

    #[tokio::test]
    async fn test_duplicate_urls_contribute_twice() {
        let source = Arc::new(three_feeds());
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source);

        let urls = [URLS[0], URLS[2], URLS[0]];
        let mixed = mixer.mix(&requests(&urls, 1), HOUR).await;
        assert_eq!(ids(&mixed), vec!["a3", "a3", "c2"]);
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let urls: Vec<String> = (0..6).map(|i| format!("https://{i}.example/feed")).collect();
        let source = urls.iter().fold(FakeSource::default(), |source, url| {
            source
                .with_feed(url, feed(vec![entry(url, 1)]))
                .with_delay(url, Duration::from_millis(20))
        });
        let source = Arc::new(source);
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), source.clone())
            .with_max_concurrent_fetches(2);

        let mixed = mixer.mix(&FeedRequest::batch(urls, 0, false), HOUR).await;

        assert_eq!(mixed.entries.len(), 6);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_deadline_reports_slow_feed_without_caching_it() {
        let cache = MemoryCache::new();
        let source = Arc::new(three_feeds().with_delay(URLS[2], Duration::from_secs(5)));
        let mixer = Mixer::new(Arc::new(cache.clone()), source)
            .with_deadline(Some(Duration::from_millis(100)));

        let mixed = mixer.mix(&requests(&[URLS[0], URLS[2]], 0), HOUR).await;

        assert_eq!(ids(&mixed), vec!["a3", "a1"]);
        assert_eq!(mixed.errors.len(), 1);
        assert_eq!(mixed.errors[0].url, URLS[2]);
        assert!(mixed.errors[0].message.contains("deadline"));
        assert!(cache.get(URLS[2]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slow_feed_does_not_hold_back_later_ones() {
        let slow = Duration::from_millis(300);
        let source = FakeSource::default()
            .with_feed(URLS[0], feed(vec![entry("slow-1", 1)]))
            .with_feed(URLS[1], feed(vec![entry("fast", 1)]))
            .with_feed(URLS[2], feed(vec![entry("slow-2", 1)]))
            .with_delay(URLS[0], slow)
            .with_delay(URLS[2], slow);
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), Arc::new(source))
            .with_max_concurrent_fetches(2);

        let started = std::time::Instant::now();
        let mixed = mixer.mix(&requests(&URLS, 0), HOUR).await;
        let elapsed = started.elapsed();

        // The third fetch starts once the fast one is done, not after the first
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
        // Equal timestamps: request order survives out-of-order completion
        assert_eq!(ids(&mixed), vec!["slow-1", "fast", "slow-2"]);
    }

    #[tokio::test]
    async fn test_huge_deadline_means_no_deadline() {
        let config = Config {
            request_deadline_secs: u64::MAX,
            ..Config::default()
        };
        let mixer = Mixer::from_config(
            Arc::new(MemoryCache::new()),
            Arc::new(three_feeds()),
            &config,
        );

        let mixed = mixer.mix(&requests(&URLS, 0), HOUR).await;
        assert_eq!(ids(&mixed), vec!["a3", "c2", "a1"]);
        assert_eq!(mixed.errors.len(), 1);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_mix_future_is_send() {
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), Arc::new(three_feeds()));
        let batch = requests(&URLS, 0);

        let future = mixer.mix(&batch, HOUR);
        assert_send(&future);
        future.await;

        // Spawning needs Send for any borrow lifetime, as axum handlers do
        let spawned = tokio::spawn(async move { mixer.mix(&batch, HOUR).await })
            .await
            .unwrap();
        assert_eq!(spawned.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = Config {
            title: "Configured".to_string(),
            max_concurrent_fetches: 0,
            request_deadline_secs: 7,
            ..Config::default()
        };
        let mixer = Mixer::from_config(
            Arc::new(MemoryCache::new()),
            Arc::new(FakeSource::default()),
            &config,
        );
        assert_eq!(mixer.title, "Configured");
        assert_eq!(mixer.max_concurrent_fetches, 1);
        assert_eq!(mixer.deadline, Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_custom_title() {
        let mixer = Mixer::new(Arc::new(MemoryCache::new()), Arc::new(FakeSource::default()))
            .with_title("My mix");
        assert_eq!(mixer.mix(&[], HOUR).await.title, "My mix");
    }
}
