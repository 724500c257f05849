use std::cmp::Reverse;

use super::types::{Entry, FeedRequest, FetchResult};

/// Merge the successful results into one sequence, newest first.
///
/// Each feed contributes at most its request's `entry_limit` entries (0 = all),
/// taken from the front of the feed before anything is combined. The
/// concatenation (request order, then feed order) is stable-sorted by
/// effective timestamp descending; entries without any timestamp go last.
/// Failed results are skipped and duplicate ids are kept.
pub fn merge_entries(inputs: &[(FeedRequest, FetchResult)]) -> Vec<Entry> {
    let mut merged: Vec<Entry> = inputs
        .iter()
        .filter_map(|(request, result)| match result {
            FetchResult::Fetched(feed) => Some((request, feed)),
            FetchResult::Failed(_) => None,
        })
        .flat_map(|(request, feed)| {
            let take = match request.entry_limit {
                0 => feed.entries.len(),
                n => n,
            };
            feed.entries.iter().take(take).map(move |entry| {
                Entry::from_feed_entry(entry, &request.url, request.prefer_full_content)
            })
        })
        .collect();

    // slice::sort_by_key is stable; Option orders None first, so Reverse puts it last
    merged.sort_by_key(|entry| Reverse(entry.effective_timestamp()));
    merged
}
