use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::models::{Feed, FeedPayload};

/// Last successfully applied payload for one feed.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub payload: Arc<FeedPayload>,
    pub fetched_at: DateTime<Utc>,
    /// Sequence number of the request that produced this payload.
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { sequence: u64 },
    /// A request issued later has already been applied.
    Superseded { sequence: u64, current: u64 },
}

/// Per-feed store of the last good payload.
///
/// Holds only complete, successfully decoded payloads; failures never touch
/// it. Requests are numbered per feed when issued and a response is applied
/// only if its number is higher than the one currently applied.
#[derive(Debug, Default)]
pub struct ViewStateCache {
    entries: DashMap<Feed, FeedSnapshot>,
    issued: DashMap<Feed, AtomicU64>,
}

impl ViewStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next sequence number for a request on `feed`.
    pub fn issue_sequence(&self, feed: Feed) -> u64 {
        self.issued
            .entry(feed)
            .or_default()
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    pub fn apply(&self, feed: Feed, sequence: u64, payload: FeedPayload) -> ApplyOutcome {
        self.apply_with(feed, sequence, payload, |_| {})
    }

    /// Applies `payload` if `sequence` is newer than the applied one, then runs
    /// `on_applied` while the feed's entry is still locked, so work derived from
    /// the payload is ordered the same way as the payloads themselves.
    pub fn apply_with<F>(
        &self,
        feed: Feed,
        sequence: u64,
        payload: FeedPayload,
        on_applied: F,
    ) -> ApplyOutcome
    where
        F: FnOnce(&FeedPayload),
    {
        match self.entries.entry(feed) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().sequence;
                if sequence <= current {
                    debug!(%feed, sequence, current, "Discarding superseded response.");
                    return ApplyOutcome::Superseded { sequence, current };
                }
                entry.insert(FeedSnapshot {
                    payload: Arc::new(payload),
                    fetched_at: Utc::now(),
                    sequence,
                });
                on_applied(&entry.get().payload);
            }
            Entry::Vacant(entry) => {
                let entry = entry.insert(FeedSnapshot {
                    payload: Arc::new(payload),
                    fetched_at: Utc::now(),
                    sequence,
                });
                on_applied(&entry.payload);
            }
        }
        debug!(%feed, sequence, "Applied feed payload.");
        ApplyOutcome::Applied { sequence }
    }

    pub fn get(&self, feed: Feed) -> Option<FeedSnapshot> {
        self.entries.get(&feed).map(|entry| entry.value().clone())
    }

    /// Runs `f` against the current snapshot of `feed` while holding its entry,
    /// excluding concurrent applies for the same feed.
    pub fn inspect<R>(&self, feed: Feed, f: impl FnOnce(&FeedSnapshot) -> R) -> Option<R> {
        self.entries.get(&feed).map(|entry| f(entry.value()))
    }

    pub fn fetched_at(&self, feed: Feed) -> Option<DateTime<Utc>> {
        self.entries.get(&feed).map(|entry| entry.fetched_at)
    }

    /// Runs `f` with the applied sequence of `feed` while holding the feed's
    /// entry, so no apply can land until `f` returns.
    pub fn with_applied_sequence<R>(&self, feed: Feed, f: impl FnOnce(u64) -> R) -> R {
        match self.entries.entry(feed) {
            Entry::Occupied(entry) => f(entry.get().sequence),
            Entry::Vacant(_entry) => f(0),
        }
    }

    pub fn applied_sequence(&self, feed: Feed) -> u64 {
        self.entries.get(&feed).map(|entry| entry.sequence).unwrap_or(0)
    }
}
