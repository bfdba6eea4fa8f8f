use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::cache::{ApplyOutcome, ViewStateCache};
use crate::alerting::derive_notifications_now;
use crate::client::{Endpoint, FeedSource, FetchError};
use crate::models::{Feed, FeedPayload};
use crate::notifications::NotificationStore;

/// Fetch health of one feed, kept beside the cache rather than in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedStatus {
    pub last_error: Option<FetchError>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Sequence of the request behind `last_error`; 0 when there is none.
    pub last_error_sequence: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Applied { sequence: u64 },
    Superseded { sequence: u64, current: u64 },
    Failed { sequence: u64, error: FetchError },
    /// Completed after the synchronizer was closed; nothing was written.
    Discarded { sequence: u64 },
}

impl SyncOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied { .. })
    }
}

/// Runs one fetch for a feed and applies the result: the shared step behind
/// both periodic polling and manual refresh.
pub struct FeedSynchronizer {
    source: Arc<dyn FeedSource>,
    cache: Arc<ViewStateCache>,
    notifications: Arc<NotificationStore>,
    status: DashMap<Feed, FeedStatus>,
    closed: AtomicBool,
}

impl FeedSynchronizer {
    pub fn new(
        source: Arc<dyn FeedSource>,
        cache: Arc<ViewStateCache>,
        notifications: Arc<NotificationStore>,
    ) -> Self {
        Self {
            source,
            cache,
            notifications,
            status: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &Arc<dyn FeedSource> {
        &self.source
    }

    pub fn cache(&self) -> &Arc<ViewStateCache> {
        &self.cache
    }

    pub fn notifications(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    pub async fn sync_feed(&self, feed: Feed) -> SyncOutcome {
        let sequence = self.cache.issue_sequence(feed);
        let result = self.source.fetch_feed(feed).await;

        if self.is_closed() {
            debug!(%feed, sequence, "Dropping response received after shutdown.");
            return SyncOutcome::Discarded { sequence };
        }

        let result = result.and_then(|payload| {
            if payload.feed() == feed {
                Ok(payload)
            } else {
                Err(FetchError::Decode {
                    endpoint: Endpoint::Feed(feed),
                    message: format!("expected {feed} payload, got {}", payload.feed()),
                })
            }
        });

        match result {
            Ok(payload) => {
                let outcome = self.cache.apply_with(feed, sequence, payload, |applied| {
                    // Still under the feed's entry lock. A failure of a newer
                    // request stays recorded.
                    self.status.remove_if(&feed, |_, status| status.last_error_sequence < sequence);
                    self.on_payload_applied(feed, applied)
                });
                match outcome {
                    ApplyOutcome::Applied { sequence } => SyncOutcome::Applied { sequence },
                    ApplyOutcome::Superseded { sequence, current } => {
                        SyncOutcome::Superseded { sequence, current }
                    }
                }
            }
            Err(error) => {
                warn!(
                    %feed,
                    sequence,
                    error = %error,
                    "Feed fetch failed; keeping last good payload."
                );
                self.record_failure(feed, sequence, &error);
                SyncOutcome::Failed { sequence, error }
            }
        }
    }

    /// Fetches every feed once, concurrently.
    pub async fn sync_all(&self) -> Vec<(Feed, SyncOutcome)> {
        join_all(
            Feed::ALL
                .iter()
                .map(|&feed| async move { (feed, self.sync_feed(feed).await) }),
        )
        .await
    }

    /// Re-derives notifications from the cached `machine_health` payload.
    /// Returns the number of records published, or `None` if nothing is
    /// cached yet or the synchronizer is closed.
    pub fn rederive_notifications(&self) -> Option<usize> {
        if self.is_closed() {
            debug!("Synchronizer closed; skipping notification derivation.");
            return None;
        }
        self.cache.inspect(Feed::MachineHealth, |snapshot| {
            let records = snapshot
                .payload
                .machines()
                .map(derive_notifications_now)
                .unwrap_or_default();
            let count = records.len();
            self.notifications.replace(records);
            count
        })
    }

    pub fn status(&self, feed: Feed) -> FeedStatus {
        self.status
            .get(&feed)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Stops applying results; fetches still in flight are dropped on completion.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn on_payload_applied(&self, feed: Feed, payload: &FeedPayload) {
        if feed != Feed::MachineHealth || self.is_closed() {
            return;
        }
        if let Some(machines) = payload.machines() {
            let records = derive_notifications_now(machines);
            debug!(count = records.len(), "Derived notifications from machine health.");
            self.notifications.replace(records);
        }
    }

    fn record_failure(&self, feed: Feed, sequence: u64, error: &FetchError) {
        // A failure older than the applied payload says nothing about current data.
        self.cache.with_applied_sequence(feed, |applied| {
            if sequence <= applied {
                return;
            }
            let mut status = self.status.entry(feed).or_default();
            status.last_error = Some(error.clone());
            status.last_error_at = Some(Utc::now());
            status.last_error_sequence = status.last_error_sequence.max(sequence);
            status.consecutive_failures += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Severity;
    use crate::sync::testing::{ScriptedSource, health_payload, stats_payload};

    fn synchronizer(source: Arc<ScriptedSource>) -> Arc<FeedSynchronizer> {
        Arc::new(FeedSynchronizer::new(
            source,
            Arc::new(ViewStateCache::new()),
            Arc::new(NotificationStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_applied_machine_health_derives_notifications() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(
            Feed::MachineHealth,
            Ok(health_payload(&[("M1", 60.0, 0.6), ("M2", 95.0, 0.05)])),
        );
        let sync = synchronizer(source);

        let outcome = sync.sync_feed(Feed::MachineHealth).await;
        assert_eq!(outcome, SyncOutcome::Applied { sequence: 1 });

        let state = sync.notifications().snapshot();
        assert_eq!(state.count, 1);
        assert_eq!(state.records[0].machine_id, "M1");
        assert_eq!(state.records[0].severity, Severity::Critical);
        assert!(state.records[0].message.contains("60.0%"));
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_payload() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(Feed::Statistics, Ok(stats_payload(12)));
        let sync = synchronizer(source.clone());
        assert!(sync.sync_feed(Feed::Statistics).await.is_applied());
        let fetched_at = sync.cache().fetched_at(Feed::Statistics);

        source.respond(Feed::Statistics, Err(ScriptedSource::network_error(Feed::Statistics)));
        for _ in 0..3 {
            let outcome = sync.sync_feed(Feed::Statistics).await;
            assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        }

        let snapshot = sync.cache().get(Feed::Statistics).unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(Some(snapshot.fetched_at), fetched_at);
        let status = sync.status(Feed::Statistics);
        assert_eq!(status.consecutive_failures, 3);
        assert!(status.last_error.is_some());

        source.respond(Feed::Statistics, Ok(stats_payload(13)));
        assert!(sync.sync_feed(Feed::Statistics).await.is_applied());
        assert_eq!(sync.status(Feed::Statistics), FeedStatus::default());
    }

    #[tokio::test]
    async fn test_overlapping_requests_apply_newest_only() {
        let source = Arc::new(ScriptedSource::new());
        source.hold(Feed::Statistics);
        let sync = synchronizer(source.clone());

        let older = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_feed(Feed::Statistics).await }
        });
        source.wait_for_pending(1).await;
        let newer = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_feed(Feed::Statistics).await }
        });
        source.wait_for_pending(2).await;

        // Newer request completes first, then the older one straggles in.
        source.release(1, Ok(stats_payload(2)));
        assert_eq!(newer.await.unwrap(), SyncOutcome::Applied { sequence: 2 });
        source.release(0, Ok(stats_payload(1)));
        assert_eq!(
            older.await.unwrap(),
            SyncOutcome::Superseded {
                sequence: 1,
                current: 2
            }
        );

        let snapshot = sync.cache().get(Feed::Statistics).unwrap();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(*snapshot.payload, stats_payload(2));
    }

    #[tokio::test]
    async fn test_stale_failure_does_not_mark_fresh_feed() {
        let source = Arc::new(ScriptedSource::new());
        source.hold(Feed::Statistics);
        let sync = synchronizer(source.clone());

        let older = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_feed(Feed::Statistics).await }
        });
        source.wait_for_pending(1).await;
        let newer = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_feed(Feed::Statistics).await }
        });
        source.wait_for_pending(2).await;

        source.release(1, Ok(stats_payload(5)));
        newer.await.unwrap();
        source.release(0, Err(ScriptedSource::network_error(Feed::Statistics)));
        older.await.unwrap();

        assert_eq!(sync.status(Feed::Statistics).consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_closed_synchronizer_discards_results() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(Feed::Yield, Ok(crate::sync::testing::yield_payload(80.0)));
        let sync = synchronizer(source);
        sync.close();

        let outcome = sync.sync_feed(Feed::Yield).await;
        assert_eq!(outcome, SyncOutcome::Discarded { sequence: 1 });
        assert!(sync.cache().get(Feed::Yield).is_none());
    }

    #[tokio::test]
    async fn test_mismatched_payload_is_decode_failure() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(Feed::Anomaly, Ok(stats_payload(3)));
        let sync = synchronizer(source);

        let outcome = sync.sync_feed(Feed::Anomaly).await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed {
                error: FetchError::Decode { .. },
                ..
            }
        ));
        assert!(sync.cache().get(Feed::Anomaly).is_none());
    }

    #[tokio::test]
    async fn test_closed_synchronizer_leaves_store_untouched() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(Feed::MachineHealth, Ok(health_payload(&[("M1", 80.0, 0.9)])));
        let sync = synchronizer(source);
        sync.sync_feed(Feed::MachineHealth).await;
        sync.notifications().clear();

        sync.close();
        assert_eq!(sync.rederive_notifications(), None);
        assert_eq!(sync.notifications().count(), 0);
    }

    #[tokio::test]
    async fn test_success_does_not_reset_newer_failure() {
        let source = Arc::new(ScriptedSource::new());
        source.hold(Feed::Statistics);
        let sync = synchronizer(source.clone());

        let older = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_feed(Feed::Statistics).await }
        });
        source.wait_for_pending(1).await;
        let newer = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_feed(Feed::Statistics).await }
        });
        source.wait_for_pending(2).await;

        // The newer request fails first; the older success then lands.
        source.release(1, Err(ScriptedSource::network_error(Feed::Statistics)));
        newer.await.unwrap();
        source.release(0, Ok(stats_payload(7)));
        assert!(older.await.unwrap().is_applied());

        assert_eq!(sync.cache().applied_sequence(Feed::Statistics), 1);
        let status = sync.status(Feed::Statistics);
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.last_error_sequence, 2);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_rederive_repopulates_after_clear() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(
            Feed::MachineHealth,
            Ok(health_payload(&[("M1", 70.0, 0.4), ("M2", 50.0, 0.8)])),
        );
        let sync = synchronizer(source);
        assert_eq!(sync.rederive_notifications(), None);

        sync.sync_feed(Feed::MachineHealth).await;
        sync.notifications().clear();
        assert_eq!(sync.notifications().count(), 0);

        assert_eq!(sync.rederive_notifications(), Some(2));
        assert_eq!(sync.notifications().count(), 2);
    }
}
