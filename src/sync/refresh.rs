use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::synchronizer::{FeedSynchronizer, SyncOutcome};
use crate::client::FetchError;
use crate::models::Feed;

/// Token for one in-flight manual refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshCycle {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing { cycle: RefreshCycle },
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub cycle: RefreshCycle,
    pub recompute: Result<(), FetchError>,
    pub feeds: Vec<(Feed, SyncOutcome)>,
    /// Notifications published by the final derivation, if a machine health
    /// payload was available.
    pub notifications: Option<usize>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Completed(RefreshReport),
    /// Another refresh was already running; this trigger was dropped.
    Collapsed { in_flight: RefreshCycle },
}

/// Manual "refresh now" entry point.
///
/// `Idle -> Refreshing` on a trigger; triggers while refreshing are no-ops.
/// A cycle asks the backend to recompute, re-fetches every feed whether or
/// not that succeeded, re-derives notifications, then returns to `Idle`.
pub struct RefreshCoordinator {
    sync: Arc<FeedSynchronizer>,
    state: Arc<watch::Sender<RefreshState>>,
}

/// Returns the coordinator to `Idle` when dropped, however the cycle ended.
struct CycleGuard {
    state: Arc<watch::Sender<RefreshState>>,
    cycle: RefreshCycle,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.state.send_replace(RefreshState::Idle);
    }
}

impl RefreshCoordinator {
    pub fn new(sync: Arc<FeedSynchronizer>) -> Self {
        let (state, _) = watch::channel(RefreshState::Idle);
        Self {
            sync,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.state(), RefreshState::Refreshing { .. })
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state.subscribe()
    }

    /// Runs a refresh cycle to completion, or returns immediately if one is
    /// already in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        match self.try_begin() {
            Ok(guard) => RefreshOutcome::Completed(run_cycle(&self.sync, guard).await),
            Err(in_flight) => RefreshOutcome::Collapsed { in_flight },
        }
    }

    /// Starts a refresh cycle in the background. Returns `false` if one was
    /// already running.
    pub fn request(&self) -> bool {
        match self.try_begin() {
            Ok(guard) => {
                let sync = self.sync.clone();
                tokio::spawn(async move {
                    run_cycle(&sync, guard).await;
                });
                true
            }
            Err(_) => false,
        }
    }

    fn try_begin(&self) -> Result<CycleGuard, RefreshCycle> {
        let candidate = RefreshCycle {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        let mut in_flight = None;
        let started = self.state.send_if_modified(|state| match state {
            RefreshState::Idle => {
                *state = RefreshState::Refreshing { cycle: candidate };
                true
            }
            RefreshState::Refreshing { cycle } => {
                in_flight = Some(*cycle);
                false
            }
        });

        if started {
            info!(cycle = %candidate.id, "Manual refresh started.");
            Ok(CycleGuard {
                state: self.state.clone(),
                cycle: candidate,
            })
        } else {
            let in_flight = in_flight.unwrap_or(candidate);
            info!(cycle = %in_flight.id, "Refresh already in progress; trigger collapsed.");
            Err(in_flight)
        }
    }
}

async fn run_cycle(sync: &FeedSynchronizer, guard: CycleGuard) -> RefreshReport {
    let cycle = guard.cycle;

    let recompute = sync.source().request_recompute().await;
    if let Err(e) = &recompute {
        warn!(cycle = %cycle.id, error = %e, "Backend recompute failed; refreshing feeds anyway.");
    }

    let feeds = sync.sync_all().await;
    let notifications = sync.rederive_notifications();
    let applied = feeds.iter().filter(|(_, outcome)| outcome.is_applied()).count();

    let report = RefreshReport {
        cycle,
        recompute,
        feeds,
        notifications,
        finished_at: Utc::now(),
    };
    drop(guard);

    info!(
        cycle = %cycle.id,
        applied,
        total = report.feeds.len(),
        notifications = ?report.notifications,
        "Manual refresh finished."
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Endpoint;
    use crate::notifications::NotificationStore;
    use crate::sync::cache::ViewStateCache;
    use crate::sync::testing::{ScriptedSource, health_payload};

    fn coordinator(
        source: Arc<ScriptedSource>,
    ) -> (Arc<RefreshCoordinator>, Arc<FeedSynchronizer>) {
        let sync = Arc::new(FeedSynchronizer::new(
            source,
            Arc::new(ViewStateCache::new()),
            Arc::new(NotificationStore::new()),
        ));
        (Arc::new(RefreshCoordinator::new(sync.clone())), sync)
    }

    #[tokio::test]
    async fn test_refresh_fetches_every_feed_and_returns_idle() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(Feed::MachineHealth, Ok(health_payload(&[("M1", 60.0, 0.6)])));
        let (coordinator, _) = coordinator(source.clone());

        let outcome = coordinator.refresh().await;
        let report = match outcome {
            RefreshOutcome::Completed(report) => report,
            other => panic!("expected completed refresh, got {other:?}"),
        };

        assert!(report.recompute.is_ok());
        assert_eq!(report.feeds.len(), Feed::ALL.len());
        assert!(report.feeds.iter().all(|(_, outcome)| outcome.is_applied()));
        assert_eq!(report.notifications, Some(1));
        assert_eq!(source.recompute_calls(), 1);
        for feed in Feed::ALL {
            assert_eq!(source.fetch_calls(feed), 1);
        }
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_overlapping_triggers_collapse_into_one_cycle() {
        let source = Arc::new(ScriptedSource::new());
        let release = source.hold_recompute();
        let (coordinator, _) = coordinator(source.clone());

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }

        let in_flight = match coordinator.state() {
            RefreshState::Refreshing { cycle } => cycle,
            RefreshState::Idle => unreachable!(),
        };
        match coordinator.refresh().await {
            RefreshOutcome::Collapsed { in_flight: cycle } => assert_eq!(cycle, in_flight),
            other => panic!("expected collapsed trigger, got {other:?}"),
        }
        assert!(!coordinator.request());

        release.send(()).unwrap();
        assert!(matches!(first.await.unwrap(), RefreshOutcome::Completed(_)));

        assert_eq!(source.recompute_calls(), 1);
        for feed in Feed::ALL {
            assert_eq!(source.fetch_calls(feed), 1, "feed {feed}");
        }
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_failed_recompute_still_refetches() {
        let source = Arc::new(ScriptedSource::new());
        source.fail_recompute(FetchError::Status {
            endpoint: Endpoint::RefreshData,
            status: 500,
        });
        let (coordinator, sync) = coordinator(source.clone());

        let RefreshOutcome::Completed(report) = coordinator.refresh().await else {
            panic!("refresh should run");
        };
        assert!(report.recompute.is_err());
        assert_eq!(source.fetch_calls(Feed::Statistics), 1);
        assert!(sync.cache().get(Feed::Statistics).is_some());
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_refresh_after_clear_repopulates_from_last_good_payload() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(Feed::MachineHealth, Ok(health_payload(&[("M9", 45.0, 0.75)])));
        let (coordinator, sync) = coordinator(source.clone());
        coordinator.refresh().await;

        sync.notifications().clear();
        source.respond(
            Feed::MachineHealth,
            Err(ScriptedSource::network_error(Feed::MachineHealth)),
        );
        let RefreshOutcome::Completed(report) = coordinator.refresh().await else {
            panic!("refresh should run");
        };

        assert_eq!(report.notifications, Some(1));
        let state = sync.notifications().snapshot();
        assert_eq!(state.records[0].machine_id, "M9");
    }

    #[tokio::test]
    async fn test_cycle_outliving_close_does_not_touch_store() {
        let source = Arc::new(ScriptedSource::new());
        source.respond(Feed::MachineHealth, Ok(health_payload(&[("M1", 80.0, 0.9)])));
        let (coordinator, sync) = coordinator(source.clone());
        sync.sync_feed(Feed::MachineHealth).await;
        sync.notifications().clear();
        let mut changes = sync.notifications().subscribe();

        let release = source.hold_recompute();
        assert!(coordinator.request());
        while source.recompute_calls() == 0 {
            tokio::task::yield_now().await;
        }

        sync.close();
        release.send(()).unwrap();
        while coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }

        assert!(!changes.has_changed().unwrap());
        assert_eq!(sync.notifications().count(), 0);
        assert_eq!(sync.cache().applied_sequence(Feed::MachineHealth), 1);
    }

    #[tokio::test]
    async fn test_background_request_publishes_state_changes() {
        let source = Arc::new(ScriptedSource::new());
        let (coordinator, _) = coordinator(source.clone());
        let mut states = coordinator.subscribe();

        assert!(coordinator.request());
        states.changed().await.unwrap();
        if matches!(*states.borrow_and_update(), RefreshState::Refreshing { .. }) {
            states.changed().await.unwrap();
        }
        assert_eq!(*states.borrow(), RefreshState::Idle);
        assert_eq!(source.recompute_calls(), 1);
    }
}
