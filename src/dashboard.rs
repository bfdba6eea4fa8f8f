use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::client::{FeedSource, FetchError, HttpFetcher};
use crate::config::{ConfigError, DashboardConfig};
use crate::models::{Feed, FeedPayload};
use crate::notifications::{NotificationFeedState, NotificationStore};
use crate::summary::{Freshness, freshness};
use crate::sync::{
    FeedSchedule, FeedStatus, FeedSynchronizer, PollingScheduler, RefreshCoordinator,
    RefreshOutcome, RefreshState, SyncOutcome, ViewStateCache,
};

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build API client: {0}")]
    Client(#[from] FetchError),
}

/// What presentation gets for one feed: the last good payload, if any, and
/// enough about recent fetches to tell whether it is current.
#[derive(Debug, Clone, Serialize)]
pub struct FeedView {
    pub feed: Feed,
    pub payload: Option<Arc<FeedPayload>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub sequence: u64,
    pub freshness: Freshness,
    pub status: FeedStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub taken_at: DateTime<Utc>,
    pub feeds: Vec<FeedView>,
    pub notifications: Arc<NotificationFeedState>,
    pub refresh: RefreshState,
}

impl DashboardSnapshot {
    pub fn feed(&self, feed: Feed) -> Option<&FeedView> {
        self.feeds.iter().find(|view| view.feed == feed)
    }

    pub fn payload(&self, feed: Feed) -> Option<&FeedPayload> {
        self.feed(feed)?.payload.as_deref()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.refresh, RefreshState::Refreshing { .. })
    }
}

/// One running dashboard: the stores, the polling timers and the manual
/// refresh entry point, wired to a single feed source.
pub struct DashboardSession {
    sync: Arc<FeedSynchronizer>,
    coordinator: RefreshCoordinator,
    schedules: Vec<FeedSchedule>,
    scheduler: Option<PollingScheduler>,
    /// Freshness period for feeds that are not polled.
    fallback_period: Duration,
}

impl DashboardSession {
    /// Connects to the configured API and starts polling every feed.
    pub fn start(config: &DashboardConfig) -> Result<Self, DashboardError> {
        let source = HttpFetcher::new(config.api_url.clone(), config.request_timeout())?;
        info!(api_url = %source.base_url(), "Using analytics API.");
        Ok(Self::start_with_source(config, Arc::new(source)))
    }

    pub fn start_with_source(config: &DashboardConfig, source: Arc<dyn FeedSource>) -> Self {
        let mut session = Self::connect(config, source);
        session.start_polling();
        session
    }

    /// Builds the session without arming any timers.
    pub fn connect(config: &DashboardConfig, source: Arc<dyn FeedSource>) -> Self {
        let sync = Arc::new(FeedSynchronizer::new(
            source,
            Arc::new(ViewStateCache::new()),
            Arc::new(NotificationStore::new()),
        ));
        let schedules = Feed::ALL
            .iter()
            .map(|&feed| FeedSchedule {
                feed,
                interval: feed.poll_interval(config),
            })
            .collect();

        Self {
            coordinator: RefreshCoordinator::new(sync.clone()),
            sync,
            schedules,
            scheduler: None,
            fallback_period: Duration::from_millis(config.slow_poll_interval_ms),
        }
    }

    /// Performs the cold-start fetch of every feed and arms the timers.
    /// Does nothing if polling is already running.
    pub fn start_polling(&mut self) {
        if self.scheduler.is_none() {
            self.scheduler = Some(PollingScheduler::start(self.sync.clone(), &self.schedules));
        }
    }

    /// Fetches every feed once and waits for the results.
    pub async fn sync_now(&self) -> Vec<(Feed, SyncOutcome)> {
        self.sync.sync_all().await
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.coordinator.refresh().await
    }

    /// Starts a manual refresh in the background; `false` if one is running.
    pub fn request_refresh(&self) -> bool {
        self.coordinator.request()
    }

    pub fn refresh_state(&self) -> watch::Receiver<RefreshState> {
        self.coordinator.subscribe()
    }

    pub fn clear_notifications(&self) {
        self.sync.notifications().clear();
    }

    pub fn notifications(&self) -> Arc<NotificationFeedState> {
        self.sync.notifications().snapshot()
    }

    pub fn subscribe_notifications(&self) -> watch::Receiver<Arc<NotificationFeedState>> {
        self.sync.notifications().subscribe()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let now = Utc::now();
        let cache = self.sync.cache();
        let feeds = self
            .schedules
            .iter()
            .map(|schedule| {
                let cached = cache.get(schedule.feed);
                let fetched_at = cached.as_ref().map(|s| s.fetched_at);
                let period = schedule.interval.unwrap_or(self.fallback_period);
                FeedView {
                    feed: schedule.feed,
                    freshness: freshness(fetched_at, period, now),
                    sequence: cached.as_ref().map(|s| s.sequence).unwrap_or(0),
                    payload: cached.map(|s| s.payload),
                    fetched_at,
                    status: self.sync.status(schedule.feed),
                }
            })
            .collect();

        DashboardSnapshot {
            taken_at: now,
            feeds,
            notifications: self.notifications(),
            refresh: self.coordinator.state(),
        }
    }

    /// Cancels polling, then stops applying any fetch still in flight.
    pub async fn shutdown(self) {
        if let Some(scheduler) = self.scheduler {
            scheduler.shutdown().await;
        }
        self.sync.close();
        info!("Dashboard session closed.");
    }
}
