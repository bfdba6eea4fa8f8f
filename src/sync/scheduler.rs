use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::synchronizer::FeedSynchronizer;
use crate::models::Feed;

/// How one feed is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSchedule {
    pub feed: Feed,
    /// `None` fetches once on start and then only on manual refresh.
    pub interval: Option<Duration>,
}

/// Owns one repeating timer per feed.
///
/// Every feed is fetched immediately on start, then on its own interval.
/// Each tick spawns its fetch as a separate task, so a slow or failing feed
/// never delays another feed or its own next tick.
pub struct PollingScheduler {
    shutdown_tx: watch::Sender<()>,
    timers: Vec<(Feed, JoinHandle<()>)>,
}

impl PollingScheduler {
    pub fn start(sync: Arc<FeedSynchronizer>, schedules: &[FeedSchedule]) -> Self {
        let (shutdown_tx, _) = watch::channel(());
        let mut timers = Vec::with_capacity(schedules.len());

        for schedule in schedules {
            let feed = schedule.feed;
            // A zero period cannot drive a timer; such feeds are fetched once.
            match schedule.interval.filter(|period| !period.is_zero()) {
                Some(period) => {
                    let handle = tokio::spawn(poll_loop(
                        sync.clone(),
                        feed,
                        period,
                        shutdown_tx.subscribe(),
                    ));
                    timers.push((feed, handle));
                }
                None => {
                    debug!(%feed, "Feed has no polling interval; fetching once.");
                    spawn_fetch(sync.clone(), feed);
                }
            }
        }

        info!(feeds = schedules.len(), "Polling scheduler started.");
        Self {
            shutdown_tx,
            timers,
        }
    }

    pub fn feeds(&self) -> impl Iterator<Item = Feed> + '_ {
        self.timers.iter().map(|(feed, _)| *feed)
    }

    /// Cancels every timer and waits for the timer tasks to exit.
    /// Fetches already in flight are left to finish on their own.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("All polling timers had already stopped.");
        }
        for (feed, handle) in self.timers {
            if let Err(e) = handle.await {
                warn!(%feed, error = %e, "Polling timer task ended abnormally.");
            }
        }
        info!("Polling scheduler stopped.");
    }
}

async fn poll_loop(
    sync: Arc<FeedSynchronizer>,
    feed: Feed,
    period: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(%feed, period_ms = period.as_millis() as u64, "Polling timer armed.");

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!(%feed, "Polling timer received shutdown signal.");
                break;
            }
            _ = interval.tick() => {
                spawn_fetch(sync.clone(), feed);
            }
        }
    }
}

fn spawn_fetch(sync: Arc<FeedSynchronizer>, feed: Feed) {
    tokio::spawn(async move {
        let outcome = sync.sync_feed(feed).await;
        debug!(%feed, ?outcome, "Scheduled fetch finished.");
    });
}
