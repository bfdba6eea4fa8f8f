pub mod cache;
pub mod refresh;
pub mod scheduler;
pub mod synchronizer;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{ApplyOutcome, FeedSnapshot, ViewStateCache};
pub use refresh::{RefreshCoordinator, RefreshCycle, RefreshOutcome, RefreshReport, RefreshState};
pub use scheduler::{FeedSchedule, PollingScheduler};
pub use synchronizer::{FeedStatus, FeedSynchronizer, SyncOutcome};
