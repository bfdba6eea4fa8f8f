use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::models::{NotificationFeedState, NotificationRecord};

/// Holds the current notification list.
///
/// Every mutation publishes a complete new state, so a reader either sees the
/// list before a replace or after it, never a mix.
#[derive(Debug)]
pub struct NotificationStore {
    state: watch::Sender<Arc<NotificationFeedState>>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(NotificationFeedState::default()));
        Self { state }
    }

    /// Swaps in `records` as the whole list; the count follows the new length.
    pub fn replace(&self, records: Vec<NotificationRecord>) {
        let next = NotificationFeedState::new(records, Utc::now());
        debug!(count = next.count, "Replacing notification list.");
        self.state.send_replace(Arc::new(next));
    }

    /// Empties the list. The next `replace` overwrites this unconditionally.
    pub fn clear(&self) {
        debug!("Clearing notification list.");
        self.state
            .send_replace(Arc::new(NotificationFeedState::new(Vec::new(), Utc::now())));
    }

    pub fn snapshot(&self) -> Arc<NotificationFeedState> {
        self.state.borrow().clone()
    }

    pub fn count(&self) -> usize {
        self.state.borrow().count
    }

    /// Receiver that is notified each time the list is replaced or cleared.
    pub fn subscribe(&self) -> watch::Receiver<Arc<NotificationFeedState>> {
        self.state.subscribe()
    }
}
