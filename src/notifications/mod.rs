pub mod models;
pub mod store;

pub use models::{NotificationFeedState, NotificationRecord, Severity, SeverityCounts};
pub use store::NotificationStore;
