//! Data synchronization and alert derivation for the factory analytics dashboard.

pub mod alerting;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod models;
pub mod notifications;
pub mod summary;
pub mod sync;
pub mod version;

pub use config::DashboardConfig;
pub use dashboard::{DashboardError, DashboardSession, DashboardSnapshot, FeedView};
pub use models::{Feed, FeedPayload};
