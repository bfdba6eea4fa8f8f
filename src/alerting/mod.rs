pub mod derivation;

pub use derivation::{classify, derive_notifications, derive_notifications_now};
