pub mod error;
pub mod fetcher;

pub use error::{Endpoint, FetchError};
pub use fetcher::{FeedSource, HttpFetcher};
