pub mod aggregator;
pub mod bar;
pub mod feed;

// Re-export the core data types for convenient access (e.g. `use crate::market_data::Bar`).
pub use aggregator::{BucketMode, CandleAggregator};
pub use bar::{Bar, Quote, Tick};
pub use feed::{FeedEvent, History};
