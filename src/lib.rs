//! Listen statistics: per-listener top recordings and popularity ranking
//! of entities for display.

pub mod aggregate;
pub mod error;
pub mod models;
pub mod normalize;
pub mod payload;
pub mod progress;
pub mod ranking;
pub mod safety;
pub mod store;

pub use aggregate::{compute_user_top_recordings, compute_with_stats, UserStatsIter};
pub use error::{Result, StatsError};
pub use ranking::{rank_entities_by_popularity, top_entity};
