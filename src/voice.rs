//! Voice profile evolution.
//!
//! Users edit generated drafts; each edit is stored, diffed into a style
//! delta, and merged into the user's profile by a debounced, rate-limited
//! background queue. Reads go through a TTL cache with single-flight loads.

pub mod aggregator;
pub mod analytics;
pub mod archetypes;
pub mod cache;
pub mod delta;
pub mod ingest;
pub mod ledger;
pub mod queue;
pub mod scheduler;
pub mod score;
pub mod seed;
pub mod service;
pub mod store;
pub mod text;
pub mod types;

pub use aggregator::{JobOutcome, ProfileAggregator};
pub use analytics::VoiceAnalytics;
pub use cache::{EvolutionScore, ProfileCache};
pub use delta::{StyleDelta, extract_delta};
pub use queue::{LearningQueue, LearningQueueHandle, QueueSettings};
pub use service::VoiceService;
pub use store::VoiceStore;
pub use types::*;
