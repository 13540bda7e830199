//! Library-event aggregation.
//!
//! Webhook "item added" events land in the [`PendingQueue`]; the [`DebounceScheduler`]
//! hands quiet-period batches to the [`LibraryPipeline`], which groups them by series,
//! recovers missing episodes, enriches and dispatches one notification per group.

pub mod debounce;
pub mod enrichment;
pub mod grouping;
pub mod pipeline;
pub mod queue;
pub mod ranges;

pub use debounce::{BatchProcessor, DebounceConfig, DebounceScheduler};
pub use enrichment::{Enricher, EnrichmentConfig};
pub use grouping::{GroupKey, Reconciler, SeriesGroup, group_events};
pub use pipeline::LibraryPipeline;
pub use queue::PendingQueue;
pub use ranges::{EpisodeRange, summarize_episodes};
