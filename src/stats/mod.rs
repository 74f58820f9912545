//! Two-pass trend statistics: per-shard approximation, cross-shard merge,
//! exact recount, scoring, and stable ranked views, plus the streaming
//! activity/model aggregators fed during ingest.

pub mod approximate;
pub mod merge;
pub mod models;
pub mod recount;
pub mod score;
pub mod sketch;
pub mod timeline;
pub mod views;

use crate::stats::models::ModelUsageAggregator;
use crate::stats::timeline::ActivityAggregator;

/// Streaming aggregators populated while ingest walks the export. One context
/// per ingest run; `reset` clears both for a fresh pass.
#[derive(Debug, Default)]
pub struct StatsContext {
    pub activity: ActivityAggregator,
    pub models: ModelUsageAggregator,
}

impl StatsContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.activity.reset();
        self.models.reset();
    }
}
