#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::float_cmp,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Strategic lint exceptions - these are allowed project-wide for pragmatic reasons:
//
// Documentation lints: Many internal/self-documenting functions don't need extensive docs.
// Public APIs should still have proper documentation.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Cast safety: casts in this codebase are bounded by real-world constraints
// (shard sizes, counter tables, token counts).
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
//
// Style/complexity: stream parsing and scoring naturally require long functions.
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::similar_names)]
//
// Pattern matching: these pedantic lints often suggest changes that reduce clarity.
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
//
// Performance/ergonomics trade-offs that are acceptable for this codebase:
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::map_unwrap_or)]
//
// Many functions use Result for consistency even when they currently can't fail.
#![allow(clippy::unnecessary_wraps)]

/// The chattrend-core crate version (matches `Cargo.toml`).
pub const CHATTREND_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod analyze;
pub mod constants;
pub mod error;
pub mod ingest;
pub mod mask;
pub mod pool;
pub mod stats;
pub mod store;
pub mod tokenize;
pub mod types;

pub use analyze::{AnalysisOutcome, AnalyzeOptions, analyze};
pub use constants::*;
pub use error::{ChatTrendError, Result};
pub use ingest::{
    ByteSource, IngestOptions, IngestOutcome, IngestPipeline, IngestProgress, ReaderSource,
    file_source,
};
pub use mask::{MaskRule, apply_mask};
pub use pool::{TaskHandle, TaskRunner, WorkerPool, recommended_pool_size};
pub use stats::approximate::{ApproxRequest, ApproxRunner, ShardPartial, TopEntry};
pub use stats::merge::{MergeLimits, MergedCandidates, merge_partials};
pub use stats::models::{
    ModelShare, ModelShareEntry, ModelShareOptions, ModelUsageAggregator, MonthBucket, ShareMetric,
    cutoff_90_days, cutoff_365_days,
};
pub use stats::recount::{CandidateIndex, CandidateStats, RecountReply, RecountRunner};
pub use stats::score::{ScoredEntry, score_candidates};
pub use stats::sketch::CountMinSketch;
pub use stats::timeline::{ActivityAggregator, YearSummary};
pub use stats::views::{ReconcileOptions, TopViews, build_top_views, reconcile_top_views};
pub use stats::StatsContext;
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, ShardStore};
pub use tokenize::{ScriptClass, StopwordSet, Token, tokenize};
pub use types::{
    CancelToken, Message, Role, ShardFilter, ShardId, ShardMeta, ShardProgress, ShardRecord,
};
