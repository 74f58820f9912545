//! End-to-end trend analysis over the shard store.
//!
//! Two pooled passes: shards are summarized approximately in parallel, the
//! partials merge into one candidate set, and the candidates are recounted
//! exactly before scoring. Shard payloads are streamed through a bounded
//! in-flight window so memory stays proportional to the pool size, not the
//! corpus.

use std::collections::VecDeque;

use crate::constants::SHARD_TASK_RETRIES;
use crate::error::{ChatTrendError, Result};
use crate::mask::MaskRule;
use crate::pool::{TaskHandle, WorkerPool, recommended_pool_size};
use crate::stats::approximate::{ApproxRequest, ApproxRunner, ShardPartial};
use crate::stats::merge::{MergeLimits, MergedCandidates, merge_partials};
use crate::stats::recount::{CandidateIndex, RecountReply, RecountRunner, chunk_messages};
use crate::stats::score::score_candidates;
use crate::stats::views::{ReconcileOptions, TopViews, build_top_views, reconcile_top_views};
use crate::store::{BlobStore, ShardStore};
use crate::tokenize::StopwordSet;
use crate::types::{CancelToken, ShardFilter, ShardId};

#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Messages older than this (or undated) are excluded from trends.
    pub cutoff: Option<i64>,
    pub mask: Vec<MaskRule>,
    /// Free-form extra stopwords, parsed like user input.
    pub extra_stopwords: Option<String>,
    pub limits: MergeLimits,
    /// Entries per ranked view; zero selects the default.
    pub view_limit: usize,
    /// Previous run's views, for churn suppression.
    pub previous: Option<TopViews>,
    pub cancel: CancelToken,
    /// Overrides the recommended pool size when set.
    pub pool_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOutcome {
    pub views: TopViews,
    pub aborted: bool,
    /// Exact token count of the analyzed window.
    pub total_tokens: u64,
}

/// Runs the full two-pass analysis. Cancellation is honored between shards
/// and between recount batches; an aborted run returns empty views.
pub fn analyze<B: BlobStore>(
    store: &ShardStore<B>,
    options: &AnalyzeOptions,
) -> Result<AnalysisOutcome> {
    let shards = store.list_shards(ShardFilter {
        cutoff: options.cutoff,
    })?;
    if shards.is_empty() {
        return Ok(AnalysisOutcome::default());
    }
    let stopwords = options
        .extra_stopwords
        .as_deref()
        .map_or_else(StopwordSet::builtin, StopwordSet::parse_extra);
    let pool_size = options
        .pool_size
        .unwrap_or_else(|| recommended_pool_size(shards.len()));
    let shard_ids: Vec<ShardId> = shards.iter().map(|meta| meta.id).collect();
    tracing::info!(
        shards = shard_ids.len(),
        pool.size = pool_size,
        cutoff = ?options.cutoff,
        "starting trend analysis"
    );

    let Some(partials) = approximate_pass(store, &shard_ids, &stopwords, pool_size, options)?
    else {
        return Ok(aborted_outcome());
    };
    let merged = merge_partials(&partials, options.limits);
    if merged.is_empty() {
        return Ok(AnalysisOutcome {
            total_tokens: merged.total_tokens,
            ..AnalysisOutcome::default()
        });
    }

    let Some(recount) = recount_pass(store, &shard_ids, &merged, &stopwords, pool_size, options)?
    else {
        return Ok(aborted_outcome());
    };

    let scored = score_candidates(&recount.counts, recount.tokens_seen);
    let views = build_top_views(&scored, options.view_limit);
    let views = match &options.previous {
        Some(previous) => reconcile_top_views(previous, views, ReconcileOptions::default()),
        None => views,
    };
    tracing::info!(
        phrases = views.phrases.len(),
        words = views.words.len(),
        tokens = recount.tokens_seen,
        "analysis complete"
    );
    Ok(AnalysisOutcome {
        views,
        aborted: false,
        total_tokens: recount.tokens_seen,
    })
}

fn aborted_outcome() -> AnalysisOutcome {
    tracing::debug!("analysis aborted by caller");
    AnalysisOutcome {
        aborted: true,
        ..AnalysisOutcome::default()
    }
}

/// Pass one: summarize every shard, `None` on cancellation.
fn approximate_pass<B: BlobStore>(
    store: &ShardStore<B>,
    shard_ids: &[ShardId],
    stopwords: &StopwordSet,
    pool_size: usize,
    options: &AnalyzeOptions,
) -> Result<Option<Vec<ShardPartial>>> {
    let runner = ApproxRunner::new(options.mask.clone(), stopwords.clone(), options.cutoff);
    let pool = WorkerPool::new(pool_size, runner);
    let mut window: VecDeque<(ShardId, TaskHandle<ShardPartial>)> = VecDeque::new();
    let mut partials = Vec::with_capacity(shard_ids.len());

    for &id in shard_ids {
        if options.cancel.is_cancelled() {
            drain_window(&mut window);
            return Ok(None);
        }
        let handle = pool.run(ApproxRequest {
            shard_id: id,
            messages: read_messages(store, id)?,
        })?;
        window.push_back((id, handle));
        if window.len() >= pool.size() {
            if let Some((id, handle)) = window.pop_front() {
                partials.push(wait_approx(store, &pool, id, handle)?);
            }
        }
    }
    while let Some((id, handle)) = window.pop_front() {
        partials.push(wait_approx(store, &pool, id, handle)?);
    }
    Ok(Some(partials))
}

fn wait_approx<B: BlobStore>(
    store: &ShardStore<B>,
    pool: &WorkerPool<ApproxRunner>,
    shard_id: ShardId,
    handle: TaskHandle<ShardPartial>,
) -> Result<ShardPartial> {
    let mut outcome = handle.wait();
    for attempt in 1..=SHARD_TASK_RETRIES {
        let Err(err) = &outcome else { break };
        tracing::warn!(shard.id = shard_id, attempt, error = %err, "retrying shard summary");
        outcome = pool
            .run(ApproxRequest {
                shard_id,
                messages: read_messages(store, shard_id)?,
            })?
            .wait();
    }
    outcome.map_err(|err| ChatTrendError::ShardAnalysis {
        shard_id,
        reason: err.to_string(),
    })
}

/// Pass two: exact recount of the merged candidates, `None` on cancellation.
fn recount_pass<B: BlobStore>(
    store: &ShardStore<B>,
    shard_ids: &[ShardId],
    merged: &MergedCandidates,
    stopwords: &StopwordSet,
    pool_size: usize,
    options: &AnalyzeOptions,
) -> Result<Option<RecountReply>> {
    let runner = RecountRunner::new(
        CandidateIndex::from_merged(merged),
        options.mask.clone(),
        stopwords.clone(),
        options.cutoff,
    );
    let pool = WorkerPool::new(pool_size, runner);
    let mut window: VecDeque<RecountBatch> = VecDeque::new();
    let mut total = RecountReply::default();

    for &id in shard_ids {
        let batches = chunk_messages(read_messages(store, id)?);
        for batch in batches {
            if options.cancel.is_cancelled() {
                for pending in window {
                    let _ = pending.handle.wait();
                }
                return Ok(None);
            }
            let handle = pool.run(batch.clone())?;
            window.push_back(RecountBatch {
                shard_id: id,
                batch,
                handle,
            });
            if window.len() >= pool.size() {
                if let Some(pending) = window.pop_front() {
                    total.absorb(wait_recount(&pool, pending)?);
                }
            }
        }
    }
    while let Some(pending) = window.pop_front() {
        total.absorb(wait_recount(&pool, pending)?);
    }
    Ok(Some(total))
}

struct RecountBatch {
    shard_id: ShardId,
    batch: Vec<crate::types::Message>,
    handle: TaskHandle<RecountReply>,
}

fn wait_recount(pool: &WorkerPool<RecountRunner>, pending: RecountBatch) -> Result<RecountReply> {
    let RecountBatch {
        shard_id,
        batch,
        handle,
    } = pending;
    let mut outcome = handle.wait();
    for attempt in 1..=SHARD_TASK_RETRIES {
        let Err(err) = &outcome else { break };
        tracing::warn!(shard.id = shard_id, attempt, error = %err, "retrying recount batch");
        outcome = pool.run(batch.clone())?.wait();
    }
    outcome.map_err(|err| ChatTrendError::ShardAnalysis {
        shard_id,
        reason: err.to_string(),
    })
}

fn drain_window<T>(window: &mut VecDeque<(ShardId, TaskHandle<T>)>) {
    while let Some((_, handle)) = window.pop_front() {
        let _ = handle.wait();
    }
}

fn read_messages<B: BlobStore>(
    store: &ShardStore<B>,
    id: ShardId,
) -> Result<Vec<crate::types::Message>> {
    store
        .read_shard_messages(id)?
        .ok_or(ChatTrendError::ShardMissing { id })
}
