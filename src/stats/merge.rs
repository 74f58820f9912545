//! Cross-shard candidate merge.
//!
//! The union of per-shard survivors is ranked with the sketches (which see
//! every occurrence, unlike the survivor counts) and capped per order. Base
//! candidates then pull in their support n-grams so the recount pass can
//! compute PMI for every phrase it sees. Output ordering is fully
//! deterministic for a given set of partials.

use std::collections::{HashMap, HashSet};

use crate::constants::{MERGE_GLOBAL_CAP, MERGE_LIMIT_PER_N};
use crate::stats::approximate::ShardPartial;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeLimits {
    /// Base candidates kept per n-gram order.
    pub per_n: [usize; 3],
    /// Hard cap per order after support expansion.
    pub global_cap: usize,
}

impl Default for MergeLimits {
    fn default() -> Self {
        Self {
            per_n: [MERGE_LIMIT_PER_N; 3],
            global_cap: MERGE_GLOBAL_CAP,
        }
    }
}

/// Merged candidate lists, one per order, in rank order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedCandidates {
    pub by_n: [Vec<String>; 3],
    pub total_tokens: u64,
}

impl MergedCandidates {
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_n.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_n.iter().all(Vec::is_empty)
    }
}

#[must_use]
pub fn merge_partials(partials: &[ShardPartial], limits: MergeLimits) -> MergedCandidates {
    let total_tokens = partials.iter().map(|p| p.total_tokens).sum();
    let mut by_n: [Vec<String>; 3] = [Vec::new(), Vec::new(), Vec::new()];

    for order in 0..3 {
        // Survivor union with summed within-shard counts.
        let mut survivor_counts: HashMap<&str, u64> = HashMap::new();
        for partial in partials {
            for entry in &partial.top_k[order] {
                *survivor_counts.entry(entry.token.as_str()).or_insert(0) += entry.count_est;
            }
        }

        let mut ranked: Vec<(&str, u64, u64)> = survivor_counts
            .into_iter()
            .map(|(token, survivor_count)| {
                let estimate: u64 = partials
                    .iter()
                    .map(|p| p.cms[order].estimate(token))
                    .sum();
                (token, estimate, survivor_count)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(limits.per_n[order]);
        by_n[order] = ranked.into_iter().map(|(token, _, _)| token.to_owned()).collect();
    }

    expand_support(&mut by_n, limits.global_cap);
    tracing::debug!(
        unigrams = by_n[0].len(),
        bigrams = by_n[1].len(),
        trigrams = by_n[2].len(),
        total_tokens,
        "merged shard partials"
    );
    MergedCandidates { by_n, total_tokens }
}

/// Appends the constituent n-grams every phrase candidate needs for PMI:
/// bigrams contribute their unigrams; trigrams contribute both covering
/// bigrams and all three unigrams.
fn expand_support(by_n: &mut [Vec<String>; 3], global_cap: usize) {
    let mut seen: [HashSet<String>; 3] = [HashSet::new(), HashSet::new(), HashSet::new()];
    for order in 0..3 {
        seen[order] = by_n[order].iter().cloned().collect();
    }

    let mut extra_unigrams: Vec<String> = Vec::new();
    let mut extra_bigrams: Vec<String> = Vec::new();

    for bigram in &by_n[1] {
        for part in bigram.split(' ') {
            if seen[0].insert(part.to_owned()) {
                extra_unigrams.push(part.to_owned());
            }
        }
    }
    for trigram in &by_n[2] {
        let parts: Vec<&str> = trigram.split(' ').collect();
        if parts.len() != 3 {
            continue;
        }
        for pair in [format!("{} {}", parts[0], parts[1]), format!("{} {}", parts[1], parts[2])] {
            if seen[1].insert(pair.clone()) {
                extra_bigrams.push(pair);
            }
        }
        for part in parts {
            if seen[0].insert(part.to_owned()) {
                extra_unigrams.push(part.to_owned());
            }
        }
    }

    by_n[0].extend(extra_unigrams);
    by_n[1].extend(extra_bigrams);
    for list in by_n {
        list.truncate(global_cap);
    }
}
