//! Ranked trend views and cross-run stabilization.
//!
//! Re-running analysis over nearly identical data can flip adjacent entries
//! whose scores are within noise of each other. Reconciliation keeps the
//! previous ordering when the only difference is such a flip, so consumers do
//! not see churn without a real underlying change.

use std::collections::HashMap;

use crate::constants::{DEFAULT_VIEW_LIMIT, RECONCILE_EPSILON};
use crate::stats::score::ScoredEntry;

/// The two consumer-facing rankings: multi-word phrases and single words.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopViews {
    pub phrases: Vec<ScoredEntry>,
    pub words: Vec<ScoredEntry>,
}

/// Builds both views from the full scored ranking. The phrase view backfills
/// with top words when fewer than `limit` phrases scored.
#[must_use]
pub fn build_top_views(scored: &[ScoredEntry], limit: usize) -> TopViews {
    let limit = if limit == 0 { DEFAULT_VIEW_LIMIT } else { limit };
    let mut phrases: Vec<ScoredEntry> =
        scored.iter().filter(|e| e.n > 1).take(limit).cloned().collect();
    if phrases.len() < limit {
        let backfill = limit - phrases.len();
        phrases.extend(scored.iter().filter(|e| e.n == 1).take(backfill).cloned());
    }
    let words: Vec<ScoredEntry> =
        scored.iter().filter(|e| e.n == 1).take(limit).cloned().collect();
    TopViews { phrases, words }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileOptions {
    /// Maximum number of disjoint adjacent flips tolerated before the new
    /// ordering is accepted.
    pub max_swaps: usize,
    /// Score deltas at or below this are treated as noise.
    pub epsilon: f64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_swaps: 1,
            epsilon: RECONCILE_EPSILON,
        }
    }
}

/// Reconciles the new views against the previous run's. Each list is handled
/// independently: the previous ordering is kept only when the new list has
/// the same entries with unchanged scores and frequencies and at most
/// `max_swaps` adjacent position flips.
#[must_use]
pub fn reconcile_top_views(
    previous: &TopViews,
    next: TopViews,
    options: ReconcileOptions,
) -> TopViews {
    TopViews {
        phrases: reconcile_list(&previous.phrases, next.phrases, options),
        words: reconcile_list(&previous.words, next.words, options),
    }
}

fn reconcile_list(
    previous: &[ScoredEntry],
    next: Vec<ScoredEntry>,
    options: ReconcileOptions,
) -> Vec<ScoredEntry> {
    if previous.len() != next.len() {
        return next;
    }
    let previous_entries: HashMap<&str, (f64, u64)> = previous
        .iter()
        .map(|e| (e.token.as_str(), (e.score, e.freq)))
        .collect();
    if previous_entries.len() != previous.len() {
        return next;
    }
    for entry in &next {
        match previous_entries.get(entry.token.as_str()) {
            // A token the previous view never had is a real change.
            None => return next,
            Some((score, freq))
                if (score - entry.score).abs() > options.epsilon || *freq != entry.freq =>
            {
                return next;
            }
            Some(_) => {}
        }
    }
    match adjacent_swap_distance(previous, &next) {
        Some(swaps) if swaps <= options.max_swaps => previous.to_vec(),
        _ => next,
    }
}

/// Number of disjoint adjacent transpositions separating the two orderings,
/// or `None` when they differ by more than that.
fn adjacent_swap_distance(previous: &[ScoredEntry], next: &[ScoredEntry]) -> Option<usize> {
    let mut swaps = 0;
    let mut i = 0;
    while i < previous.len() {
        if previous[i].token == next[i].token {
            i += 1;
        } else if i + 1 < previous.len()
            && previous[i].token == next[i + 1].token
            && previous[i + 1].token == next[i].token
        {
            swaps += 1;
            i += 2;
        } else {
            return None;
        }
    }
    Some(swaps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(token: &str, n: usize, score: f64) -> ScoredEntry {
        ScoredEntry {
            token: token.into(),
            n,
            freq: 10,
            pmi: 0.0,
            left_entropy: 0.0,
            right_entropy: 0.0,
            score,
        }
    }

    #[test]
    fn phrase_view_backfills_with_words() {
        let scored = vec![
            entry("hello world", 2, 9.0),
            entry("rust", 1, 8.0),
            entry("tokio", 1, 7.0),
        ];
        let views = build_top_views(&scored, 2);
        assert_eq!(views.phrases.len(), 2);
        assert_eq!(views.phrases[0].token, "hello world");
        assert_eq!(views.phrases[1].token, "rust");
        assert_eq!(views.words.len(), 2);
        assert_eq!(views.words[0].token, "rust");
    }

    #[test]
    fn single_noise_flip_keeps_previous_ordering() {
        let previous = TopViews {
            phrases: Vec::new(),
            words: vec![entry("a1", 1, 5.0), entry("b2", 1, 5.0), entry("c3", 1, 3.0)],
        };
        let next = TopViews {
            phrases: Vec::new(),
            words: vec![entry("b2", 1, 5.0), entry("a1", 1, 5.0), entry("c3", 1, 3.0)],
        };
        let reconciled = reconcile_top_views(&previous, next, ReconcileOptions::default());
        assert_eq!(reconciled.words, previous.words);
    }

    #[test]
    fn score_change_beyond_epsilon_accepts_next() {
        let previous = TopViews {
            phrases: Vec::new(),
            words: vec![entry("a1", 1, 5.0), entry("b2", 1, 4.0)],
        };
        let next_words = vec![entry("b2", 1, 6.0), entry("a1", 1, 5.0)];
        let next = TopViews {
            phrases: Vec::new(),
            words: next_words.clone(),
        };
        let reconciled = reconcile_top_views(&previous, next, ReconcileOptions::default());
        assert_eq!(reconciled.words, next_words);
    }

    #[test]
    fn frequency_change_accepts_next() {
        let previous = TopViews {
            phrases: Vec::new(),
            words: vec![entry("a1", 1, 5.0), entry("b2", 1, 5.0)],
        };
        let mut flipped = vec![entry("b2", 1, 5.0), entry("a1", 1, 5.0)];
        flipped[0].freq = 99;
        let next = TopViews {
            phrases: Vec::new(),
            words: flipped.clone(),
        };
        let reconciled = reconcile_top_views(&previous, next, ReconcileOptions::default());
        assert_eq!(reconciled.words, flipped, "a freq change is a real change");
    }

    #[test]
    fn token_set_change_accepts_next() {
        let previous = TopViews {
            phrases: Vec::new(),
            words: vec![entry("a1", 1, 5.0), entry("b2", 1, 4.0)],
        };
        let next_words = vec![entry("a1", 1, 5.0), entry("z9", 1, 4.0)];
        let next = TopViews {
            phrases: Vec::new(),
            words: next_words.clone(),
        };
        let reconciled = reconcile_top_views(&previous, next, ReconcileOptions::default());
        assert_eq!(reconciled.words, next_words);
    }

    #[test]
    fn two_flips_exceed_the_default_budget() {
        let previous = TopViews {
            phrases: Vec::new(),
            words: vec![
                entry("a1", 1, 5.0),
                entry("b2", 1, 5.0),
                entry("c3", 1, 5.0),
                entry("d4", 1, 5.0),
            ],
        };
        let next_words = vec![
            entry("b2", 1, 5.0),
            entry("a1", 1, 5.0),
            entry("d4", 1, 5.0),
            entry("c3", 1, 5.0),
        ];
        let next = TopViews {
            phrases: Vec::new(),
            words: next_words.clone(),
        };
        let reconciled = reconcile_top_views(&previous, next, ReconcileOptions::default());
        assert_eq!(reconciled.words, next_words, "two swaps is a real change");

        let relaxed = reconcile_top_views(
            &previous,
            TopViews {
                phrases: Vec::new(),
                words: next_words,
            },
            ReconcileOptions {
                max_swaps: 2,
                ..ReconcileOptions::default()
            },
        );
        assert_eq!(relaxed.words, previous.words);
    }
}
