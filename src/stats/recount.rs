//! Pass two: exact recount of merged candidates with neighbor maps.
//!
//! Workers re-walk shard messages and count only the candidate n-grams the
//! merge pass selected. Phrases additionally record their left and right
//! neighbor distributions (with run-boundary sentinels), which feed the
//! entropy term of the score.

use std::collections::HashMap;

use crate::constants::{END_TOKEN, RECOUNT_CHARS_PER_TASK, RECOUNT_MESSAGES_PER_TASK, START_TOKEN};
use crate::error::Result;
use crate::mask::{MaskRule, apply_mask};
use crate::pool::TaskRunner;
use crate::stats::merge::MergedCandidates;
use crate::tokenize::{StopwordSet, script_runs, tokenize};
use crate::types::Message;

/// Candidate membership test, one set per n-gram order.
#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
    by_n: [std::collections::HashSet<String>; 3],
}

impl CandidateIndex {
    #[must_use]
    pub fn from_merged(merged: &MergedCandidates) -> Self {
        let by_n = [0, 1, 2].map(|order| merged.by_n[order].iter().cloned().collect());
        Self { by_n }
    }

    #[must_use]
    pub fn contains(&self, order: usize, gram: &str) -> bool {
        self.by_n.get(order).is_some_and(|set| set.contains(gram))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_n.iter().all(std::collections::HashSet::is_empty)
    }
}

/// Exact statistics for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateStats {
    /// N-gram order (1-based).
    pub n: usize,
    pub freq: u64,
    /// Left-neighbor token distribution. Empty for unigrams.
    pub left: HashMap<String, u64>,
    /// Right-neighbor token distribution. Empty for unigrams.
    pub right: HashMap<String, u64>,
}

/// Result of recounting one batch of messages.
#[derive(Debug, Clone, Default)]
pub struct RecountReply {
    pub counts: HashMap<String, CandidateStats>,
    pub tokens_seen: u64,
}

impl RecountReply {
    /// Folds another batch's counts into this one.
    pub fn absorb(&mut self, other: RecountReply) {
        self.tokens_seen += other.tokens_seen;
        for (gram, stats) in other.counts {
            let entry = self.counts.entry(gram).or_insert_with(|| CandidateStats {
                n: stats.n,
                ..CandidateStats::default()
            });
            entry.freq += stats.freq;
            for (token, count) in stats.left {
                *entry.left.entry(token).or_insert(0) += count;
            }
            for (token, count) in stats.right {
                *entry.right.entry(token).or_insert(0) += count;
            }
        }
    }
}

/// Shared configuration for pass-two workers.
pub struct RecountRunner {
    candidates: CandidateIndex,
    mask: Vec<MaskRule>,
    stopwords: StopwordSet,
    cutoff: Option<i64>,
}

impl RecountRunner {
    #[must_use]
    pub fn new(
        candidates: CandidateIndex,
        mask: Vec<MaskRule>,
        stopwords: StopwordSet,
        cutoff: Option<i64>,
    ) -> Self {
        Self {
            candidates,
            mask,
            stopwords,
            cutoff,
        }
    }

    #[must_use]
    pub fn recount(&self, messages: &[Message]) -> RecountReply {
        let mut reply = RecountReply::default();
        for message in messages {
            if let Some(cutoff) = self.cutoff {
                if !message.ts.is_some_and(|ts| ts >= cutoff) {
                    continue;
                }
            }
            let masked = apply_mask(&message.text, &self.mask);
            let tokens = tokenize(&masked, &self.stopwords);
            reply.tokens_seen += tokens.len() as u64;
            for run in script_runs(&tokens) {
                self.count_run(run, &mut reply.counts);
            }
        }
        reply
    }

    fn count_run(
        &self,
        run: &[crate::tokenize::Token],
        counts: &mut HashMap<String, CandidateStats>,
    ) {
        for start in 0..run.len() {
            for n in 1..=3usize {
                let end = start + n;
                if end > run.len() {
                    break;
                }
                let gram = run[start..end]
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                if !self.candidates.contains(n - 1, &gram) {
                    continue;
                }
                let entry = counts.entry(gram).or_insert_with(|| CandidateStats {
                    n,
                    ..CandidateStats::default()
                });
                entry.freq += 1;
                if n > 1 {
                    let left = if start == 0 {
                        START_TOKEN
                    } else {
                        run[start - 1].text.as_str()
                    };
                    let right = if end == run.len() {
                        END_TOKEN
                    } else {
                        run[end].text.as_str()
                    };
                    *entry.left.entry(left.to_owned()).or_insert(0) += 1;
                    *entry.right.entry(right.to_owned()).or_insert(0) += 1;
                }
            }
        }
    }
}

impl TaskRunner for RecountRunner {
    type Payload = Vec<Message>;
    type Output = RecountReply;

    fn run(&self, payload: Vec<Message>) -> Result<RecountReply> {
        Ok(self.recount(&payload))
    }
}

/// Splits a shard's messages into recount batches bounded by both message
/// count and total text size, so one giant message cannot stall a worker.
#[must_use]
pub fn chunk_messages(messages: Vec<Message>) -> Vec<Vec<Message>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut chars = 0usize;
    for message in messages {
        let len = message.text.len();
        let full = !current.is_empty()
            && (current.len() >= RECOUNT_MESSAGES_PER_TASK || chars + len > RECOUNT_CHARS_PER_TASK);
        if full {
            batches.push(std::mem::take(&mut current));
            chars = 0;
        }
        chars += len;
        current.push(message);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
