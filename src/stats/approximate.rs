//! Pass one: per-shard approximate heavy hitters.
//!
//! Each shard is summarized independently by a Misra-Gries heavy-hitter pass
//! per n-gram order (refined by an exact recount of the survivors within the
//! shard) plus a Count-Min Sketch used later to rank candidates across
//! shards. Partials from different shards merge deterministically because the
//! sketch geometry and seeds are fixed.

use std::collections::HashMap;

use crate::constants::{MG_CAPACITY, CMS_WIDTH};
use crate::error::Result;
use crate::mask::{MaskRule, apply_mask};
use crate::pool::TaskRunner;
use crate::stats::sketch::CountMinSketch;
use crate::tokenize::{StopwordSet, Token, script_runs, tokenize};
use crate::types::{Message, ShardId};

/// One surviving heavy-hitter candidate with its within-shard exact count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopEntry {
    pub token: String,
    pub count_est: u64,
}

/// Approximate summary of one shard, per n-gram order (index 0 = unigrams).
#[derive(Debug, Clone)]
pub struct ShardPartial {
    pub shard_id: ShardId,
    pub top_k: [Vec<TopEntry>; 3],
    pub cms: [CountMinSketch; 3],
    pub total_tokens: u64,
}

/// Work order for one shard summarization task.
#[derive(Debug)]
pub struct ApproxRequest {
    pub shard_id: ShardId,
    pub messages: Vec<Message>,
}

/// Shared, immutable configuration for pass-one workers.
pub struct ApproxRunner {
    mask: Vec<MaskRule>,
    stopwords: StopwordSet,
    cutoff: Option<i64>,
    mg_capacity: [usize; 3],
    cms_width: usize,
}

impl ApproxRunner {
    #[must_use]
    pub fn new(mask: Vec<MaskRule>, stopwords: StopwordSet, cutoff: Option<i64>) -> Self {
        Self {
            mask,
            stopwords,
            cutoff,
            mg_capacity: MG_CAPACITY,
            cms_width: CMS_WIDTH,
        }
    }

    /// Shrinks the sketch and counter tables. Test-sized shards do not need
    /// a megabyte of counters per order.
    #[must_use]
    pub fn with_capacities(mut self, mg_capacity: [usize; 3], cms_width: usize) -> Self {
        self.mg_capacity = mg_capacity;
        self.cms_width = cms_width;
        self
    }

    /// Summarizes one shard's messages.
    #[must_use]
    pub fn summarize(&self, shard_id: ShardId, messages: &[Message]) -> ShardPartial {
        // Tokenize once; both passes below reuse the streams.
        let token_streams: Vec<Vec<Token>> = messages
            .iter()
            .filter(|m| within_cutoff(m, self.cutoff))
            .map(|m| tokenize(&apply_mask(&m.text, &self.mask), &self.stopwords))
            .collect();

        let mut cms = [
            CountMinSketch::with_width(self.cms_width),
            CountMinSketch::with_width(self.cms_width),
            CountMinSketch::with_width(self.cms_width),
        ];
        let mut trackers = [
            MisraGries::new(self.mg_capacity[0]),
            MisraGries::new(self.mg_capacity[1]),
            MisraGries::new(self.mg_capacity[2]),
        ];
        let mut total_tokens = 0u64;

        for tokens in &token_streams {
            total_tokens += tokens.len() as u64;
            for run in script_runs(tokens) {
                for order in 0..3 {
                    for gram in grams(run, order + 1) {
                        trackers[order].add(&gram);
                        cms[order].add(&gram);
                    }
                }
            }
        }

        // Second pass: exact within-shard counts for the survivors. The
        // decremented counters the first pass leaves behind are biased low.
        let mut exact: [HashMap<String, u64>; 3] =
            [HashMap::new(), HashMap::new(), HashMap::new()];
        for (order, tracker) in trackers.iter().enumerate() {
            for token in tracker.survivors() {
                exact[order].insert(token.clone(), 0);
            }
        }
        for tokens in &token_streams {
            for run in script_runs(tokens) {
                for order in 0..3 {
                    for gram in grams(run, order + 1) {
                        if let Some(count) = exact[order].get_mut(&gram) {
                            *count += 1;
                        }
                    }
                }
            }
        }

        let top_k = exact.map(|counts| {
            let mut entries: Vec<TopEntry> = counts
                .into_iter()
                .map(|(token, count_est)| TopEntry { token, count_est })
                .collect();
            entries.sort_by(|a, b| {
                b.count_est
                    .cmp(&a.count_est)
                    .then_with(|| a.token.cmp(&b.token))
            });
            entries
        });

        tracing::debug!(
            shard.id = shard_id,
            tokens = total_tokens,
            unigrams = top_k[0].len(),
            bigrams = top_k[1].len(),
            trigrams = top_k[2].len(),
            "summarized shard"
        );
        ShardPartial {
            shard_id,
            top_k,
            cms,
            total_tokens,
        }
    }
}

impl TaskRunner for ApproxRunner {
    type Payload = ApproxRequest;
    type Output = ShardPartial;

    fn run(&self, payload: ApproxRequest) -> Result<ShardPartial> {
        Ok(self.summarize(payload.shard_id, &payload.messages))
    }
}

fn within_cutoff(message: &Message, cutoff: Option<i64>) -> bool {
    match cutoff {
        None => true,
        Some(cutoff) => message.ts.is_some_and(|ts| ts >= cutoff),
    }
}

/// Space-joined n-grams over one same-script token run.
fn grams(run: &[Token], n: usize) -> Vec<String> {
    if run.len() < n {
        return Vec::new();
    }
    run.windows(n)
        .map(|window| {
            window
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Bounded-memory heavy-hitter counter. Any token whose true frequency
/// exceeds `total / (capacity + 1)` is guaranteed to survive.
struct MisraGries {
    capacity: usize,
    counters: HashMap<String, u64>,
}

impl MisraGries {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            counters: HashMap::new(),
        }
    }

    fn add(&mut self, token: &str) {
        if let Some(count) = self.counters.get_mut(token) {
            *count += 1;
        } else if self.counters.len() < self.capacity {
            self.counters.insert(token.to_owned(), 1);
        } else {
            self.counters.retain(|_, count| {
                *count -= 1;
                *count > 0
            });
        }
    }

    fn survivors(&self) -> impl Iterator<Item = &String> {
        self.counters.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn message(text: &str) -> Message {
        Message {
            role: Role::Assistant,
            name: None,
            text: text.into(),
            ts: Some(1_700_000_000_000),
            model: None,
        }
    }

    fn runner() -> ApproxRunner {
        ApproxRunner::new(Vec::new(), StopwordSet::default(), None)
            .with_capacities([16, 16, 16], 1 << 10)
    }

    #[test]
    fn heavy_hitters_survive_with_exact_counts() {
        let mut messages = vec![message("rust compiler rust compiler rust"); 4];
        messages.push(message("python interpreter"));
        let partial = runner().summarize(1, &messages);

        let unigrams = &partial.top_k[0];
        let rust = unigrams.iter().find(|e| e.token == "rust").expect("rust");
        assert_eq!(rust.count_est, 12);
        assert_eq!(unigrams[0].token, "rust");

        let bigrams = &partial.top_k[1];
        let top = &bigrams[0];
        assert!(top.token == "rust compiler" || top.token == "compiler rust");
        assert!(partial.cms[0].estimate("rust") >= 12);
    }

    #[test]
    fn grams_do_not_cross_script_boundaries() {
        let partial = runner().summarize(1, &[message("rust 模型 tokio")]);
        let bigrams = &partial.top_k[1];
        assert!(bigrams.is_empty(), "no same-script adjacency: {bigrams:?}");
    }

    #[test]
    fn cutoff_skips_undated_and_older_messages() {
        let mut old = message("ancient words");
        old.ts = Some(5);
        let mut undated = message("timeless words");
        undated.ts = None;
        let runner = ApproxRunner::new(Vec::new(), StopwordSet::default(), Some(1_000))
            .with_capacities([16, 16, 16], 1 << 10);
        let partial = runner.summarize(1, &[old, undated, message("fresh words")]);
        let tokens: Vec<_> = partial.top_k[0].iter().map(|e| e.token.as_str()).collect();
        assert!(tokens.contains(&"fresh"));
        assert!(!tokens.contains(&"ancient"));
        assert!(!tokens.contains(&"timeless"));
    }

    #[test]
    fn mask_applies_before_tokenization() {
        let runner = ApproxRunner::new(
            vec![MaskRule::new("secretproject", "redacted")],
            StopwordSet::default(),
            None,
        )
        .with_capacities([16, 16, 16], 1 << 10);
        let partial = runner.summarize(1, &[message("secretproject launch")]);
        let tokens: Vec<_> = partial.top_k[0].iter().map(|e| e.token.as_str()).collect();
        assert!(tokens.contains(&"redacted"));
        assert!(!tokens.contains(&"secretproject"));
    }

    #[test]
    fn total_tokens_counts_the_filtered_stream() {
        let partial = runner().summarize(1, &[message("alpha beta gamma")]);
        assert_eq!(partial.total_tokens, 3);
    }
}
