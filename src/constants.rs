//! Crate-wide tunables. Values mirror the production defaults; tests construct
//! smaller stores and sketches where the full sizes would be wasteful.

/// Smallest read issued against a byte source.
pub const MIN_CHUNK_BYTES: usize = 1024 * 1024;
/// Largest read issued against a byte source.
pub const MAX_CHUNK_BYTES: usize = 4 * 1024 * 1024;
/// Preferred read size when the source length is unknown.
pub const PREFERRED_CHUNK_BYTES: usize = 2 * 1024 * 1024;

/// A shard flush is triggered once the pending buffer reaches this size.
pub const MIN_SHARD_BYTES: u64 = 12 * 1024 * 1024;
/// Upper bound on the serialized footprint of a single shard.
pub const MAX_SHARD_BYTES: u64 = 16 * 1024 * 1024;

/// Misra-Gries capacity per n-gram order (unigram, bigram, trigram).
pub const MG_CAPACITY: [usize; 3] = [1500, 1500, 1000];

/// Count-Min Sketch rows.
pub const CMS_DEPTH: usize = 4;
/// Count-Min Sketch columns. Power of two so indexing is a mask.
pub const CMS_WIDTH: usize = 1 << 18;
/// Fixed per-row hash seeds. Stable across shards so estimates are comparable.
pub const CMS_SEEDS: [u32; 4] = [0x1b873593, 0xcc9e2d51, 0x9e3779b1, 0x85ebca6b];

/// Default cap on merged candidates per n-gram order.
pub const MERGE_LIMIT_PER_N: usize = 3000;
/// Global cap per order after support-candidate expansion.
pub const MERGE_GLOBAL_CAP: usize = 3000;

/// Unigram down-weight relative to phrases.
pub const UNIGRAM_DELTA: f64 = 0.25;
/// Phrases below this exact frequency are discarded.
pub const MIN_PHRASE_FREQ: u64 = 5;
/// Phrases below this PMI are discarded.
pub const MIN_PMI: f64 = 1.5;
/// PMI weight in the phrase score.
pub const PMI_ALPHA: f64 = 0.3;
/// Neighbor-entropy weight in the phrase score.
pub const ENTROPY_BETA: f64 = 0.2;
/// Trigram score boost.
pub const TRIGRAM_GAMMA: f64 = 1.15;
/// Bonus for n-grams made entirely of whitelisted tokens.
pub const WHITELIST_BONUS: f64 = 1.1;
/// Each scored bigram penalizes its constituent unigrams by this factor.
pub const BIGRAM_UNIGRAM_PENALTY: f64 = 0.85;
/// Each scored trigram penalizes its constituent unigrams by this factor.
pub const TRIGRAM_UNIGRAM_PENALTY: f64 = 0.75;
/// Each scored trigram penalizes its constituent bigrams by this factor.
pub const TRIGRAM_BIGRAM_PENALTY: f64 = 0.85;

/// Default number of entries per ranked view.
pub const DEFAULT_VIEW_LIMIT: usize = 20;
/// Metric changes below this are treated as noise during view reconciliation.
pub const RECONCILE_EPSILON: f64 = 1e-6;

/// Hard cap on pool size.
pub const MAX_POOL_SIZE: usize = 4;
/// Preferred minimum pool size when there is enough work to justify it.
pub const MIN_POOL_SIZE_BUSY: usize = 3;

/// Recount tasks are sub-chunked to at most this many messages.
pub const RECOUNT_MESSAGES_PER_TASK: usize = 512;
/// Recount tasks are sub-chunked to roughly this many characters.
pub const RECOUNT_CHARS_PER_TASK: usize = 400_000;
/// A failed shard task is retried this many times before the run fails.
pub const SHARD_TASK_RETRIES: usize = 2;

/// Sentinel neighbor token at the start of a token run.
pub const START_TOKEN: &str = "__START__";
/// Sentinel neighbor token at the end of a token run.
pub const END_TOKEN: &str = "__END__";
