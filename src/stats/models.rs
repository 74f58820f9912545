//! Model usage shares over fixed time windows.
//!
//! Ingest feeds every discovered message through `bump_model`; share
//! computation later slices the samples by metric and cutoff window and rolls
//! them into overall and per-month distributions.

use std::collections::BTreeMap;

use chrono::{Datelike, TimeZone, Utc};

use crate::ingest::count_chars;
use crate::tokenize::{StopwordSet, tokenize};
use crate::types::Role;

pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
/// Monthly buckets are capped to this many most recent months.
const MAX_MONTH_BUCKETS: usize = 18;
/// Assistant messages that carry no model name bucket here.
const UNKNOWN_MODEL: &str = "unknown";

#[must_use]
pub fn cutoff_90_days(now_ms: i64) -> i64 {
    now_ms - 90 * MS_PER_DAY
}

#[must_use]
pub fn cutoff_365_days(now_ms: i64) -> i64 {
    now_ms - 365 * MS_PER_DAY
}

/// What a model's share is measured in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShareMetric {
    #[default]
    Count,
    Chars,
    Tokens,
}

#[derive(Debug, Clone)]
struct ModelSample {
    ts: Option<i64>,
    chars: u64,
    tokens: u64,
    model: String,
}

/// One model's slice of the total.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelShareEntry {
    pub model: String,
    pub value: u64,
    /// Fraction of the window total, in `[0, 1]`.
    pub share: f64,
}

/// Per-model values within one calendar month (UTC).
#[derive(Debug, Clone, PartialEq)]
pub struct MonthBucket {
    /// `YYYY-MM`.
    pub month: String,
    pub total: u64,
    pub entries: Vec<ModelShareEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelShareOptions {
    pub metric: ShareMetric,
    /// Samples with no timestamp or older than this are excluded.
    pub cutoff: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelShare {
    pub total: u64,
    pub entries: Vec<ModelShareEntry>,
    pub buckets: Vec<MonthBucket>,
}

/// Collects assistant model usage samples during ingest.
#[derive(Debug, Default)]
pub struct ModelUsageAggregator {
    samples: Vec<ModelSample>,
    stopwords: StopwordSet,
}

impl ModelUsageAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Records one message. Only assistant messages contribute to shares;
    /// ones without a model name are bucketed as `"unknown"`.
    pub fn bump_model(
        &mut self,
        ts: Option<i64>,
        role: Option<Role>,
        text: &str,
        model: Option<&str>,
    ) {
        if role != Some(Role::Assistant) {
            return;
        }
        let model = model.filter(|m| !m.is_empty()).unwrap_or(UNKNOWN_MODEL);
        self.samples.push(ModelSample {
            ts,
            chars: count_chars(text),
            tokens: tokenize(text, &self.stopwords).len() as u64,
            model: model.to_owned(),
        });
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Overall and per-month model shares for the requested metric/window.
    #[must_use]
    pub fn compute_model_share(&self, options: &ModelShareOptions) -> ModelShare {
        let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
        let mut months: BTreeMap<String, BTreeMap<&str, u64>> = BTreeMap::new();

        for sample in &self.samples {
            if let Some(cutoff) = options.cutoff {
                if !sample.ts.is_some_and(|ts| ts >= cutoff) {
                    continue;
                }
            }
            let value = match options.metric {
                ShareMetric::Count => 1,
                ShareMetric::Chars => sample.chars,
                ShareMetric::Tokens => sample.tokens,
            };
            *totals.entry(sample.model.as_str()).or_insert(0) += value;
            if let Some(key) = sample.ts.and_then(month_key) {
                *months
                    .entry(key)
                    .or_default()
                    .entry(sample.model.as_str())
                    .or_insert(0) += value;
            }
        }

        let total: u64 = totals.values().sum();
        let entries = share_entries(&totals, total);
        let mut buckets: Vec<MonthBucket> = months
            .into_iter()
            .map(|(month, values)| {
                let bucket_total: u64 = values.values().sum();
                MonthBucket {
                    month,
                    total: bucket_total,
                    entries: share_entries(&values, bucket_total),
                }
            })
            .collect();
        if buckets.len() > MAX_MONTH_BUCKETS {
            buckets.drain(..buckets.len() - MAX_MONTH_BUCKETS);
        }
        ModelShare {
            total,
            entries,
            buckets,
        }
    }
}

fn month_key(ts: i64) -> Option<String> {
    let datetime = Utc.timestamp_millis_opt(ts).single()?;
    let (year, month) = (datetime.year(), datetime.month());
    Some(format!("{year:04}-{month:02}"))
}

fn share_entries(values: &BTreeMap<&str, u64>, total: u64) -> Vec<ModelShareEntry> {
    let mut entries: Vec<ModelShareEntry> = values
        .iter()
        .map(|(model, value)| ModelShareEntry {
            model: (*model).to_owned(),
            value: *value,
            share: if total == 0 {
                0.0
            } else {
                *value as f64 / total as f64
            },
        })
        .collect();
    entries.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.model.cmp(&b.model)));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = MS_PER_DAY;

    fn aggregator() -> ModelUsageAggregator {
        let mut agg = ModelUsageAggregator::new();
        let base = 1_700_000_000_000;
        agg.bump_model(Some(base), Some(Role::Assistant), "long answer here", Some("gpt-4o"));
        agg.bump_model(Some(base + DAY), Some(Role::Assistant), "ok", Some("gpt-4o"));
        agg.bump_model(Some(base + 40 * DAY), Some(Role::Assistant), "reply", Some("o1"));
        // Ignored: wrong role. Counted under "unknown": missing model.
        agg.bump_model(Some(base), Some(Role::User), "question", Some("gpt-4o"));
        agg.bump_model(Some(base), Some(Role::Assistant), "anon", None);
        agg
    }

    #[test]
    fn counts_split_by_model_with_shares() {
        let share = aggregator().compute_model_share(&ModelShareOptions::default());
        assert_eq!(share.total, 4);
        assert_eq!(share.entries[0].model, "gpt-4o");
        assert_eq!(share.entries[0].value, 2);
        assert!((share.entries[0].share - 0.5).abs() < 1e-9);
        assert_eq!(share.entries[1].model, "o1");
        assert_eq!(share.entries[2].model, "unknown");
    }

    #[test]
    fn missing_models_bucket_as_unknown() {
        let share = aggregator().compute_model_share(&ModelShareOptions::default());
        let unknown = share
            .entries
            .iter()
            .find(|e| e.model == "unknown")
            .expect("unknown bucket");
        assert_eq!(unknown.value, 1);
    }

    #[test]
    fn token_metric_counts_tokenizer_output() {
        let share = aggregator().compute_model_share(&ModelShareOptions {
            metric: ShareMetric::Tokens,
            cutoff: None,
        });
        let gpt = share.entries.iter().find(|e| e.model == "gpt-4o").expect("gpt");
        // "long answer here" tokenizes to three tokens; "ok" is a stopword.
        assert_eq!(gpt.value, 3);
    }

    #[test]
    fn chars_metric_weighs_by_text_length() {
        let share = aggregator().compute_model_share(&ModelShareOptions {
            metric: ShareMetric::Chars,
            cutoff: None,
        });
        let gpt = share.entries.iter().find(|e| e.model == "gpt-4o").expect("gpt");
        assert_eq!(gpt.value, 16 + 2);
    }

    #[test]
    fn cutoff_excludes_older_samples() {
        let base = 1_700_000_000_000;
        let share = aggregator().compute_model_share(&ModelShareOptions {
            metric: ShareMetric::Count,
            cutoff: Some(base + 10 * DAY),
        });
        assert_eq!(share.total, 1);
        assert_eq!(share.entries[0].model, "o1");
    }

    #[test]
    fn monthly_buckets_group_by_utc_month() {
        let share = aggregator().compute_model_share(&ModelShareOptions::default());
        assert_eq!(share.buckets.len(), 2);
        assert!(share.buckets[0].month < share.buckets[1].month);
        let first = &share.buckets[0];
        assert_eq!(first.total, 3, "gpt-4o twice plus one unknown");
        assert_eq!(first.entries[0].model, "gpt-4o");
    }

    #[test]
    fn windows_are_day_multiples() {
        let now = 1_700_000_000_000;
        assert_eq!(now - cutoff_90_days(now), 90 * MS_PER_DAY);
        assert_eq!(now - cutoff_365_days(now), 365 * MS_PER_DAY);
    }
}
