//! Per-year activity rollups fed incrementally during ingest.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, TimeZone, Utc};

use crate::ingest::count_chars;
use crate::types::Role;

#[derive(Debug, Default)]
struct YearAccumulator {
    total_messages: u64,
    total_chars: u64,
    assistant_messages: u64,
    assistant_chars: u64,
    images: u64,
    chars_by_month: [u64; 12],
    active_days: BTreeSet<NaiveDate>,
}

/// Finalized rollup for one calendar year (UTC).
#[derive(Debug, Clone, PartialEq)]
pub struct YearSummary {
    pub year: i32,
    pub total_messages: u64,
    pub total_chars: u64,
    pub assistant_messages: u64,
    pub assistant_chars: u64,
    pub images: u64,
    pub chars_by_month: [u64; 12],
    pub active_days: u64,
    /// Number of maximal runs of consecutive active days.
    pub streak_count: u64,
    /// Length in days of the longest such run.
    pub longest_streak: u64,
    pub avg_chars_per_active_day: f64,
    /// 1-based month with the highest character volume, if any.
    pub most_active_month: Option<u32>,
    pub avg_assistant_msg_len: f64,
}

/// Streaming per-year activity aggregator. All calendar math is UTC.
#[derive(Debug, Default)]
pub struct ActivityAggregator {
    years: BTreeMap<i32, YearAccumulator>,
}

impl ActivityAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.years.clear();
    }

    /// Records one message. `ts` is milliseconds since the Unix epoch;
    /// out-of-range timestamps are dropped.
    pub fn bump_activity(&mut self, ts: i64, role: Option<Role>, text: &str, images: u32) {
        let Some(datetime) = Utc.timestamp_millis_opt(ts).single() else {
            return;
        };
        let chars = count_chars(text);
        let year = self.years.entry(datetime.year()).or_default();
        year.total_messages += 1;
        year.total_chars += chars;
        year.images += u64::from(images);
        year.chars_by_month[datetime.month0() as usize] += chars;
        year.active_days.insert(datetime.date_naive());
        if role == Some(Role::Assistant) {
            year.assistant_messages += 1;
            year.assistant_chars += chars;
        }
    }

    /// Finalized summaries in ascending year order.
    #[must_use]
    pub fn finalize(&self) -> Vec<YearSummary> {
        self.years
            .iter()
            .map(|(year, acc)| {
                let (streak_count, longest_streak) = streaks(&acc.active_days);
                let active_days = acc.active_days.len() as u64;
                let most_active_month = acc
                    .chars_by_month
                    .iter()
                    .enumerate()
                    .filter(|(_, chars)| **chars > 0)
                    .max_by_key(|(_, chars)| **chars)
                    .map(|(month0, _)| month0 as u32 + 1);
                YearSummary {
                    year: *year,
                    total_messages: acc.total_messages,
                    total_chars: acc.total_chars,
                    assistant_messages: acc.assistant_messages,
                    assistant_chars: acc.assistant_chars,
                    images: acc.images,
                    chars_by_month: acc.chars_by_month,
                    active_days,
                    streak_count,
                    longest_streak,
                    avg_chars_per_active_day: ratio(acc.total_chars, active_days),
                    most_active_month,
                    avg_assistant_msg_len: ratio(acc.assistant_chars, acc.assistant_messages),
                }
            })
            .collect()
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Counts maximal consecutive-day runs and the longest run length.
fn streaks(days: &BTreeSet<NaiveDate>) -> (u64, u64) {
    let mut count = 0u64;
    let mut longest = 0u64;
    let mut current = 0u64;
    let mut previous: Option<NaiveDate> = None;
    for day in days {
        let consecutive = previous
            .and_then(|p| p.succ_opt())
            .is_some_and(|succ| succ == *day);
        if consecutive {
            current += 1;
        } else {
            count += 1;
            current = 1;
        }
        longest = longest.max(current);
        previous = Some(*day);
    }
    (count, longest)
}
