//! Candidate scoring: PMI cohesion, neighbor entropy, and competitive
//! demotion of parts against the phrases that contain them.

use std::collections::HashMap;

use crate::constants::{
    BIGRAM_UNIGRAM_PENALTY, ENTROPY_BETA, MIN_PHRASE_FREQ, MIN_PMI, PMI_ALPHA, TRIGRAM_BIGRAM_PENALTY,
    TRIGRAM_GAMMA, TRIGRAM_UNIGRAM_PENALTY, UNIGRAM_DELTA, WHITELIST_BONUS,
};
use crate::stats::recount::CandidateStats;
use crate::tokenize::WHITELIST;

/// One ranked trend entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub token: String,
    pub n: usize,
    pub freq: u64,
    /// Cohesion PMI that went into the score. Zero for unigrams.
    pub pmi: f64,
    /// Shannon entropy of the left-neighbor distribution. Zero for unigrams.
    pub left_entropy: f64,
    /// Shannon entropy of the right-neighbor distribution. Zero for unigrams.
    pub right_entropy: f64,
    pub score: f64,
}

/// Scores the recounted candidates against the corpus size. Entries with a
/// non-positive final score are dropped. Ordering is total: score, then
/// frequency, then order, then token.
#[must_use]
pub fn score_candidates(
    counts: &HashMap<String, CandidateStats>,
    total_tokens: u64,
) -> Vec<ScoredEntry> {
    if total_tokens == 0 {
        return Vec::new();
    }
    let total = total_tokens as f64;
    let mut scores: HashMap<&str, (f64, f64)> = HashMap::new();

    // Base (score, pmi) per candidate.
    for (gram, stats) in counts {
        let (score, pmi) = match stats.n {
            1 => (stats.freq as f64 * UNIGRAM_DELTA, 0.0),
            2 => bigram_score(gram, stats, counts, total),
            3 => trigram_score(gram, stats, counts, total),
            _ => (0.0, 0.0),
        };
        let score = if score > 0.0 && is_whitelisted(gram) {
            score * WHITELIST_BONUS
        } else {
            score
        };
        scores.insert(gram.as_str(), (score, pmi));
    }

    // Competitive pass: a phrase that earned a score demotes its parts, so a
    // word carried mostly by one phrase does not also rank on its own.
    let mut penalties: HashMap<String, f64> = HashMap::new();
    for (gram, stats) in counts {
        if scores.get(gram.as_str()).map_or(0.0, |(score, _)| *score) <= 0.0 {
            continue;
        }
        let parts: Vec<&str> = gram.split(' ').collect();
        match stats.n {
            2 => {
                for part in &parts {
                    *penalties.entry((*part).to_owned()).or_insert(1.0) *= BIGRAM_UNIGRAM_PENALTY;
                }
            }
            3 => {
                for part in &parts {
                    *penalties.entry((*part).to_owned()).or_insert(1.0) *= TRIGRAM_UNIGRAM_PENALTY;
                }
                for pair in [
                    format!("{} {}", parts[0], parts[1]),
                    format!("{} {}", parts[1], parts[2]),
                ] {
                    *penalties.entry(pair).or_insert(1.0) *= TRIGRAM_BIGRAM_PENALTY;
                }
            }
            _ => {}
        }
    }
    for (gram, factor) in &penalties {
        if let Some((score, _)) = scores.get_mut(gram.as_str()) {
            *score *= factor;
        }
    }

    let mut entries: Vec<ScoredEntry> = counts
        .iter()
        .filter_map(|(gram, stats)| {
            let (score, pmi) = scores.get(gram.as_str()).copied().unwrap_or((0.0, 0.0));
            (score > 0.0).then(|| ScoredEntry {
                token: gram.clone(),
                n: stats.n,
                freq: stats.freq,
                pmi,
                left_entropy: entropy(&stats.left),
                right_entropy: entropy(&stats.right),
                score,
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.freq.cmp(&a.freq))
            .then_with(|| a.n.cmp(&b.n))
            .then_with(|| a.token.cmp(&b.token))
    });
    entries
}

fn freq_of(counts: &HashMap<String, CandidateStats>, gram: &str) -> Option<f64> {
    counts
        .get(gram)
        .map(|stats| stats.freq as f64)
        .filter(|f| *f > 0.0)
}

fn bigram_score(
    gram: &str,
    stats: &CandidateStats,
    counts: &HashMap<String, CandidateStats>,
    total: f64,
) -> (f64, f64) {
    if stats.freq < MIN_PHRASE_FREQ {
        return (0.0, 0.0);
    }
    let mut parts = gram.split(' ');
    let (Some(a), Some(b)) = (parts.next(), parts.next()) else {
        return (0.0, 0.0);
    };
    let (Some(fa), Some(fb)) = (freq_of(counts, a), freq_of(counts, b)) else {
        return (0.0, 0.0);
    };
    let pmi = ((stats.freq as f64 * total) / (fa * fb)).log2();
    (phrase_score(stats, pmi, 1.0), pmi)
}

fn trigram_score(
    gram: &str,
    stats: &CandidateStats,
    counts: &HashMap<String, CandidateStats>,
    total: f64,
) -> (f64, f64) {
    if stats.freq < MIN_PHRASE_FREQ {
        return (0.0, 0.0);
    }
    let parts: Vec<&str> = gram.split(' ').collect();
    if parts.len() != 3 {
        return (0.0, 0.0);
    }
    let freq = stats.freq as f64;
    let left_pair = format!("{} {}", parts[0], parts[1]);
    let right_pair = format!("{} {}", parts[1], parts[2]);

    // Cohesion against both bracketings, averaged.
    let split_left = match (freq_of(counts, &left_pair), freq_of(counts, parts[2])) {
        (Some(fab), Some(fc)) => Some(((freq * total) / (fab * fc)).log2()),
        _ => None,
    };
    let split_right = match (freq_of(counts, parts[0]), freq_of(counts, &right_pair)) {
        (Some(fa), Some(fbc)) => Some(((freq * total) / (fa * fbc)).log2()),
        _ => None,
    };
    let bracketed: Vec<f64> = [split_left, split_right].into_iter().flatten().collect();
    let mut pmi = if bracketed.is_empty() {
        f64::NEG_INFINITY
    } else {
        bracketed.iter().sum::<f64>() / bracketed.len() as f64
    };
    if bracketed.iter().all(|p| *p <= 0.0) {
        // Only when no bracketing shows cohesion on its own: fall back to
        // pointwise independence of all three words.
        let unigram_freqs: Option<Vec<f64>> =
            parts.iter().map(|p| freq_of(counts, p)).collect();
        if let Some(freqs) = unigram_freqs {
            pmi = ((freq * total * total) / freqs.iter().product::<f64>()).log2();
        }
    }
    (phrase_score(stats, pmi, TRIGRAM_GAMMA), pmi)
}

fn phrase_score(stats: &CandidateStats, pmi: f64, boost: f64) -> f64 {
    if !pmi.is_finite() || pmi < MIN_PMI {
        return 0.0;
    }
    let entropy = min_neighbor_entropy(stats);
    stats.freq as f64 * (1.0 + PMI_ALPHA * pmi) * (1.0 + ENTROPY_BETA * entropy) * boost
}

/// Shannon entropy of the less diverse neighbor side. A phrase locked between
/// the same neighbors is a fragment of something longer, not a unit.
fn min_neighbor_entropy(stats: &CandidateStats) -> f64 {
    entropy(&stats.left).min(entropy(&stats.right))
}

fn entropy(distribution: &HashMap<String, u64>) -> f64 {
    let total: u64 = distribution.values().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    distribution
        .values()
        .filter(|count| **count > 0)
        .map(|count| {
            let p = *count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn is_whitelisted(gram: &str) -> bool {
    gram.split(' ').all(|part| WHITELIST.contains(part))
}
