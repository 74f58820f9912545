//! Count-Min Sketch over token strings.
//!
//! Every shard uses the same seeds and geometry, so sketches from different
//! shards are cell-wise addable and their estimates comparable. Estimates
//! never undercount; collisions only inflate.

use serde::{Deserialize, Serialize};

use crate::constants::{CMS_DEPTH, CMS_SEEDS, CMS_WIDTH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountMinSketch {
    width: usize,
    rows: Vec<Vec<u32>>,
}

impl Default for CountMinSketch {
    fn default() -> Self {
        Self::new()
    }
}

impl CountMinSketch {
    #[must_use]
    pub fn new() -> Self {
        Self::with_width(CMS_WIDTH)
    }

    /// `width` must be a power of two; indexing masks rather than divides.
    #[must_use]
    pub fn with_width(width: usize) -> Self {
        debug_assert!(width.is_power_of_two());
        Self {
            width,
            rows: vec![vec![0u32; width]; CMS_DEPTH],
        }
    }

    pub fn add(&mut self, token: &str) {
        let mask = self.width - 1;
        for (row, seed) in self.rows.iter_mut().zip(CMS_SEEDS) {
            let index = (hash_token(token, seed) as usize) & mask;
            row[index] = row[index].saturating_add(1);
        }
    }

    /// Point estimate: the minimum across rows.
    #[must_use]
    pub fn estimate(&self, token: &str) -> u64 {
        let mask = self.width - 1;
        self.rows
            .iter()
            .zip(CMS_SEEDS)
            .map(|(row, seed)| u64::from(row[(hash_token(token, seed) as usize) & mask]))
            .min()
            .unwrap_or(0)
    }

    /// Cell-wise sum. Panics in debug builds on geometry mismatch; identical
    /// geometry is a construction invariant.
    pub fn merge_from(&mut self, other: &Self) {
        debug_assert_eq!(self.width, other.width);
        for (mine, theirs) in self.rows.iter_mut().zip(&other.rows) {
            for (cell, add) in mine.iter_mut().zip(theirs) {
                *cell = cell.saturating_add(*add);
            }
        }
    }
}

/// Seeded multiplicative hash over UTF-16 code units. Operating on code units
/// rather than bytes keeps CJK single-character tokens well distributed.
#[must_use]
pub fn hash_token(token: &str, seed: u32) -> u32 {
    let mut hash = seed;
    for unit in token.encode_utf16() {
        hash = (hash ^ u32::from(unit)).wrapping_mul(0x5bd1_e995);
        hash ^= hash >> 13;
    }
    (hash ^ (hash >> 15)).wrapping_mul(0x5bd1_e995)
}
