//! Shannon entropy over the character distribution of a sample.
//!
//! Counts are kept in a `BTreeMap` so the float summation order is stable.

use std::collections::BTreeMap;

/// Bits per character; 0.0 for empty input
pub fn shannon_entropy(sample: &str) -> f64 {
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    let mut total = 0usize;
    for c in sample.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }

    if total == 0 {
        return 0.0;
    }

    let len = total as f64;
    let mut entropy = 0.0f64;
    for &count in counts.values() {
        let p = count as f64 / len;
        entropy -= p * p.log2();
    }
    entropy
}
