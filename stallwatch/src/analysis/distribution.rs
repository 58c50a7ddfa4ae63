//! Count → percentage reductions.

// Percentage calculations intentionally convert usize to f64
#![allow(clippy::cast_precision_loss)]

use serde::Serialize;
use std::collections::BTreeMap;

/// One row of a distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Share<T> {
    pub value: T,

    pub count: usize,

    /// Percentage of all counted values (0.0 - 100.0).
    pub percentage: f64,
}

/// Count each distinct value and express it as a share of the total.
///
/// Rows are sorted by descending count, then by the value's own order, so
/// ties never depend on input order.
pub fn distribution<T: Ord>(values: impl IntoIterator<Item = T>) -> Vec<Share<T>> {
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    let mut total = 0usize;
    for value in values {
        *counts.entry(value).or_default() += 1;
        total += 1;
    }

    let mut shares: Vec<Share<T>> = counts
        .into_iter()
        .map(|(value, count)| Share {
            value,
            count,
            percentage: count as f64 * 100.0 / total as f64,
        })
        .collect();

    // Stable sort keeps the BTreeMap's value order among equal counts
    shares.sort_by(|a, b| b.count.cmp(&a.count));
    shares
}

/// `part / whole` as a percentage, or `None` when `whole` is not positive.
pub(crate) fn percent_of(part: f64, whole: f64) -> Option<f64> {
    (whole > 0.0).then(|| part * 100.0 / whole)
}
