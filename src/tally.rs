//! Accumulators used to fold analysis results together.
//!
//! Every value is stored as an integer count of 1/10_000 units. Integer
//! addition is associative and commutative, so an accumulator produces the
//! same totals for any order in which its inputs arrive. Published values are
//! already rounded to 4 decimals, so the conversion is exact for them.
//! Sums saturate at `i64::MAX` units instead of overflowing.

use std::collections::HashMap;

use crate::models::{round4, KeywordWeight};

const UNITS_PER_ONE: f64 = 10_000.0;

fn to_units(value: f64) -> i64 {
    // `as` saturates on overflow and maps NaN to zero.
    (value * UNITS_PER_ONE).round() as i64
}

fn from_units(units: i64) -> f64 {
    units as f64 / UNITS_PER_ONE
}

/// Running sum and count of scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedSum {
    units: i64,
    count: u64,
}

impl FixedSum {
    pub fn add(&mut self, value: f64) {
        self.units = self.units.saturating_add(to_units(value));
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean rounded to 4 decimals, `None` when nothing was added.
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(round4(from_units(self.units) / self.count as f64))
    }
}

/// Keyword weights summed by word.
///
/// Adding the same word twice adds its weights. Negative and non-finite
/// weights count as zero.
#[derive(Debug, Clone, Default)]
pub struct WeightMap {
    weights: HashMap<String, i64>,
}

impl WeightMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, word: &str, weight: f64) {
        let units = to_units(weight).max(0);
        let total = self.weights.entry(word.to_string()).or_insert(0);
        *total = total.saturating_add(units);
    }

    pub fn extend<'a>(&mut self, keywords: impl IntoIterator<Item = &'a KeywordWeight>) {
        for keyword in keywords {
            self.add(&keyword.word, keyword.weight);
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// The `limit` heaviest words, heaviest first. Equal weights are ordered
    /// by word so the result does not depend on insertion order.
    pub fn top(&self, limit: usize) -> Vec<KeywordWeight> {
        let mut ranked: Vec<(&String, i64)> = self
            .weights
            .iter()
            .map(|(word, units)| (word, *units))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        ranked
            .into_iter()
            .take(limit)
            .map(|(word, units)| KeywordWeight::new(word.clone(), from_units(units)))
            .collect()
    }
}
