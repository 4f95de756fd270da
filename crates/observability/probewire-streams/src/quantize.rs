//! Frequency distributions over bucketed values.
//!
//! A [`Quantizer`] keeps counts for a contiguous run of bucket indices.
//! Adding a value outside the run extends it to reach the new index, so the
//! index range never has gaps. The [`Scale`] decides which bucket a value
//! belongs to.

use probewire_core::{ProbeWireError, ProbeWireResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maps values to bucket indices and back
pub trait Scale: Send + Sync {
    /// Bucket of `value`, or `None` when the value is not counted
    fn value_index(&self, value: f64) -> Option<i64>;

    /// Lower bound of bucket `index`
    fn index_value(&self, index: i64) -> f64;
}

/// Power-of-two buckets.
///
/// Index `i > 0` holds `[2^(i-1), 2^i)`, index `0` holds `(-1, 1)` and
/// negative indices mirror the positive ones.
///
/// Fractions are not split further: `0.25` and `0.9` share bucket `0`.
/// Negative indices already belong to values at or below `-1`, so giving
/// fractions their own indices would put them in the buckets of negative
/// values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pow2;

impl Pow2 {
    fn magnitude_index(magnitude: f64) -> i64 {
        if magnitude < 1.0 {
            return 0;
        }
        // unbiased binary exponent equals floor(log2) for normal values >= 1
        let exponent = ((magnitude.to_bits() >> 52) & 0x7ff) as i64 - 1023;
        1 + exponent
    }
}

impl Scale for Pow2 {
    fn value_index(&self, value: f64) -> Option<i64> {
        if !value.is_finite() {
            return None;
        }
        if value < 0.0 {
            Some(-Self::magnitude_index(-value))
        } else {
            Some(Self::magnitude_index(value))
        }
    }

    fn index_value(&self, index: i64) -> f64 {
        match index {
            0 => 0.0,
            i => {
                let exponent = i32::try_from(i.unsigned_abs() - 1).unwrap_or(i32::MAX);
                f64::from(i.signum() as i32) * 2f64.powi(exponent)
            }
        }
    }
}

/// Fixed-width buckets between two bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    lower: f64,
    upper: f64,
    step: f64,
}

impl Linear {
    /// Buckets of `step` over `[lower, upper]`
    pub fn new(lower: f64, upper: f64, step: f64) -> ProbeWireResult<Self> {
        if !(step > 0.0) {
            return Err(ProbeWireError::config("step must be greater than 0"));
        }
        if !(upper > lower) {
            return Err(ProbeWireError::config("upper bound must be greater than lower bound"));
        }
        Ok(Self { lower, upper, step })
    }
}

impl Scale for Linear {
    fn value_index(&self, value: f64) -> Option<i64> {
        if !(self.lower..=self.upper).contains(&value) {
            return None;
        }
        Some(((value - self.lower) / self.step).ceil() as i64)
    }

    fn index_value(&self, index: i64) -> f64 {
        self.lower + index as f64 * self.step
    }
}

/// Counts per bucket over a contiguous index range
#[derive(Debug, Clone, PartialEq)]
pub struct Quantizer<S> {
    scale: S,
    counts: VecDeque<u64>,
    min_index: i64,
    max_count: u64,
}

impl<S: Scale> Quantizer<S> {
    /// Empty distribution over `scale`
    pub fn new(scale: S) -> Self {
        Self {
            scale,
            counts: VecDeque::new(),
            min_index: 0,
            max_count: 0,
        }
    }

    /// Count one value; values the scale rejects are ignored
    pub fn add(&mut self, value: f64) {
        let Some(index) = self.scale.value_index(value) else {
            return;
        };
        self.extend_to(index);
        let slot = usize::try_from(index - self.min_index).unwrap_or(0);
        if let Some(count) = self.counts.get_mut(slot) {
            *count += 1;
            self.max_count = self.max_count.max(*count);
        }
    }

    fn extend_to(&mut self, index: i64) {
        if self.counts.is_empty() {
            self.min_index = index;
            self.counts.push_back(0);
            return;
        }
        while index < self.min_index {
            self.counts.push_front(0);
            self.min_index -= 1;
        }
        while index > self.max_index_unchecked() {
            self.counts.push_back(0);
        }
    }

    fn max_index_unchecked(&self) -> i64 {
        self.min_index + self.counts.len() as i64 - 1
    }

    /// Count in bucket `index`; 0 outside the range
    #[must_use] pub fn count(&self, index: i64) -> u64 {
        if index < self.min_index {
            return 0;
        }
        usize::try_from(index - self.min_index)
            .ok()
            .and_then(|slot| self.counts.get(slot).copied())
            .unwrap_or(0)
    }

    /// Lowest bucket in range
    #[must_use] pub fn min_index(&self) -> Option<i64> {
        (!self.counts.is_empty()).then_some(self.min_index)
    }

    /// Highest bucket in range
    #[must_use] pub fn max_index(&self) -> Option<i64> {
        (!self.counts.is_empty()).then(|| self.max_index_unchecked())
    }

    /// Largest count in any bucket
    #[must_use] pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Number of counted values
    #[must_use] pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bucket of `value` under this distribution's scale
    #[must_use] pub fn value_index(&self, value: f64) -> Option<i64> {
        self.scale.value_index(value)
    }

    /// Lower bound of bucket `index`
    #[must_use] pub fn index_value(&self, index: i64) -> f64 {
        self.scale.index_value(index)
    }

    /// Serializable snapshot
    #[must_use] pub fn histogram(&self) -> Histogram {
        let buckets = self
            .counts
            .iter()
            .enumerate()
            .map(|(offset, &count)| {
                let index = self.min_index + offset as i64;
                Bucket { index, value: self.scale.index_value(index), count }
            })
            .collect();
        Histogram {
            min_index: self.min_index(),
            max_index: self.max_index(),
            max_count: self.max_count,
            buckets,
        }
    }
}

/// One histogram bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket index
    pub index: i64,
    /// Lower bound value of the bucket
    pub value: f64,
    /// Values counted
    pub count: u64,
}

/// Snapshot of a [`Quantizer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Histogram {
    /// Lowest index; absent when empty
    pub min_index: Option<i64>,
    /// Highest index; absent when empty
    pub max_index: Option<i64>,
    /// Largest bucket count
    pub max_count: u64,
    /// Buckets from `min_index` to `max_index`
    pub buckets: Vec<Bucket>,
}
