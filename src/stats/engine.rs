//! Summary statistics over a masked sample array.
//!
//! [`compute`] is total: any input, including an empty or fully masked
//! array, produces a [`BandStatistics`]. Statistics that need at least one
//! valid sample are `None` when there is none, which keeps "no data" apart
//! from "all zeros".
//!
//! Sample handling:
//!
//! | sample                | counted | min / max | other aggregates |
//! |-----------------------|---------|-----------|------------------|
//! | finite, mask = true   | yes     | yes       | yes              |
//! | ±inf, mask = true     | no      | yes       | no               |
//! | NaN or mask = false   | no      | no        | no               |

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Default percentiles reported with every result.
pub const DEFAULT_PERCENTILES: [f64; 2] = [2.0, 98.0];

/// Default number of histogram buckets.
pub const DEFAULT_HISTOGRAM_BINS: usize = 10;

/// Upper bound on continuous histogram buckets.
pub const MAX_HISTOGRAM_BINS: usize = 10_000;

/// Options for [`compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsOptions {
    /// Percentiles in `[0, 100]`
    pub percentiles: Vec<f64>,

    pub histogram_bins: usize,

    /// Explicit histogram range; derived from the data when `None`
    pub histogram_range: Option<(f64, f64)>,

    /// Treat samples as category codes
    pub categorical: bool,

    /// Categories to report in categorical mode; every distinct value when
    /// `None`
    pub categories: Option<Vec<f64>>,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            histogram_range: None,
            categorical: false,
            categories: None,
        }
    }
}

/// Bucket counts and edges.
///
/// Continuous mode has `counts.len() + 1` edges; categorical mode has one
/// edge (the category value) per count.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub counts: Vec<u64>,
    pub edges: Vec<f64>,
}

/// Statistics of one band or expression.
#[derive(Debug, Clone, PartialEq)]
pub struct BandStatistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Number of valid samples
    pub count: u64,
    pub sum: Option<f64>,
    pub std: Option<f64>,
    pub median: Option<f64>,
    pub majority: Option<f64>,
    pub minority: Option<f64>,
    pub unique: u64,
    pub histogram: Histogram,
    pub valid_percent: f64,
    pub masked_pixels: u64,
    pub valid_pixels: u64,
    /// `(p, value)` in the order requested
    pub percentiles: Vec<(f64, Option<f64>)>,
}

impl BandStatistics {
    /// Value of percentile `p`, if it was requested and defined.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|(q, _)| *q == p)
            .and_then(|(_, v)| *v)
    }
}

/// JSON number, `null` for undefined/NaN, `"Infinity"` / `"-Infinity"` for
/// unbounded values.
struct StatValue(Option<f64>);

impl Serialize for StatValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) if v.is_nan() => serializer.serialize_none(),
            Some(v) if v == f64::INFINITY => serializer.serialize_str("Infinity"),
            Some(v) if v == f64::NEG_INFINITY => serializer.serialize_str("-Infinity"),
            Some(v) => serializer.serialize_f64(v),
            None => serializer.serialize_none(),
        }
    }
}

impl Serialize for Histogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.counts, &self.edges).serialize(serializer)
    }
}

impl Serialize for BandStatistics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(14 + self.percentiles.len()))?;
        map.serialize_entry("min", &StatValue(self.min))?;
        map.serialize_entry("max", &StatValue(self.max))?;
        map.serialize_entry("mean", &StatValue(self.mean))?;
        map.serialize_entry("count", &self.count)?;
        map.serialize_entry("sum", &StatValue(self.sum))?;
        map.serialize_entry("std", &StatValue(self.std))?;
        map.serialize_entry("median", &StatValue(self.median))?;
        map.serialize_entry("majority", &StatValue(self.majority))?;
        map.serialize_entry("minority", &StatValue(self.minority))?;
        map.serialize_entry("unique", &self.unique)?;
        map.serialize_entry("histogram", &self.histogram)?;
        map.serialize_entry("valid_percent", &self.valid_percent)?;
        map.serialize_entry("masked_pixels", &self.masked_pixels)?;
        map.serialize_entry("valid_pixels", &self.valid_pixels)?;
        for (p, value) in &self.percentiles {
            map.serialize_entry(&format!("percentile_{}", p), &StatValue(*value))?;
        }
        map.end()
    }
}

// =============================================================================
// Computation
// =============================================================================

/// Compute statistics over `samples` where `mask` is true.
///
/// `mask` shorter than `samples` treats the missing entries as masked.
pub fn compute(samples: &[f64], mask: &[bool], options: &StatisticsOptions) -> BandStatistics {
    let total = samples.len() as u64;

    let mut values = Vec::with_capacity(samples.len());
    let mut extreme_min = f64::INFINITY;
    let mut extreme_max = f64::NEG_INFINITY;
    let mut saw_infinite = false;
    for (i, &v) in samples.iter().enumerate() {
        if !mask.get(i).copied().unwrap_or(false) || v.is_nan() {
            continue;
        }
        if v.is_infinite() {
            saw_infinite = true;
            extreme_min = extreme_min.min(v);
            extreme_max = extreme_max.max(v);
        } else {
            values.push(v);
        }
    }
    values.sort_by(f64::total_cmp);

    let n = values.len();
    let valid = n as u64;
    let valid_percent = if total == 0 {
        0.0
    } else {
        valid as f64 / total as f64 * 100.0
    };

    let (min, max) = match (values.first(), values.last()) {
        (Some(&lo), Some(&hi)) => (Some(lo.min(extreme_min)), Some(hi.max(extreme_max))),
        _ if saw_infinite => (Some(extreme_min), Some(extreme_max)),
        _ => (None, None),
    };

    let histogram = if options.categorical {
        categorical_histogram(&values, options.categories.as_deref())
    } else {
        continuous_histogram(&values, options.histogram_bins, options.histogram_range)
    };
    let (majority, minority) = if options.categorical {
        value_extremes(&values)
    } else {
        bucket_extremes(&histogram)
    };

    let percentiles = options
        .percentiles
        .iter()
        .map(|&p| (p, percentile(&values, p)))
        .collect();

    if n == 0 {
        return BandStatistics {
            min,
            max,
            mean: None,
            count: 0,
            sum: None,
            std: None,
            median: None,
            majority: None,
            minority: None,
            unique: 0,
            histogram,
            valid_percent,
            masked_pixels: total,
            valid_pixels: 0,
            percentiles,
        };
    }

    let sum: f64 = values.iter().sum();
    let mean = sum / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

    BandStatistics {
        min,
        max,
        mean: Some(mean),
        count: valid,
        sum: Some(sum),
        std: Some(variance.sqrt()),
        median: percentile(&values, 50.0),
        majority,
        minority,
        unique: count_distinct(&values),
        histogram,
        valid_percent,
        masked_pixels: total - valid,
        valid_pixels: valid,
        percentiles,
    }
}

/// Linear interpolation between closest ranks over sorted `values`.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = p.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

fn count_distinct(sorted: &[f64]) -> u64 {
    let mut count = 0;
    let mut last = None;
    for &v in sorted {
        if last != Some(v) {
            count += 1;
            last = Some(v);
        }
    }
    count
}

/// Equal-width buckets: bucket `i` holds `[edge_i, edge_{i+1})`, the last
/// bucket also holds its upper edge. Values outside the range are ignored.
fn continuous_histogram(sorted: &[f64], bins: usize, range: Option<(f64, f64)>) -> Histogram {
    let bins = bins.clamp(1, MAX_HISTOGRAM_BINS);
    let (mut lo, mut hi) = match (range, sorted.first(), sorted.last()) {
        (Some(range), _, _) => range,
        (None, Some(&lo), Some(&hi)) => (lo, hi),
        _ => (0.0, 1.0),
    };
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }

    let width = (hi - lo) / bins as f64;
    let mut edges: Vec<f64> = (0..bins).map(|i| lo + i as f64 * width).collect();
    edges.push(hi);

    let mut counts = vec![0u64; bins];
    for &v in sorted {
        if v < lo || v > hi {
            continue;
        }
        let mut bucket = (((v - lo) / (hi - lo)) * bins as f64) as usize;
        bucket = bucket.min(bins - 1);
        // Rounding can put a value one bucket off its edges
        if v < edges[bucket] {
            bucket -= 1;
        } else if bucket + 1 < bins && v >= edges[bucket + 1] {
            bucket += 1;
        }
        counts[bucket] += 1;
    }

    Histogram { counts, edges }
}

fn categorical_histogram(sorted: &[f64], categories: Option<&[f64]>) -> Histogram {
    let edges: Vec<f64> = match categories {
        Some(categories) => categories.to_vec(),
        None => {
            let mut distinct: Vec<f64> = sorted.to_vec();
            distinct.dedup();
            distinct
        }
    };
    let counts = edges
        .iter()
        .map(|&c| {
            let start = sorted.partition_point(|&v| v < c);
            let end = sorted.partition_point(|&v| v <= c);
            (end - start) as u64
        })
        .collect();
    Histogram { counts, edges }
}

/// Most and least frequent exact values; ties go to the lower value.
fn value_extremes(sorted: &[f64]) -> (Option<f64>, Option<f64>) {
    let mut majority: Option<(f64, usize)> = None;
    let mut minority: Option<(f64, usize)> = None;

    let mut i = 0;
    while i < sorted.len() {
        let v = sorted[i];
        let run = sorted[i..].iter().take_while(|&&x| x == v).count();
        if majority.map_or(true, |(_, c)| run > c) {
            majority = Some((v, run));
        }
        if minority.map_or(true, |(_, c)| run < c) {
            minority = Some((v, run));
        }
        i += run;
    }
    (majority.map(|m| m.0), minority.map(|m| m.0))
}

/// Centers of the most and least populated non-empty buckets.
fn bucket_extremes(histogram: &Histogram) -> (Option<f64>, Option<f64>) {
    let mut majority: Option<(usize, u64)> = None;
    let mut minority: Option<(usize, u64)> = None;
    for (i, &count) in histogram.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        if majority.map_or(true, |(_, c)| count > c) {
            majority = Some((i, count));
        }
        if minority.map_or(true, |(_, c)| count < c) {
            minority = Some((i, count));
        }
    }
    let center = |i: usize| (histogram.edges[i] + histogram.edges[i + 1]) / 2.0;
    (majority.map(|m| center(m.0)), minority.map(|m| center(m.0)))
}
