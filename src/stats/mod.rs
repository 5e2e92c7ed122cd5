//! Statistics over raster windows.
//!
//! ```text
//!   RasterWindow ──► band planes ──────────┐
//!        │                                 ├──► coverage filter ──► compute()
//!        └──► Expression::evaluate() ──────┘
//! ```
//!
//! Pixels outside the coverage mask (the region polygon) are dropped before
//! [`compute`] sees them, so they count neither as valid nor as masked.

mod engine;
mod expression;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::error::ExpressionError;
use crate::raster::RasterWindow;

pub use engine::{
    compute, BandStatistics, Histogram, StatisticsOptions, DEFAULT_HISTOGRAM_BINS,
    DEFAULT_PERCENTILES, MAX_HISTOGRAM_BINS,
};
pub use expression::Expression;

/// Labelled statistics in band (or expression) order.
///
/// Serializes as a JSON object keyed by label, preserving order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsMap {
    entries: Vec<(String, BandStatistics)>,
}

impl StatisticsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, stats: BandStatistics) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = stats,
            None => self.entries.push((label, stats)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&BandStatistics> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, s)| s)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BandStatistics)> {
        self.entries.iter().map(|(l, s)| (l.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for StatisticsMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, stats) in &self.entries {
            map.serialize_entry(label, stats)?;
        }
        map.end()
    }
}

/// Label used for a raw band.
pub fn band_label(index: usize) -> String {
    format!("b{}", index)
}

/// Compute statistics for every band of `window`, or for each expression
/// when any are given.
///
/// `coverage`, when present, must have one entry per pixel; pixels where it
/// is `false` are excluded from the result entirely.
pub fn summarize(
    window: &RasterWindow,
    coverage: Option<&[bool]>,
    expressions: &[Expression],
    options: &StatisticsOptions,
) -> Result<StatisticsMap, ExpressionError> {
    let mut result = StatisticsMap::new();

    if expressions.is_empty() {
        for (index, plane) in window.band_indexes.iter().zip(&window.bands) {
            let (samples, mask) = covered(plane, &window.mask, coverage);
            result.insert(band_label(*index), compute(&samples, &mask, options));
        }
        return Ok(result);
    }

    for expression in expressions {
        let (values, valid) = expression.evaluate(window)?;
        let (samples, mask) = covered(&values, &valid, coverage);
        result.insert(expression.text(), compute(&samples, &mask, options));
    }
    Ok(result)
}

fn covered(samples: &[f64], mask: &[bool], coverage: Option<&[bool]>) -> (Vec<f64>, Vec<bool>) {
    match coverage {
        None => (samples.to_vec(), mask.to_vec()),
        Some(coverage) => samples
            .iter()
            .zip(mask)
            .zip(coverage)
            .filter(|(_, inside)| **inside)
            .map(|((s, m), _)| (*s, *m))
            .unzip(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> RasterWindow {
        RasterWindow {
            width: 2,
            height: 2,
            band_indexes: vec![1, 3],
            bands: vec![vec![1.0, 2.0, 3.0, 4.0], vec![4.0, 4.0, 0.0, 8.0]],
            mask: vec![true, true, true, false],
        }
    }

    #[test]
    fn test_per_band_labels_and_order() {
        let stats = summarize(&window(), None, &[], &StatisticsOptions::default()).unwrap();
        assert_eq!(stats.labels().collect::<Vec<_>>(), vec!["b1", "b3"]);

        let b1 = stats.get("b1").unwrap();
        assert_eq!(b1.valid_pixels, 3);
        assert_eq!(b1.masked_pixels, 1);
        assert_eq!(b1.max, Some(3.0));

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.find("\"b1\"").unwrap() < json.find("\"b3\"").unwrap());
    }

    #[test]
    fn test_coverage_excludes_pixels() {
        let coverage = [true, false, true, true];
        let stats = summarize(&window(), Some(&coverage), &[], &StatisticsOptions::default())
            .unwrap();
        let b1 = stats.get("b1").unwrap();
        assert_eq!(b1.valid_pixels, 2);
        assert_eq!(b1.masked_pixels, 1);
        assert_eq!(b1.sum, Some(4.0));
    }

    #[test]
    fn test_expression_division_by_zero() {
        // b1 / b3: 0.25, 0.5, inf (3/0), masked
        let e = Expression::parse("b1 / b3").unwrap();
        let stats = summarize(&window(), None, &[e], &StatisticsOptions::default()).unwrap();
        let s = stats.get("b1 / b3").unwrap();

        assert_eq!(s.count, 2);
        assert_eq!(s.valid_pixels, 2);
        assert_eq!(s.masked_pixels, 2);
        assert_eq!(s.min, Some(0.25));
        assert_eq!(s.max, Some(f64::INFINITY));
        assert_eq!(s.mean, Some(0.375));
        assert_eq!(s.sum, Some(0.75));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["b1 / b3"]["max"], "Infinity");
        assert_eq!(json["b1 / b3"]["mean"], 0.375);
    }

    #[test]
    fn test_expression_zero_over_zero_is_invalid() {
        let w = RasterWindow {
            width: 3,
            height: 1,
            band_indexes: vec![1, 2],
            bands: vec![vec![0.0, 2.0, -2.0], vec![0.0, 0.0, 0.0]],
            mask: vec![true; 3],
        };
        let e = Expression::parse("b1 / b2").unwrap();
        let stats = summarize(&w, None, &[e], &StatisticsOptions::default()).unwrap();
        let s = stats.get("b1 / b2").unwrap();

        // no finite samples remain, but the unbounded extremes are reported
        assert_eq!(s.count, 0);
        assert_eq!(s.masked_pixels, 3);
        assert_eq!(s.min, Some(f64::NEG_INFINITY));
        assert_eq!(s.max, Some(f64::INFINITY));
        assert_eq!(s.mean, None);
        assert_eq!(s.median, None);
    }

    #[test]
    fn test_unknown_band_in_expression() {
        let e = Expression::parse("b2 * 2").unwrap();
        assert!(matches!(
            summarize(&window(), None, &[e], &StatisticsOptions::default()),
            Err(ExpressionError::UnknownBand { band: 2, .. })
        ));
    }
}
