//! Estimation drift: how far pre-call estimates are from reported usage.
//!
//! Each time the provider reports the real input token count, pair it with
//! the estimate made before the call. A mean ratio persistently above 1.0
//! means the estimator undercounts and the preventive threshold is eating
//! into its margin.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// Default undercount tolerance (20%) before a sample is logged as a warning.
pub const DEFAULT_UNDERCOUNT_TOLERANCE: f64 = 0.20;

/// One estimate/actual pair.
#[derive(Debug, Clone, Serialize)]
pub struct DriftSample {
    pub at: DateTime<Utc>,
    pub estimated: usize,
    pub actual: usize,
}

impl DriftSample {
    /// `actual / estimated`. Values above 1.0 are undercounts.
    pub fn ratio(&self) -> f64 {
        if self.estimated == 0 {
            if self.actual == 0 { 1.0 } else { f64::INFINITY }
        } else {
            self.actual as f64 / self.estimated as f64
        }
    }
}

/// Accumulates drift across a run.
///
/// Only running totals, the worst undercount and the latest sample are kept,
/// so memory stays constant however long the run.
#[derive(Debug)]
pub struct DriftTracker {
    count: usize,
    estimated_total: u128,
    actual_total: u128,
    worst: Option<DriftSample>,
    last: Option<DriftSample>,
    undercount_tolerance: f64,
}

impl Default for DriftTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DriftTracker {
    /// Create an empty tracker with the default 20% tolerance.
    pub fn new() -> Self {
        Self {
            count: 0,
            estimated_total: 0,
            actual_total: 0,
            worst: None,
            last: None,
            undercount_tolerance: DEFAULT_UNDERCOUNT_TOLERANCE,
        }
    }

    /// Override the fraction by which a sample may undercount before it is
    /// logged at `warn`.
    pub fn with_undercount_tolerance(mut self, tolerance: f64) -> Self {
        self.undercount_tolerance = tolerance;
        self
    }

    /// Record an estimate made before a call and the count the provider
    /// reported afterwards.
    pub fn record(&mut self, estimated: usize, actual: usize) -> &DriftSample {
        let sample = DriftSample {
            at: Utc::now(),
            estimated,
            actual,
        };
        let ratio = sample.ratio();

        if ratio > 1.0 + self.undercount_tolerance {
            warn!(
                estimated,
                actual,
                ratio,
                "Token estimate undercounts reported usage"
            );
        } else {
            debug!(estimated, actual, ratio, "Drift sample");
        }

        self.count += 1;
        self.estimated_total += estimated as u128;
        self.actual_total += actual as u128;
        if actual > estimated && self.worst.as_ref().is_none_or(|w| ratio > w.ratio()) {
            self.worst = Some(sample.clone());
        }
        self.last.insert(sample)
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<&DriftSample> {
        self.last.as_ref()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total actual tokens over total estimated tokens. `None` with no
    /// samples or when every estimate was zero.
    pub fn mean_ratio(&self) -> Option<f64> {
        (self.estimated_total > 0)
            .then(|| self.actual_total as f64 / self.estimated_total as f64)
    }

    /// The sample with the largest undercount, if any sample undercounted.
    pub fn worst_undercount(&self) -> Option<&DriftSample> {
        self.worst.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_has_no_ratio() {
        let tracker = DriftTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.mean_ratio(), None);
        assert!(tracker.worst_undercount().is_none());
    }

    #[test]
    fn mean_ratio_weights_by_tokens() {
        let mut tracker = DriftTracker::new();
        tracker.record(600, 888);
        tracker.record(400, 412);
        let mean = tracker.mean_ratio().unwrap();
        assert!((mean - 1.3).abs() < 1e-9);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn worst_undercount_picks_highest_ratio() {
        let mut tracker = DriftTracker::new().with_undercount_tolerance(0.5);
        tracker.record(100, 90);
        tracker.record(100, 150);
        tracker.record(100, 120);
        let worst = tracker.worst_undercount().unwrap();
        assert_eq!(worst.actual, 150);
    }

    #[test]
    fn overcounts_are_not_undercounts() {
        let mut tracker = DriftTracker::new();
        tracker.record(100, 80);
        assert!(tracker.worst_undercount().is_none());
        assert!(tracker.mean_ratio().unwrap() < 1.0);
    }

    #[test]
    fn zero_estimate_ratio() {
        let mut tracker = DriftTracker::new();
        assert_eq!(tracker.record(0, 0).ratio(), 1.0);
        assert!(tracker.record(0, 5).ratio().is_infinite());
        assert_eq!(tracker.mean_ratio(), None);
    }

    #[test]
    fn long_runs_keep_totals_and_worst_sample() {
        let mut tracker = DriftTracker::new().with_undercount_tolerance(10.0);
        for i in 0..10_000 {
            tracker.record(100, if i == 4_321 { 300 } else { 100 });
        }
        assert_eq!(tracker.len(), 10_000);
        let worst = tracker.worst_undercount().unwrap();
        assert_eq!(worst.actual, 300);
        let mean = tracker.mean_ratio().unwrap();
        assert!((mean - 1.0002).abs() < 1e-9);
        assert_eq!(tracker.last().unwrap().actual, 100);
    }
}
