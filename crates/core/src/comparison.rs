//! Comparison model - baseline vs. current for one measure.

use serde::{Deserialize, Serialize};
use crate::id::MeasureKey;
use crate::Time;

/// Classification of a change relative to the measure's improvement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Moved in the clinically better direction
    Improved,
    /// Moved in the clinically worse direction
    Declined,
    /// No change, or change below the applicable threshold
    Stable,
    /// Only one reading exists; nothing to compare against
    FirstRecord,
}

impl Trend {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improved => "improved",
            Trend::Declined => "declined",
            Trend::Stable => "stable",
            Trend::FirstRecord => "first_record",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value on the time line, stripped of its family-specific shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Numeric value
    pub value: f64,

    /// When it was taken, if known
    pub recorded_at: Option<Time>,
}

impl Reading {
    /// A reading with no timestamp.
    pub fn new(value: f64) -> Self {
        Self { value, recorded_at: None }
    }

    /// A reading taken at `at`.
    pub fn at(value: f64, at: Time) -> Self {
        Self { value, recorded_at: Some(at) }
    }
}

/// The normalized `{direction, threshold}` pair every family reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringProfile {
    /// Whether higher values are clinically better
    pub higher_is_better: bool,

    /// Significance threshold (MCID, MDC, or a clinician override)
    pub threshold: Option<f64>,

    /// Minimal detectable change, reported separately from significance
    pub mdc: Option<f64>,
}

impl ScoringProfile {
    /// Profile with a direction and no thresholds.
    pub fn new(higher_is_better: bool) -> Self {
        Self {
            higher_is_better,
            threshold: None,
            mdc: None,
        }
    }

    /// Set the significance threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set the MDC.
    pub fn with_mdc(mut self, mdc: f64) -> Self {
        self.mdc = Some(mdc);
        self
    }
}

/// Derived comparison between a baseline and a current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Measure compared
    pub measure_key: MeasureKey,

    /// Baseline value; absent for a first record
    pub baseline_value: Option<f64>,

    /// Current value
    pub current_value: f64,

    /// Signed change (current - baseline)
    pub change: Option<f64>,

    /// Change as a percentage of |baseline|; absent when baseline is zero
    pub percent_change: Option<f64>,

    /// Threshold the change was tested against
    pub threshold: Option<f64>,

    /// Whether |change| reached the threshold
    pub meets_significance: bool,

    /// Whether |change| reached the MDC
    pub exceeds_mdc: bool,

    /// Trend label
    pub trend: Trend,

    /// When the baseline was taken
    pub baseline_recorded_at: Option<Time>,

    /// When the current value was taken
    pub current_recorded_at: Option<Time>,
}

impl ComparisonResult {
    /// Whether this result is a single-reading terminal state.
    pub fn is_first_record(&self) -> bool {
        self.trend == Trend::FirstRecord
    }
}

/// Aggregate counts over a batch of comparisons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Number of items
    pub total: usize,
    /// Items trending better
    pub improved: usize,
    /// Items trending worse
    pub declined: usize,
    /// Items without meaningful change
    pub stable: usize,
    /// Items with no prior reading
    pub first_record: usize,
    /// Items meeting their significance threshold
    pub significant: usize,
}

impl ProgressSummary {
    /// Tally a batch of results.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ComparisonResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            match result.trend {
                Trend::Improved => summary.improved += 1,
                Trend::Declined => summary.declined += 1,
                Trend::Stable => summary.stable += 1,
                Trend::FirstRecord => summary.first_record += 1,
            }
            if result.meets_significance {
                summary.significant += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(trend: Trend, significant: bool) -> ComparisonResult {
        ComparisonResult {
            measure_key: MeasureKey::new("x"),
            baseline_value: Some(1.0),
            current_value: 2.0,
            change: Some(1.0),
            percent_change: Some(100.0),
            threshold: None,
            meets_significance: significant,
            exceeds_mdc: false,
            trend,
            baseline_recorded_at: None,
            current_recorded_at: None,
        }
    }

    #[test]
    fn test_trend_serializes_snake_case() {
        let json = serde_json::to_string(&Trend::FirstRecord).unwrap();
        assert_eq!(json, "\"first_record\"");
        assert_eq!(Trend::Improved.to_string(), "improved");
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            result(Trend::Improved, true),
            result(Trend::Improved, false),
            result(Trend::Declined, true),
            result(Trend::Stable, false),
            result(Trend::FirstRecord, false),
        ];
        let summary = ProgressSummary::from_results(&results);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.improved, 2);
        assert_eq!(summary.declined, 1);
        assert_eq!(summary.stable, 1);
        assert_eq!(summary.first_record, 1);
        assert_eq!(summary.significant, 2);
    }
}
