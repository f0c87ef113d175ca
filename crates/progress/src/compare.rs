//! Baseline/current comparison and trend classification.
//!
//! Everything here is pure. Every measurement family reaches these functions
//! through the same normalized shape: two `Reading`s and a `ScoringProfile`.

use clinitrack_core::{
    ComparisonResult, MeasureDefinition, MeasureKey, MeasurementRecord, Reading,
    ScoringProfile, Trend,
};
use crate::config::SignificancePolicy;

/// Trend label plus significance flag for one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Trend label
    pub trend: Trend,
    /// Whether the change reached the threshold
    pub meets_significance: bool,
}

/// Classify a signed change.
///
/// - threshold present, `|delta| < threshold`: stable, not significant
/// - threshold present, `|delta| >= threshold`: direction decides, significant
/// - no threshold, `delta == 0`: stable
/// - no threshold, `delta != 0`: direction decides, not significant
pub fn classify(delta: f64, higher_is_better: bool, threshold: Option<f64>) -> Classification {
    let directional = || {
        if (delta > 0.0) == higher_is_better {
            Trend::Improved
        } else {
            Trend::Declined
        }
    };

    if delta == 0.0 {
        return Classification { trend: Trend::Stable, meets_significance: false };
    }

    match threshold {
        Some(t) if !reaches(delta.abs(), t) => Classification { trend: Trend::Stable, meets_significance: false },
        Some(_) => Classification { trend: directional(), meets_significance: true },
        None => Classification { trend: directional(), meets_significance: false },
    }
}

/// `magnitude >= threshold`, allowing for the rounding left by subtracting
/// two decimal readings (7.3 - 4.4 is 2.8999999999999995).
fn reaches(magnitude: f64, threshold: f64) -> bool {
    const ROUNDING_ULPS: f64 = 4.0;
    magnitude + magnitude.max(threshold) * f64::EPSILON * ROUNDING_ULPS >= threshold
}

/// Build the normalized profile for a definition.
pub fn profile_for(definition: &MeasureDefinition, policy: SignificancePolicy) -> ScoringProfile {
    ScoringProfile {
        higher_is_better: definition.higher_is_better,
        threshold: policy.threshold_for(definition),
        mdc: definition.mdc,
    }
}

/// Compare a current reading against an optional baseline.
///
/// Without a baseline the result is the `first_record` terminal state: no
/// change, no percentage, never significant.
pub fn compare(
    measure_key: &MeasureKey,
    baseline: Option<Reading>,
    current: Reading,
    profile: &ScoringProfile,
) -> ComparisonResult {
    let Some(baseline) = baseline else {
        return ComparisonResult {
            measure_key: measure_key.clone(),
            baseline_value: None,
            current_value: current.value,
            change: None,
            percent_change: None,
            threshold: profile.threshold,
            meets_significance: false,
            exceeds_mdc: false,
            trend: Trend::FirstRecord,
            baseline_recorded_at: None,
            current_recorded_at: current.recorded_at,
        };
    };

    let delta = current.value - baseline.value;
    let percent_change = if baseline.value != 0.0 {
        Some(delta / baseline.value.abs() * 100.0)
    } else {
        None
    };
    let classification = classify(delta, profile.higher_is_better, profile.threshold);

    ComparisonResult {
        measure_key: measure_key.clone(),
        baseline_value: Some(baseline.value),
        current_value: current.value,
        change: Some(delta),
        percent_change,
        threshold: profile.threshold,
        meets_significance: classification.meets_significance,
        exceeds_mdc: profile.mdc.map_or(false, |mdc| delta.abs() >= mdc),
        trend: classification.trend,
        baseline_recorded_at: baseline.recorded_at,
        current_recorded_at: current.recorded_at,
    }
}

/// Compare two stored records. The same record on both sides is a first record.
pub fn compare_records(
    baseline: Option<&MeasurementRecord>,
    current: &MeasurementRecord,
    profile: &ScoringProfile,
) -> ComparisonResult {
    let baseline = baseline
        .filter(|b| b.id != current.id)
        .map(|b| Reading::at(b.value, b.recorded_at));
    compare(
        &current.measure_key,
        baseline,
        Reading::at(current.value, current.recorded_at),
        profile,
    )
}

/// Compare the first and last entries of an ascending history.
///
/// Returns `None` for an empty history.
pub fn compare_history(history: &[MeasurementRecord], profile: &ScoringProfile) -> Option<ComparisonResult> {
    let current = history.last()?;
    Some(compare_records(history.first(), current, profile))
}
