//! Measure definitions - static reference data per measure-key.

use serde::{Deserialize, Serialize};
use crate::id::MeasureKey;

/// Family a measure belongs to.
///
/// All families share the same comparison shape; they differ only in how a
/// domain reading is turned into a measure-key and a numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureFamily {
    /// Standardized questionnaire or scale (VAS, ODI, LEFS, ...)
    OutcomeMeasure,
    /// Goniometric range of motion in degrees
    RangeOfMotion,
    /// Manual muscle test grade (0-5 with +/- modifiers)
    ManualMuscleTest,
    /// Timed or counted performance test (TUG, 6MWT, ...)
    FunctionalTest,
    /// Protocol assignment adherence percentage
    ProtocolAdherence,
}

impl MeasureFamily {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureFamily::OutcomeMeasure => "outcome_measure",
            MeasureFamily::RangeOfMotion => "range_of_motion",
            MeasureFamily::ManualMuscleTest => "manual_muscle_test",
            MeasureFamily::FunctionalTest => "functional_test",
            MeasureFamily::ProtocolAdherence => "protocol_adherence",
        }
    }
}

/// Static metadata for one measure-key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureDefinition {
    /// Key this definition describes
    pub key: MeasureKey,

    /// Measure family
    pub family: MeasureFamily,

    /// Display label
    pub label: String,

    /// Unit shown next to values ("pts", "deg", "s", ...)
    pub unit: String,

    /// Minimum plausible value (inclusive)
    pub min_value: f64,

    /// Maximum plausible value (inclusive)
    pub max_value: f64,

    /// Whether higher values are clinically better
    pub higher_is_better: bool,

    /// Minimal clinically important difference
    pub mcid: Option<f64>,

    /// Minimal detectable change
    pub mdc: Option<f64>,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MeasureDefinition {
    /// Create a definition without thresholds.
    pub fn new(
        key: impl Into<MeasureKey>,
        family: MeasureFamily,
        label: impl Into<String>,
        unit: impl Into<String>,
        range: (f64, f64),
        higher_is_better: bool,
    ) -> Self {
        Self {
            key: key.into(),
            family,
            label: label.into(),
            unit: unit.into(),
            min_value: range.0,
            max_value: range.1,
            higher_is_better,
            mcid: None,
            mdc: None,
            description: None,
        }
    }

    /// Set the MCID.
    pub fn with_mcid(mut self, mcid: f64) -> Self {
        self.mcid = Some(mcid);
        self
    }

    /// Set the MDC.
    pub fn with_mdc(mut self, mdc: f64) -> Self {
        self.mdc = Some(mdc);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether `value` lies within the plausible bounds.
    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min_value && value <= self.max_value
    }

    /// Check the definition itself is coherent.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("measure key must not be empty".to_string());
        }
        if !(self.min_value.is_finite() && self.max_value.is_finite()) {
            return Err(format!("{}: bounds must be finite", self.key));
        }
        if self.min_value >= self.max_value {
            return Err(format!(
                "{}: min {} must be below max {}",
                self.key, self.min_value, self.max_value
            ));
        }
        for (name, threshold) in [("mcid", self.mcid), ("mdc", self.mdc)] {
            if let Some(t) = threshold {
                if !t.is_finite() || t <= 0.0 {
                    return Err(format!("{}: {} must be a positive number", self.key, name));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vas() -> MeasureDefinition {
        MeasureDefinition::new("vas_pain", MeasureFamily::OutcomeMeasure, "VAS pain", "pts", (0.0, 10.0), false)
            .with_mcid(2.0)
    }

    #[test]
    fn test_accepts_inclusive_bounds() {
        let def = vas();
        assert!(def.accepts(0.0));
        assert!(def.accepts(10.0));
        assert!(!def.accepts(10.5));
        assert!(!def.accepts(-0.1));
        assert!(!def.accepts(f64::NAN));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut def = vas();
        def.min_value = 10.0;
        def.max_value = 0.0;
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let def = vas().with_mdc(-1.0);
        assert!(def.validate().is_err());
        assert!(vas().validate().is_ok());
    }
}
