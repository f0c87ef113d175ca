//! Service configuration.

use clinitrack_core::MeasureDefinition;
use serde::{Deserialize, Serialize};

/// Which library threshold counts as the significance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificancePolicy {
    /// MCID when defined, otherwise MDC
    #[default]
    McidThenMdc,
    /// MCID only
    McidOnly,
}

impl SignificancePolicy {
    /// Threshold to test changes of this measure against.
    pub fn threshold_for(&self, definition: &MeasureDefinition) -> Option<f64> {
        match self {
            SignificancePolicy::McidThenMdc => definition.mcid.or(definition.mdc),
            SignificancePolicy::McidOnly => definition.mcid,
        }
    }
}

/// Configuration for the progress services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Threshold selection
    pub significance: SignificancePolicy,
    /// Largest accepted re-evaluation batch
    pub max_batch_items: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            significance: SignificancePolicy::default(),
            max_batch_items: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinitrack_core::MeasureFamily;

    #[test]
    fn test_threshold_policy() {
        let def = MeasureDefinition::new("func.tug", MeasureFamily::FunctionalTest, "TUG", "s", (0.0, 120.0), false)
            .with_mdc(2.9);
        assert_eq!(SignificancePolicy::McidThenMdc.threshold_for(&def), Some(2.9));
        assert_eq!(SignificancePolicy::McidOnly.threshold_for(&def), None);

        let def = def.with_mcid(3.4);
        assert_eq!(SignificancePolicy::McidThenMdc.threshold_for(&def), Some(3.4));
    }
}
