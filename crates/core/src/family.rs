//! Per-family adapters.
//!
//! Each measurement family has its own domain shape (a joint and a motion, a
//! muscle and a grade, an instrument and a score). The adapters below reduce
//! them to the `(measure_key, value)` pair that the ledger and comparator
//! work with, so trend logic exists once for all families.

use serde::{Deserialize, Serialize};
use crate::assignment::ProtocolAssignment;
use crate::id::MeasureKey;
use crate::measure::MeasureFamily;

/// Errors raised while building a family reading.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FamilyError {
    /// MMT grade string could not be parsed
    #[error("invalid muscle grade: {0}")]
    InvalidGrade(String),

    /// Unknown side
    #[error("invalid side: {0}")]
    InvalidSide(String),

    /// Unknown motion mode
    #[error("invalid motion mode: {0}")]
    InvalidMode(String),

    /// Assignment has nothing to derive adherence from
    #[error("assignment {0} has no target session count")]
    NoTarget(String),
}

/// A domain reading that can be reduced to a measure-key and a value.
pub trait FamilyReading {
    /// Family of the reading.
    fn family(&self) -> MeasureFamily;

    /// Key the value is recorded under.
    fn measure_key(&self) -> MeasureKey;

    /// Numeric value.
    fn value(&self) -> f64;
}

/// Body side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Left
    Left,
    /// Right
    Right,
    /// Axial / not lateralized
    Bilateral,
}

impl Side {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::Bilateral => "bilateral",
        }
    }
}

impl std::str::FromStr for Side {
    type Err = FamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "l" | "left" => Ok(Side::Left),
            "r" | "right" => Ok(Side::Right),
            "b" | "bilateral" => Ok(Side::Bilateral),
            other => Err(FamilyError::InvalidSide(other.to_string())),
        }
    }
}

/// Active or passive range of motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    /// Patient-generated movement
    Active,
    /// Examiner-generated movement
    Passive,
}

impl MotionMode {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionMode::Active => "active",
            MotionMode::Passive => "passive",
        }
    }
}

impl std::str::FromStr for MotionMode {
    type Err = FamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "a" | "arom" | "active" => Ok(MotionMode::Active),
            "p" | "prom" | "passive" => Ok(MotionMode::Passive),
            other => Err(FamilyError::InvalidMode(other.to_string())),
        }
    }
}

/// Standardized outcome-measure score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeScore {
    /// Instrument key ("vas_pain", "odi", ...)
    pub instrument: MeasureKey,
    /// Score
    pub score: f64,
}

impl FamilyReading for OutcomeScore {
    fn family(&self) -> MeasureFamily {
        MeasureFamily::OutcomeMeasure
    }

    fn measure_key(&self) -> MeasureKey {
        self.instrument.clone()
    }

    fn value(&self) -> f64 {
        self.score
    }
}

/// Goniometric range-of-motion reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeOfMotion {
    /// Joint ("shoulder", "knee", ...)
    pub joint: String,
    /// Motion ("flexion", "abduction", ...)
    pub motion: String,
    /// Active or passive
    pub mode: MotionMode,
    /// Side
    pub side: Side,
    /// Degrees
    pub degrees: f64,
}

impl RangeOfMotion {
    /// Key under which a joint/motion/mode/side combination is recorded.
    pub fn key_for(joint: &str, motion: &str, mode: MotionMode, side: Side) -> MeasureKey {
        MeasureKey::new(format!(
            "rom.{}.{}.{}.{}",
            slug(joint),
            slug(motion),
            mode.as_str(),
            side.as_str()
        ))
    }
}

impl FamilyReading for RangeOfMotion {
    fn family(&self) -> MeasureFamily {
        MeasureFamily::RangeOfMotion
    }

    fn measure_key(&self) -> MeasureKey {
        Self::key_for(&self.joint, &self.motion, self.mode, self.side)
    }

    fn value(&self) -> f64 {
        self.degrees
    }
}

/// Modifier on a manual muscle test grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeModifier {
    /// "-"
    Minus,
    /// no modifier
    None,
    /// "+"
    Plus,
}

/// Oxford-scale manual muscle test grade (0 to 5, with +/- modifiers).
///
/// Modifiers count as a third of a grade, so `3-` < `3` < `3+` < `4-` and the
/// grade maps onto a continuous 0-5 scale the comparator can subtract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MuscleGrade {
    /// Whole grade, 0-5
    pub grade: u8,
    /// Modifier
    pub modifier: GradeModifier,
}

impl MuscleGrade {
    /// Numeric value on the 0-5 scale.
    pub fn to_value(&self) -> f64 {
        let base = self.grade as f64;
        match self.modifier {
            GradeModifier::Minus => base - 1.0 / 3.0,
            GradeModifier::None => base,
            GradeModifier::Plus => base + 1.0 / 3.0,
        }
    }
}

impl std::str::FromStr for MuscleGrade {
    type Err = FamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || FamilyError::InvalidGrade(trimmed.to_string());

        let (digits, modifier) = match trimmed.chars().last() {
            Some('+') => (&trimmed[..trimmed.len() - 1], GradeModifier::Plus),
            Some('-') => (&trimmed[..trimmed.len() - 1], GradeModifier::Minus),
            Some(_) => (trimmed, GradeModifier::None),
            None => return Err(invalid()),
        };
        let grade: u8 = digits.parse().map_err(|_| invalid())?;

        match (grade, modifier) {
            (g, _) if g > 5 => Err(invalid()),
            (0, GradeModifier::Minus) | (5, GradeModifier::Plus) => Err(invalid()),
            _ => Ok(MuscleGrade { grade, modifier }),
        }
    }
}

impl std::fmt::Display for MuscleGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let suffix = match self.modifier {
            GradeModifier::Minus => "-",
            GradeModifier::None => "",
            GradeModifier::Plus => "+",
        };
        write!(f, "{}{}", self.grade, suffix)
    }
}

/// Manual muscle test reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuscleTest {
    /// Muscle or muscle group ("deltoid", "quadriceps", ...)
    pub muscle: String,
    /// Side
    pub side: Side,
    /// Grade
    pub grade: MuscleGrade,
}

impl MuscleTest {
    /// Key under which a muscle/side combination is recorded.
    pub fn key_for(muscle: &str, side: Side) -> MeasureKey {
        MeasureKey::new(format!("mmt.{}.{}", slug(muscle), side.as_str()))
    }
}

impl FamilyReading for MuscleTest {
    fn family(&self) -> MeasureFamily {
        MeasureFamily::ManualMuscleTest
    }

    fn measure_key(&self) -> MeasureKey {
        Self::key_for(&self.muscle, self.side)
    }

    fn value(&self) -> f64 {
        self.grade.to_value()
    }
}

/// Timed or counted performance test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalTest {
    /// Test name ("tug", "6mwt", ...)
    pub test: String,
    /// Result in the test's unit
    pub result: f64,
}

impl FunctionalTest {
    /// Key under which a test is recorded.
    pub fn key_for(test: &str) -> MeasureKey {
        MeasureKey::new(format!("func.{}", slug(test)))
    }
}

impl FamilyReading for FunctionalTest {
    fn family(&self) -> MeasureFamily {
        MeasureFamily::FunctionalTest
    }

    fn measure_key(&self) -> MeasureKey {
        Self::key_for(&self.test)
    }

    fn value(&self) -> f64 {
        self.result
    }
}

/// Adherence to an assigned protocol, as a percentage of planned sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolAdherence {
    /// Percentage, 0-100
    pub percent: f64,
}

impl ProtocolAdherence {
    /// Key under which adherence is recorded.
    pub fn key() -> MeasureKey {
        MeasureKey::new("protocol.adherence")
    }

    /// Derive adherence from an assignment's counters.
    pub fn from_assignment(assignment: &ProtocolAssignment) -> Result<Self, FamilyError> {
        assignment
            .adherence_percent()
            .map(|percent| Self { percent })
            .ok_or_else(|| FamilyError::NoTarget(assignment.id.to_string()))
    }
}

impl FamilyReading for ProtocolAdherence {
    fn family(&self) -> MeasureFamily {
        MeasureFamily::ProtocolAdherence
    }

    fn measure_key(&self) -> MeasureKey {
        Self::key()
    }

    fn value(&self) -> f64 {
        self.percent
    }
}

fn slug(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
