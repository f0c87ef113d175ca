//! Built-in reference catalog of common rehabilitation measures.

use clinitrack_core::{
    FunctionalTest, MeasureDefinition, MeasureFamily, MotionMode, MuscleTest, ProtocolAdherence,
    RangeOfMotion, Side,
};

const SIDES: [Side; 2] = [Side::Left, Side::Right];
const MODES: [MotionMode; 2] = [MotionMode::Active, MotionMode::Passive];

// (joint, motion, min, max)
const ROM_MOTIONS: &[(&str, &str, f64, f64)] = &[
    ("shoulder", "flexion", 0.0, 180.0),
    ("shoulder", "extension", 0.0, 60.0),
    ("shoulder", "abduction", 0.0, 180.0),
    ("shoulder", "external rotation", 0.0, 90.0),
    ("shoulder", "internal rotation", 0.0, 90.0),
    ("elbow", "flexion", 0.0, 150.0),
    ("hip", "flexion", 0.0, 130.0),
    ("hip", "abduction", 0.0, 50.0),
    ("knee", "flexion", 0.0, 150.0),
    ("knee", "extension", -30.0, 10.0),
    ("ankle", "dorsiflexion", -20.0, 30.0),
    ("ankle", "plantarflexion", 0.0, 60.0),
    ("cervical", "rotation", 0.0, 90.0),
];

const MMT_MUSCLES: &[&str] = &[
    "deltoid",
    "biceps",
    "triceps",
    "gluteus medius",
    "iliopsoas",
    "quadriceps",
    "hamstrings",
    "tibialis anterior",
    "gastrocnemius",
];

/// Standard definitions for outcome questionnaires, goniometry, manual muscle
/// testing, functional tests and protocol adherence.
pub fn standard_catalog() -> Vec<MeasureDefinition> {
    let mut catalog = vec![
        outcome("vas_pain", "Visual Analog Scale (pain)", "pts", (0.0, 10.0), false).with_mcid(2.0),
        outcome("nprs", "Numeric Pain Rating Scale", "pts", (0.0, 10.0), false).with_mcid(2.0),
        outcome("odi", "Oswestry Disability Index", "%", (0.0, 100.0), false).with_mcid(10.0),
        outcome("ndi", "Neck Disability Index", "pts", (0.0, 50.0), false)
            .with_mcid(7.5)
            .with_mdc(5.0),
        outcome("quickdash", "QuickDASH", "pts", (0.0, 100.0), false).with_mcid(8.0),
        outcome("lefs", "Lower Extremity Functional Scale", "pts", (0.0, 80.0), true)
            .with_mcid(9.0)
            .with_mdc(9.0),
        outcome("psfs", "Patient-Specific Functional Scale", "pts", (0.0, 10.0), true).with_mcid(2.0),
    ];

    for (joint, motion, min, max) in ROM_MOTIONS {
        for mode in MODES {
            for side in SIDES {
                let key = RangeOfMotion::key_for(joint, motion, mode, side);
                let label = format!("{} {} {} ({})", title(joint), motion, mode.as_str().to_uppercase(), side.as_str());
                catalog.push(MeasureDefinition::new(
                    key,
                    MeasureFamily::RangeOfMotion,
                    label,
                    "deg",
                    (*min, *max),
                    true,
                ));
            }
        }
    }

    for muscle in MMT_MUSCLES {
        for side in SIDES {
            catalog.push(MeasureDefinition::new(
                MuscleTest::key_for(muscle, side),
                MeasureFamily::ManualMuscleTest,
                format!("MMT {} ({})", muscle, side.as_str()),
                "grade",
                (0.0, 5.0),
                true,
            ));
        }
    }

    catalog.extend([
        functional("tug", "Timed Up and Go", "s", (0.0, 120.0), false).with_mdc(2.9),
        functional("6mwt", "Six Minute Walk Test", "m", (0.0, 1000.0), true).with_mcid(30.0),
        functional("30s chair stand", "30-Second Chair Stand", "reps", (0.0, 50.0), true).with_mcid(2.0),
        functional("berg balance", "Berg Balance Scale", "pts", (0.0, 56.0), true).with_mdc(5.0),
        MeasureDefinition::new(
            ProtocolAdherence::key(),
            MeasureFamily::ProtocolAdherence,
            "Protocol adherence",
            "%",
            (0.0, 100.0),
            true,
        ),
    ]);

    catalog
}

fn outcome(key: &str, label: &str, unit: &str, range: (f64, f64), higher_is_better: bool) -> MeasureDefinition {
    MeasureDefinition::new(key, MeasureFamily::OutcomeMeasure, label, unit, range, higher_is_better)
}

fn functional(test: &str, label: &str, unit: &str, range: (f64, f64), higher_is_better: bool) -> MeasureDefinition {
    MeasureDefinition::new(
        FunctionalTest::key_for(test),
        MeasureFamily::FunctionalTest,
        label,
        unit,
        range,
        higher_is_better,
    )
}

fn title(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
