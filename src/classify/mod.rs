// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Classifier and biochemical approximator
//!
//! Maps one fused frame to a quality verdict. Safety limits run first: a
//! breached channel-2 floor or gas ceiling forces a spoiled score before
//! the spectral distance is ever consulted. Otherwise the white-illumination
//! spectrum is graded by nearest centroid against the Fresh and Semi-Fresh
//! class means from the calibration table.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::calibration::CalibrationTable;
use crate::model::{Frame, Spectrum};

/// Quality category shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityCategory {
    Fresh,
    SemiFresh,
    Spoilt,
}

impl fmt::Display for QualityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityCategory::Fresh => write!(f, "FRESH"),
            QualityCategory::SemiFresh => write!(f, "SEMI-FRESH"),
            QualityCategory::Spoilt => write!(f, "SPOILT"),
        }
    }
}

/// Palette-free severity hint for the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorTag {
    High,
    Normal,
    Low,
}

/// Final grade stamped on the report row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::A => write!(f, "Grade A"),
            Grade::B => write!(f, "Grade B"),
            Grade::C => write!(f, "Grade C"),
        }
    }
}

/// One graded sample: category, grade, the four UI indices (all clamped to
/// 0-100) and the raw biochemical estimates behind them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub grade: Grade,
    pub category: QualityCategory,
    pub color_tag: ColorTag,
    /// Classification score the grade was derived from (25/35/65/95)
    pub score: u8,
    pub enose_idx: u8,
    pub whc_idx: u8,
    pub fac_idx: u8,
    pub myo_idx: u8,
    /// Myoglobin estimate, mg/g, clamped to [0.1, 3.5]
    pub myo_est: f64,
    /// Fatty-acid estimate, clamped to [0.5, 8.0]
    pub fat_est: f64,
    /// Water-holding-capacity estimate, percent, clamped to [50, 95]
    pub whc_est: f64,
}

/// Nearest-centroid spectral classifier with gas safety limits
#[derive(Clone)]
pub struct Classifier {
    table: Arc<CalibrationTable>,
}

fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.min(hi).max(lo)
}

/// Calibration guarantees non-zero reference values after load; synthetic
/// tables in tests may not, so divisions fall back to a positive default.
fn safe_div(num: f64, denom: f64) -> f64 {
    if denom > 0.0 {
        num / denom
    } else {
        num
    }
}

fn index(x: f64) -> u8 {
    clamp(x.round(), 0.0, 100.0) as u8
}

impl Classifier {
    pub fn new(table: Arc<CalibrationTable>) -> Self {
        Self { table }
    }

    /// Grade one fused frame (the scan engine feeds it the max envelope)
    pub fn classify(&self, frame: &Frame) -> Verdict {
        self.classify_spectrum(&frame.white, frame.gas.mq137, frame.gas.mq3)
    }

    /// Core decision on a white-illumination spectrum plus the two gas
    /// voltages the safety limits consult
    pub fn classify_spectrum(&self, v: &Spectrum, mq137: f64, mq3: f64) -> Verdict {
        let t = &self.table;

        let score: u8 = if v.channel(2) < t.fresh_ch2_min {
            // Green-edge floor breached: spoiled regardless of distance
            25
        } else if mq137 > t.fresh_mq137_max || mq3 > t.fresh_mq3_max {
            35
        } else {
            let sample = DVector::from_row_slice(&v.0);
            let fresh = DVector::from_row_slice(&t.mean_spectral_fresh);
            let semi = DVector::from_row_slice(&t.mean_spectral_semi);
            let d_fresh = (&sample - fresh).norm();
            let d_semi = (&sample - semi).norm();
            if d_fresh < d_semi {
                95
            } else {
                65
            }
        };

        let redness = v.mean_of(&[9, 10, 11]);
        let myo_est = clamp(safe_div(redness, t.max_redness) * 2.5, 0.1, 3.5);

        let luma = v.mean_of(&[2, 5, 7]);
        let fat_est = clamp(safe_div(luma, t.max_luma) * 6.0, 0.5, 8.0);

        let whc_est = clamp(
            t.whc_base - safe_div(mq137, t.fresh_mq137_max * 1.5) * 20.0,
            50.0,
            95.0,
        );

        let (category, color_tag, grade) = match score {
            s if s >= 80 => (QualityCategory::Fresh, ColorTag::High, Grade::A),
            s if s >= 50 => (QualityCategory::SemiFresh, ColorTag::Normal, Grade::B),
            _ => (QualityCategory::Spoilt, ColorTag::Low, Grade::C),
        };

        Verdict {
            grade,
            category,
            color_tag,
            score,
            enose_idx: index(100.0 - mq137 * 30.0),
            whc_idx: index(whc_est),
            fac_idx: index(fat_est / 8.0 * 100.0),
            myo_idx: index(myo_est / 3.5 * 100.0),
            myo_est,
            fat_est,
            whc_est,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SPECTRAL_CHANNELS;

    /// The synthetic table from the acceptance scenarios
    fn table() -> Arc<CalibrationTable> {
        Arc::new(CalibrationTable {
            mean_spectral_fresh: [200.0; SPECTRAL_CHANNELS],
            mean_spectral_semi: [400.0; SPECTRAL_CHANNELS],
            fresh_ch2_min: 100.0,
            fresh_mq137_max: 1.5,
            fresh_mq3_max: 0.8,
            max_redness: 300.0,
            max_luma: 250.0,
            whc_base: 88.0,
        })
    }

    fn flat(v: f64) -> Spectrum {
        Spectrum([v; SPECTRAL_CHANNELS])
    }

    #[test]
    fn test_fresh_sample_scenario() {
        let c = Classifier::new(table());
        let verdict = c.classify_spectrum(&flat(210.0), 0.5, 0.3);
        assert_eq!(verdict.score, 95);
        assert_eq!(verdict.category, QualityCategory::Fresh);
        assert_eq!(verdict.color_tag, ColorTag::High);
        assert_eq!(verdict.grade, Grade::A);
        assert_eq!(verdict.enose_idx, 85);
        assert_eq!(verdict.whc_idx, 84);
        // luma 210 / 250 * 6 = 5.04 -> 5.04/8*100 = 63
        assert_eq!(verdict.fac_idx, 63);
    }

    #[test]
    fn test_gas_limit_trip() {
        let c = Classifier::new(table());
        let verdict = c.classify_spectrum(&flat(210.0), 2.0, 0.3);
        assert_eq!(verdict.score, 35);
        assert_eq!(verdict.category, QualityCategory::Spoilt);
        assert_eq!(verdict.color_tag, ColorTag::Low);
        assert_eq!(verdict.grade, Grade::C);
    }

    #[test]
    fn test_mq3_limit_trip() {
        let c = Classifier::new(table());
        let verdict = c.classify_spectrum(&flat(210.0), 0.5, 0.9);
        assert_eq!(verdict.score, 35);
        assert_eq!(verdict.grade, Grade::C);
    }

    #[test]
    fn test_channel2_floor_trip() {
        let c = Classifier::new(table());
        let mut v = flat(210.0);
        v.set_channel(2, 50.0);
        let verdict = c.classify_spectrum(&v, 0.5, 0.3);
        assert_eq!(verdict.score, 25);
        assert_eq!(verdict.grade, Grade::C);
    }

    #[test]
    fn test_tie_breaks_toward_semi() {
        let c = Classifier::new(table());
        let verdict = c.classify_spectrum(&flat(300.0), 0.5, 0.3);
        assert_eq!(verdict.score, 65);
        assert_eq!(verdict.category, QualityCategory::SemiFresh);
        assert_eq!(verdict.color_tag, ColorTag::Normal);
        assert_eq!(verdict.grade, Grade::B);
    }

    #[test]
    fn test_mq137_monotonicity() {
        let c = Classifier::new(table());
        let below = c.classify_spectrum(&flat(210.0), 1.49, 0.3);
        let above = c.classify_spectrum(&flat(210.0), 1.51, 0.3);
        assert_eq!(below.grade, Grade::A);
        assert_eq!(above.grade, Grade::C);
    }

    #[test]
    fn test_channel2_recovery_raises_verdict() {
        let c = Classifier::new(table());
        let mut low = flat(210.0);
        low.set_channel(2, 99.0);
        let mut high = flat(210.0);
        high.set_channel(2, 101.0);
        assert_eq!(c.classify_spectrum(&low, 0.5, 0.3).grade, Grade::C);
        assert_ne!(c.classify_spectrum(&high, 0.5, 0.3).grade, Grade::C);
    }

    #[test]
    fn test_clamp_invariant() {
        let c = Classifier::new(table());
        let extremes = [
            (flat(0.0), 0.0, 0.0),
            (flat(1e6), 0.0, 0.0),
            (flat(210.0), 1e6, 1e6),
            (flat(210.0), -5.0, -5.0),
        ];
        for (v, mq137, mq3) in extremes {
            let verdict = c.classify_spectrum(&v, mq137, mq3);
            assert!(verdict.enose_idx <= 100);
            assert!(verdict.whc_idx <= 100);
            assert!(verdict.fac_idx <= 100);
            assert!(verdict.myo_idx <= 100);
            assert!((0.1..=3.5).contains(&verdict.myo_est));
            assert!((0.5..=8.0).contains(&verdict.fat_est));
            assert!((50.0..=95.0).contains(&verdict.whc_est));
        }
    }

    #[test]
    fn test_myoglobin_scaling() {
        let c = Classifier::new(table());
        let verdict = c.classify_spectrum(&flat(210.0), 0.5, 0.3);
        // redness 210/300 * 2.5 = 1.75 -> 1.75/3.5*100 = 50
        assert_eq!(verdict.myo_idx, 50);
        assert!((verdict.myo_est - 1.75).abs() < 1e-9);
    }
}
