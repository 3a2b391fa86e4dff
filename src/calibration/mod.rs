// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Calibration store
//!
//! Loads the compiled training CSV once at startup and reduces it to the
//! reference values the classifier needs: per-class spectral centroids, the
//! channel-2 green-edge floor, worst-case Fresh gas voltages and the
//! redness/luma normalizers. The table is immutable for the life of the
//! process; a missing or degenerate file is fatal.

use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::model::SPECTRAL_CHANNELS;

/// Water-holding-capacity baseline, percent
pub const WHC_BASE: f64 = 88.0;

const LABEL_FRESH: &str = "Fresh";
const LABEL_SEMI: &str = "Semi-Fresh";

/// Startup calibration failures; all of them abort the program
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration file {0} is missing; the instrument cannot grade without it")]
    Missing(String),

    #[error("calibration file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("calibration file malformed: {0}")]
    Invalid(String),

    #[error("calibration file has no '{0}' rows; at least one is required")]
    EmptyClass(&'static str),
}

/// The reference values distilled from the compiled training data
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    /// Per-channel mean of Fresh-labelled spectra
    pub mean_spectral_fresh: [f64; SPECTRAL_CHANNELS],
    /// Per-channel mean of Semi-Fresh-labelled spectra
    pub mean_spectral_semi: [f64; SPECTRAL_CHANNELS],
    /// Minimum channel 2 across Fresh rows (green-edge safety floor)
    pub fresh_ch2_min: f64,
    /// Worst-case MQ-137 voltage seen in Fresh rows
    pub fresh_mq137_max: f64,
    /// Worst-case MQ-3 voltage seen in Fresh rows
    pub fresh_mq3_max: f64,
    /// 95th percentile of mean(ch9, ch10, ch11) across Fresh rows
    pub max_redness: f64,
    /// max of mean(ch2, ch5, ch7) across all rows
    pub max_luma: f64,
    /// Water-holding-capacity baseline constant
    pub whc_base: f64,
}

impl CalibrationTable {
    /// Load and reduce the compiled CSV. Accepts a UTF-8 BOM; rows whose
    /// numeric columns fail to parse are skipped rather than fatal.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        if !path.exists() {
            return Err(CalibrationError::Missing(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let table = Self::parse(content.trim_start_matches('\u{feff}'))?;
        info!(
            "calibration loaded from {:?}: ch2 floor {:.2}, mq137 max {:.3} V, mq3 max {:.3} V",
            path, table.fresh_ch2_min, table.fresh_mq137_max, table.fresh_mq3_max
        );
        Ok(table)
    }

    fn parse(content: &str) -> Result<Self, CalibrationError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| CalibrationError::Invalid(e.to_string()))?
            .clone();
        let col = |name: &str| headers.iter().position(|h| h == name);

        let label_idx = col("spoilage_label")
            .ok_or_else(|| CalibrationError::Invalid("no spoilage_label column".into()))?;
        let mq137_idx = col("mq137_v_rs")
            .ok_or_else(|| CalibrationError::Invalid("no mq137_v_rs column".into()))?;
        let mq3_idx = col("mq3_v_rs")
            .ok_or_else(|| CalibrationError::Invalid("no mq3_v_rs column".into()))?;
        let mut ch_idx = [0usize; SPECTRAL_CHANNELS];
        for (i, idx) in ch_idx.iter_mut().enumerate() {
            let name = format!("as_raw_ch{}", i + 1);
            *idx = col(&name)
                .ok_or_else(|| CalibrationError::Invalid(format!("no {name} column")))?;
        }

        let mut fresh_mq137 = Vec::new();
        let mut fresh_mq3 = Vec::new();
        let mut fresh_spectral: Vec<Vec<f64>> = vec![Vec::new(); SPECTRAL_CHANNELS];
        let mut semi_spectral: Vec<Vec<f64>> = vec![Vec::new(); SPECTRAL_CHANNELS];
        let mut fresh_reds = Vec::new();
        let mut fresh_ch2 = Vec::new();
        let mut all_lumas = Vec::new();

        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(_) => continue,
            };
            let field = |idx: usize| -> Option<f64> {
                record.get(idx).and_then(|s| s.parse::<f64>().ok())
            };

            let mut channels = [0.0f64; SPECTRAL_CHANNELS];
            let mut complete = true;
            for (i, &idx) in ch_idx.iter().enumerate() {
                match field(idx) {
                    Some(v) => channels[i] = v,
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            let (mq137, mq3) = match (field(mq137_idx), field(mq3_idx)) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            if !complete {
                continue;
            }

            all_lumas.push((channels[1] + channels[4] + channels[6]) / 3.0);

            match record.get(label_idx) {
                Some(LABEL_FRESH) => {
                    fresh_mq137.push(mq137);
                    fresh_mq3.push(mq3);
                    for (i, v) in channels.iter().enumerate() {
                        fresh_spectral[i].push(*v);
                    }
                    fresh_reds.push((channels[8] + channels[9] + channels[10]) / 3.0);
                    fresh_ch2.push(channels[1]);
                }
                Some(LABEL_SEMI) => {
                    for (i, v) in channels.iter().enumerate() {
                        semi_spectral[i].push(*v);
                    }
                }
                _ => {}
            }
        }

        if fresh_spectral[0].is_empty() {
            return Err(CalibrationError::EmptyClass(LABEL_FRESH));
        }
        if semi_spectral[0].is_empty() {
            return Err(CalibrationError::EmptyClass(LABEL_SEMI));
        }

        let mean = |vals: &[f64]| vals.iter().sum::<f64>() / vals.len() as f64;
        let max = |vals: &[f64]| vals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = |vals: &[f64]| vals.iter().copied().fold(f64::INFINITY, f64::min);

        let mut mean_spectral_fresh = [0.0; SPECTRAL_CHANNELS];
        let mut mean_spectral_semi = [0.0; SPECTRAL_CHANNELS];
        for i in 0..SPECTRAL_CHANNELS {
            mean_spectral_fresh[i] = mean(&fresh_spectral[i]);
            mean_spectral_semi[i] = mean(&semi_spectral[i]);
        }

        fresh_reds.sort_by(|a, b| a.total_cmp(b));
        let pct_idx = ((0.95 * fresh_reds.len() as f64) as usize).min(fresh_reds.len() - 1);

        Ok(Self {
            mean_spectral_fresh,
            mean_spectral_semi,
            fresh_ch2_min: min(&fresh_ch2),
            fresh_mq137_max: max(&fresh_mq137),
            fresh_mq3_max: max(&fresh_mq3),
            max_redness: fresh_reds[pct_idx],
            max_luma: max(&all_lumas),
            whc_base: WHC_BASE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn header() -> String {
        let chans: Vec<String> = (1..=18).map(|i| format!("as_raw_ch{i}")).collect();
        format!("spoilage_label,mq137_v_rs,mq3_v_rs,{}", chans.join(","))
    }

    fn row(label: &str, mq137: f64, mq3: f64, ch: f64) -> String {
        let chans: Vec<String> = (0..18).map(|_| format!("{ch}")).collect();
        format!("{label},{mq137},{mq3},{}", chans.join(","))
    }

    #[test]
    fn test_parse_computes_reference_values() {
        let csv = format!(
            "{}\n{}\n{}\n{}\n",
            header(),
            row("Fresh", 1.0, 0.5, 200.0),
            row("Fresh", 1.5, 0.8, 100.0),
            row("Semi-Fresh", 2.0, 1.0, 400.0),
        );
        let table = CalibrationTable::parse(&csv).unwrap();
        assert_eq!(table.mean_spectral_fresh[0], 150.0);
        assert_eq!(table.mean_spectral_semi[0], 400.0);
        assert_eq!(table.fresh_ch2_min, 100.0);
        assert_eq!(table.fresh_mq137_max, 1.5);
        assert_eq!(table.fresh_mq3_max, 0.8);
        // lumas: 200, 100, 400 -> max 400
        assert_eq!(table.max_luma, 400.0);
        // reds sorted [100, 200]; idx = (0.95*2) as usize = 1
        assert_eq!(table.max_redness, 200.0);
        assert_eq!(table.whc_base, WHC_BASE);
    }

    #[test]
    fn test_bom_is_tolerated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "\u{feff}{}\n{}\n{}\n",
            header(),
            row("Fresh", 1.0, 0.5, 200.0),
            row("Semi-Fresh", 2.0, 1.0, 400.0),
        )
        .unwrap();
        let table = CalibrationTable::load(file.path()).unwrap();
        assert_eq!(table.fresh_ch2_min, 200.0);
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let csv = format!(
            "{}\n{}\n{}\n{}\n",
            header(),
            row("Fresh", 1.0, 0.5, 200.0),
            "Fresh,not-a-number,0.5,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18",
            row("Semi-Fresh", 2.0, 1.0, 400.0),
        );
        let table = CalibrationTable::parse(&csv).unwrap();
        assert_eq!(table.fresh_mq137_max, 1.0);
    }

    #[test]
    fn test_empty_class_is_fatal() {
        let csv = format!("{}\n{}\n", header(), row("Fresh", 1.0, 0.5, 200.0));
        match CalibrationTable::parse(&csv) {
            Err(CalibrationError::EmptyClass(label)) => assert_eq!(label, "Semi-Fresh"),
            other => panic!("expected EmptyClass, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = CalibrationTable::load(Path::new("/nonexistent/calib.csv")).unwrap_err();
        assert!(matches!(err, CalibrationError::Missing(_)));
    }

    #[test]
    fn test_unknown_columns_ignored() {
        let chans: Vec<String> = (1..=18).map(|i| format!("as_raw_ch{i}")).collect();
        let csv = format!(
            "sample_id,spoilage_label,mq137_v_rs,mq3_v_rs,{}\nX1,{}\nX2,{}\n",
            chans.join(","),
            row("Fresh", 1.0, 0.5, 200.0),
            row("Semi-Fresh", 2.0, 1.0, 400.0),
        );
        let table = CalibrationTable::parse(&csv).unwrap();
        assert_eq!(table.fresh_ch2_min, 200.0);
    }
}
