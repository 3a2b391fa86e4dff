// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Typed acquisition records
//!
//! Every row the instrument persists or classifies is one of the tagged
//! record types below. CSV headers are derived from these types in the
//! `persist` module, so a field added here shows up in exactly one schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

/// Number of AS7265x spectral channels
pub const SPECTRAL_CHANNELS: usize = 18;

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the first call in this process. Monotonic companion to
/// the wall-clock timestamp carried on every frame.
pub fn uptime_ms() -> u64 {
    let epoch = PROCESS_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64
}

/// Ambient temperature and humidity from the AHT20
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvReading {
    pub temp_c: f64,
    pub humidity_pct: f64,
}

impl EnvReading {
    /// Placeholder for a failed read; scalars propagate as NaN
    pub fn nan() -> Self {
        Self {
            temp_c: f64::NAN,
            humidity_pct: f64::NAN,
        }
    }
}

/// Raw Rs voltages from the four MQ sensors on the ADS1115
///
/// Canonical order and naming: MQ-137 (ammonia), MQ-135 (air quality),
/// MQ-4 (methane), MQ-3 (alcohol).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasReading {
    pub mq137: f64,
    pub mq135: f64,
    pub mq4: f64,
    pub mq3: f64,
}

impl GasReading {
    pub fn nan() -> Self {
        Self {
            mq137: f64::NAN,
            mq135: f64::NAN,
            mq4: f64::NAN,
            mq3: f64::NAN,
        }
    }

    /// Values in canonical order, paired with their display labels
    pub fn labelled(&self) -> [(&'static str, f64); 4] {
        [
            ("MQ-137", self.mq137),
            ("MQ-135", self.mq135),
            ("MQ-4", self.mq4),
            ("MQ-3", self.mq3),
        ]
    }
}

/// One 18-channel calibrated spectral capture
///
/// Channels are addressed 1-18 as on the AS7265x datasheet; `channel(2)`
/// is the 435 nm violet channel, `channel(18)` the 940 nm NIR channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spectrum(pub [f64; SPECTRAL_CHANNELS]);

impl Spectrum {
    pub fn zeros() -> Self {
        Self([0.0; SPECTRAL_CHANNELS])
    }

    /// 1-based channel accessor matching the datasheet numbering
    pub fn channel(&self, ch: usize) -> f64 {
        debug_assert!((1..=SPECTRAL_CHANNELS).contains(&ch));
        self.0[ch - 1]
    }

    pub fn set_channel(&mut self, ch: usize, value: f64) {
        debug_assert!((1..=SPECTRAL_CHANNELS).contains(&ch));
        self.0[ch - 1] = value;
    }

    /// Mean of a set of 1-based channels
    pub fn mean_of(&self, channels: &[usize]) -> f64 {
        let sum: f64 = channels.iter().map(|&ch| self.channel(ch)).sum();
        sum / channels.len() as f64
    }

    /// Elementwise maximum across captures. NaN entries lose to any finite
    /// value, so a single failed shot cannot poison the envelope.
    pub fn elementwise_max<'a>(spectra: impl IntoIterator<Item = &'a Spectrum>) -> Spectrum {
        let mut out = [f64::NEG_INFINITY; SPECTRAL_CHANNELS];
        let mut any = false;
        for s in spectra {
            any = true;
            for (o, v) in out.iter_mut().zip(s.0.iter()) {
                *o = o.max(*v);
            }
        }
        if !any {
            return Spectrum::zeros();
        }
        Spectrum(out)
    }

    /// Elementwise arithmetic mean across captures
    pub fn elementwise_mean<'a>(spectra: impl IntoIterator<Item = &'a Spectrum>) -> Spectrum {
        let mut sum = [0.0f64; SPECTRAL_CHANNELS];
        let mut n = 0usize;
        for s in spectra {
            n += 1;
            for (o, v) in sum.iter_mut().zip(s.0.iter()) {
                *o += *v;
            }
        }
        if n == 0 {
            return Spectrum::zeros();
        }
        for o in sum.iter_mut() {
            *o /= n as f64;
        }
        Spectrum(sum)
    }
}

/// Which illumination a capture ran under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedSource {
    White,
    Uv,
    Ir,
}

impl fmt::Display for LedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedSource::White => write!(f, "WHITE"),
            LedSource::Uv => write!(f, "UV"),
            LedSource::Ir => write!(f, "IR"),
        }
    }
}

/// Sample annotations carried through training and archival
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMeta {
    pub sample_id: String,
    pub meat_type: String,
    pub storage: String,
    pub hour: u32,
    pub replica: u32,
}

/// An immutable record of one acquisition shot
///
/// Only the illumination contexts that were actually captured are present;
/// a white-only frame carries `uv: None, ir: None` rather than zeroes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub wall_time: DateTime<Utc>,
    pub uptime_ms: u64,
    pub env: EnvReading,
    pub gas: GasReading,
    pub white: Spectrum,
    pub uv: Option<Spectrum>,
    pub ir: Option<Spectrum>,
    pub meta: Option<SampleMeta>,
    /// Shot number within a multi-shot scan, 1-based; 0 outside a scan
    pub iteration: u32,
}

impl Frame {
    pub fn new(env: EnvReading, gas: GasReading, white: Spectrum) -> Self {
        Self {
            wall_time: Utc::now(),
            uptime_ms: uptime_ms(),
            env,
            gas,
            white,
            uv: None,
            ir: None,
            meta: None,
            iteration: 0,
        }
    }

    /// Worst-case envelope across shots: every numeric field is the
    /// elementwise maximum, non-numeric fields come from the first shot.
    /// MQ sensors accumulate volatiles under sustained exposure, so the
    /// envelope tracks the strongest reading each channel saw.
    pub fn aggregate_max(shots: &[Frame]) -> Option<Frame> {
        let first = shots.first()?;
        let max_nan = |acc: f64, v: f64| acc.max(v);
        let fold = |get: fn(&Frame) -> f64| {
            shots.iter().map(get).fold(f64::NEG_INFINITY, max_nan)
        };

        let mut out = first.clone();
        out.env = EnvReading {
            temp_c: fold(|f| f.env.temp_c),
            humidity_pct: fold(|f| f.env.humidity_pct),
        };
        out.gas = GasReading {
            mq137: fold(|f| f.gas.mq137),
            mq135: fold(|f| f.gas.mq135),
            mq4: fold(|f| f.gas.mq4),
            mq3: fold(|f| f.gas.mq3),
        };
        out.white = Spectrum::elementwise_max(shots.iter().map(|f| &f.white));
        out.uv = if shots.iter().all(|f| f.uv.is_some()) {
            Some(Spectrum::elementwise_max(
                shots.iter().filter_map(|f| f.uv.as_ref()),
            ))
        } else {
            first.uv
        };
        out.ir = if shots.iter().all(|f| f.ir.is_some()) {
            Some(Spectrum::elementwise_max(
                shots.iter().filter_map(|f| f.ir.as_ref()),
            ))
        } else {
            first.ir
        };
        Some(out)
    }

    /// Arithmetic-mean aggregate across shots; the training engine builds
    /// calibration centroids with this, never with the max envelope.
    pub fn aggregate_mean(shots: &[Frame]) -> Option<Frame> {
        let first = shots.first()?;
        let n = shots.len() as f64;
        let fold = |get: fn(&Frame) -> f64| shots.iter().map(get).sum::<f64>() / n;

        let mut out = first.clone();
        out.env = EnvReading {
            temp_c: fold(|f| f.env.temp_c),
            humidity_pct: fold(|f| f.env.humidity_pct),
        };
        out.gas = GasReading {
            mq137: fold(|f| f.gas.mq137),
            mq135: fold(|f| f.gas.mq135),
            mq4: fold(|f| f.gas.mq4),
            mq3: fold(|f| f.gas.mq3),
        };
        out.white = Spectrum::elementwise_mean(shots.iter().map(|f| &f.white));
        out.uv = if shots.iter().all(|f| f.uv.is_some()) {
            Some(Spectrum::elementwise_mean(
                shots.iter().filter_map(|f| f.uv.as_ref()),
            ))
        } else {
            None
        };
        out.ir = if shots.iter().all(|f| f.ir.is_some()) {
            Some(Spectrum::elementwise_mean(
                shots.iter().filter_map(|f| f.ir.as_ref()),
            ))
        } else {
            None
        };
        Some(out)
    }
}

/// The reference state captured after a pre-purge
///
/// Gas voltages feed the dynamic purge controller as its convergence
/// targets; the spectral references are archived alongside every training
/// row. Replaced atomically on each new capture; in-flight purges keep the
/// `Arc` they started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub timestamp: DateTime<Utc>,
    pub operator: String,
    pub ambient_temp: f64,
    pub ambient_hum: f64,
    pub mq137: f64,
    pub mq135: f64,
    pub mq4: f64,
    pub mq3: f64,
    pub dark_ref: Option<Spectrum>,
    pub white_ref: Option<Spectrum>,
    pub uv_ref: Option<Spectrum>,
    pub ir_ref: Option<Spectrum>,
}

impl Baseline {
    /// Purge targets in canonical order with display labels
    pub fn gas_targets(&self) -> [(&'static str, f64); 4] {
        [
            ("MQ-137", self.mq137),
            ("MQ-135", self.mq135),
            ("MQ-4", self.mq4),
            ("MQ-3", self.mq3),
        ]
    }
}

/// A sample identifier in one of the two house formats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleIdentity {
    /// Dashboard scans: `PS-<TYPEPREFIX>-<NNNN>`
    Dashboard { prefix: String, seq: u32 },
    /// Training samples: `<MEAT>_<STORAGE>_<REPLICA>`
    Training {
        meat: String,
        storage: String,
        replica: u32,
    },
}

impl fmt::Display for SampleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleIdentity::Dashboard { prefix, seq } => {
                write!(f, "PS-{}-{:04}", prefix, seq)
            }
            SampleIdentity::Training {
                meat,
                storage,
                replica,
            } => write!(f, "{}_{}_{}", meat, storage, replica),
        }
    }
}

impl SampleIdentity {
    /// Parse a dashboard ID; returns the prefix and sequence number
    pub fn parse_dashboard(id: &str) -> Option<(String, u32)> {
        let rest = id.strip_prefix("PS-")?;
        let (prefix, seq) = rest.rsplit_once('-')?;
        let seq = seq.parse().ok()?;
        Some((prefix.to_string(), seq))
    }
}

/// Ground-truth labels an operator can attach to a training sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpoilageLabel {
    Fresh,
    SemiFresh,
    SemiDegraded,
    Spoiled,
}

impl fmt::Display for SpoilageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpoilageLabel::Fresh => write!(f, "Fresh"),
            SpoilageLabel::SemiFresh => write!(f, "Semi-Fresh"),
            SpoilageLabel::SemiDegraded => write!(f, "Semi-Degraded"),
            SpoilageLabel::Spoiled => write!(f, "Spoiled"),
        }
    }
}

/// The canonical averaged row a completed training run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub meta: SampleMeta,
    pub timestamp: DateTime<Utc>,
    pub operator: String,
    pub env: EnvReading,
    pub gas: GasReading,
    pub white: Spectrum,
    pub uv: Spectrum,
    pub ir: Spectrum,
    /// Filled in when the operator confirms the ground truth
    pub label: Option<SpoilageLabel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(gas: f64, white: f64) -> Frame {
        Frame::new(
            EnvReading {
                temp_c: 20.0,
                humidity_pct: 50.0,
            },
            GasReading {
                mq137: gas,
                mq135: gas,
                mq4: gas,
                mq3: gas,
            },
            Spectrum([white; SPECTRAL_CHANNELS]),
        )
    }

    #[test]
    fn test_aggregate_max_is_envelope() {
        let shots = vec![frame_with(0.5, 100.0), frame_with(1.5, 80.0), frame_with(1.0, 120.0)];
        let agg = Frame::aggregate_max(&shots).unwrap();
        assert_eq!(agg.gas.mq137, 1.5);
        assert_eq!(agg.white.channel(1), 120.0);
    }

    #[test]
    fn test_aggregate_max_ignores_nan_scalars() {
        let mut bad = frame_with(0.5, 100.0);
        bad.env.temp_c = f64::NAN;
        let shots = vec![bad, frame_with(0.7, 90.0)];
        let agg = Frame::aggregate_max(&shots).unwrap();
        assert_eq!(agg.env.temp_c, 20.0);
    }

    #[test]
    fn test_aggregate_mean_is_arithmetic() {
        let shots = vec![frame_with(1.0, 100.0), frame_with(2.0, 200.0)];
        let agg = Frame::aggregate_mean(&shots).unwrap();
        assert_eq!(agg.gas.mq3, 1.5);
        assert_eq!(agg.white.channel(18), 150.0);
    }

    #[test]
    fn test_missing_context_stays_absent() {
        let shots = vec![frame_with(1.0, 1.0), frame_with(1.0, 1.0)];
        let agg = Frame::aggregate_max(&shots).unwrap();
        assert!(agg.uv.is_none());
        assert!(agg.ir.is_none());
    }

    #[test]
    fn test_sample_identity_formats() {
        let dash = SampleIdentity::Dashboard {
            prefix: "CB".into(),
            seq: 7,
        };
        assert_eq!(dash.to_string(), "PS-CB-0007");
        assert_eq!(
            SampleIdentity::parse_dashboard("PS-CB-0123"),
            Some(("CB".into(), 123))
        );
        assert_eq!(SampleIdentity::parse_dashboard("XX-CB-1"), None);

        let train = SampleIdentity::Training {
            meat: "BREAST".into(),
            storage: "CHILLED".into(),
            replica: 3,
        };
        assert_eq!(train.to_string(), "BREAST_CHILLED_3");
    }

    #[test]
    fn test_spectrum_channel_accessors() {
        let mut s = Spectrum::zeros();
        s.set_channel(2, 42.0);
        assert_eq!(s.channel(2), 42.0);
        assert_eq!(s.0[1], 42.0);
        assert_eq!(s.mean_of(&[2, 5, 7]), 14.0);
    }
}
