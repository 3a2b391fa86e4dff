// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Persistence appenders
//!
//! One appender per schema. Each knows its canonical header and writes it
//! only when the destination file is created; rows are written one at a
//! time and flushed. Missing numeric fields are serialized as the literal
//! `NaN`, never as an empty cell. Headers never change once written; a
//! schema change gets a new versioned file name instead of a migration.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::classify::Verdict;
use crate::model::{
    Baseline, EnvReading, Frame, GasReading, LedSource, SampleIdentity, SampleMeta, Spectrum,
    TrainingRow, SPECTRAL_CHANNELS,
};

const REPORT_FILE: &str = "poultri_scan_report.csv";
const RAW_DATABASE_FILE: &str = "raw_database_log.csv";
const BASELINE_FILE: &str = "baseline_collection.csv";
const CONTINUOUS_RAW_FILE: &str = "continuous_raw_data.csv";
const CONTINUOUS_AVG_FILE: &str = "continuous_averaged_data.csv";
const TRAINING_FILE: &str = "data_collection_v3_mq3_no_uvir.csv";
const RAW_BLOCK_FILE: &str = "raw_block_data_v3_mq3_no_uvir.csv";

const BASELINES_DIR: &str = "baselines";
const REFS_DIR: &str = "refs";
const CURRENT_BASELINE_FILE: &str = "mq_baseline_current.json";
const REFS_FILE: &str = "as7265x_refs.json";

/// `NaN` literal for a missing numeric; finite values print shortest-form
fn num(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else {
        v.to_string()
    }
}

fn opt_num(v: Option<f64>) -> String {
    v.map(num).unwrap_or_else(|| "NaN".to_string())
}

fn chan_cols(prefix: &str) -> Vec<String> {
    (1..=SPECTRAL_CHANNELS).map(|i| format!("{prefix}{i}")).collect()
}

fn spectrum_cols(s: &Spectrum) -> impl Iterator<Item = String> + '_ {
    s.0.iter().map(|v| num(*v))
}

fn opt_spectrum_cols(s: Option<&Spectrum>) -> Vec<String> {
    match s {
        Some(s) => spectrum_cols(s).collect(),
        None => vec!["NaN".to_string(); SPECTRAL_CHANNELS],
    }
}

fn report_header() -> &'static [String] {
    static HEADER: OnceLock<Vec<String>> = OnceLock::new();
    HEADER.get_or_init(|| {
        [
            "Timestamp",
            "Sample ID",
            "Type",
            "Temperature",
            "Humidity",
            "WHC Index",
            "Fatty Acid Profile",
            "Myoglobin",
            "MQ-137 (Ammonia)",
            "MQ-135 (Air Quality)",
            "MQ-3 (Alcohol)",
            "MQ-4 (Methane)",
            "Quality",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    })
}

fn raw_database_header() -> &'static [String] {
    static HEADER: OnceLock<Vec<String>> = OnceLock::new();
    HEADER.get_or_init(|| {
        let mut cols: Vec<String> =
            ["sample_id", "scan_iter", "temp", "hum", "mq_137", "mq_135", "mq_4", "mq_3"]
                .into_iter()
                .map(String::from)
                .collect();
        cols.extend(chan_cols("as7265x_ch"));
        cols
    })
}

fn baseline_header() -> &'static [String] {
    static HEADER: OnceLock<Vec<String>> = OnceLock::new();
    HEADER.get_or_init(|| {
        let mut cols: Vec<String> = [
            "timestamp_iso",
            "operator",
            "ambient_temp",
            "ambient_hum",
            "baseline_mq137",
            "baseline_mq135",
            "baseline_mq4",
            "baseline_mq3",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        cols.extend(chan_cols("as_dark_ref_ch"));
        cols.extend(chan_cols("as_white_ref_ch"));
        cols
    })
}

fn continuous_header() -> &'static [String] {
    static HEADER: OnceLock<Vec<String>> = OnceLock::new();
    HEADER.get_or_init(|| {
        let mut cols: Vec<String> = [
            "sample_id",
            "meat_type",
            "storage_type",
            "replica",
            "hour",
            "timestamp_iso",
            "temp_c",
            "hum_pct",
            "mq137_v_rs",
            "mq135_v_rs",
            "mq4_v_rs",
            "mq3_v_rs",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        cols.extend(chan_cols("as_raw_ch"));
        cols.push("final_label".to_string());
        cols.push("avg_valid".to_string());
        cols
    })
}

fn raw_block_header() -> &'static [String] {
    static HEADER: OnceLock<Vec<String>> = OnceLock::new();
    HEADER.get_or_init(|| {
        let mut cols: Vec<String> = [
            "sample_id",
            "hour",
            "timestamp_iso",
            "temp_c",
            "hum_pct",
            "mq137_v_rs",
            "mq135_v_rs",
            "mq4_v_rs",
            "mq3_v_rs",
            "led_source",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        cols.extend(chan_cols("as_raw_ch"));
        cols
    })
}

fn training_header() -> &'static [String] {
    static HEADER: OnceLock<Vec<String>> = OnceLock::new();
    HEADER.get_or_init(|| {
        let mut cols: Vec<String> = [
            "sample_id",
            "meat_type",
            "storage_type",
            "replica",
            "hour",
            "timestamp_iso",
            "operator",
            "temp_c",
            "hum_pct",
            "final_mq137",
            "final_mq135",
            "final_mq4",
            "final_mq3",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        cols.extend(chan_cols("as_raw_ch"));
        cols.extend(chan_cols("as_uv_ch"));
        cols.extend(chan_cols("as_ir_ch"));
        cols.push("spoilage_label".to_string());
        cols
    })
}

/// Whether a continuous row is a raw tick or a tumbling-window average
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuousKind {
    Raw,
    Averaged,
}

impl ContinuousKind {
    fn label(self) -> &'static str {
        match self {
            ContinuousKind::Raw => "RAW_5_SEC",
            ContinuousKind::Averaged => "AVG_5_MIN",
        }
    }
}

/// Spectral reference snapshot persisted beside the baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefsSnapshot {
    dark_ref: Option<Spectrum>,
    white_ref: Option<Spectrum>,
    uv_ref: Option<Spectrum>,
    ir_ref: Option<Spectrum>,
}

/// All appenders behind one handle rooted at the data directory
pub struct DataStore {
    data_dir: PathBuf,
}

impl DataStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join(BASELINES_DIR))?;
        std::fs::create_dir_all(data_dir.join(REFS_DIR))?;
        Ok(Self { data_dir })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.path(REPORT_FILE)
    }

    pub fn raw_database_path(&self) -> PathBuf {
        self.path(RAW_DATABASE_FILE)
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.path(BASELINE_FILE)
    }

    pub fn continuous_path(&self, kind: ContinuousKind) -> PathBuf {
        match kind {
            ContinuousKind::Raw => self.path(CONTINUOUS_RAW_FILE),
            ContinuousKind::Averaged => self.path(CONTINUOUS_AVG_FILE),
        }
    }

    pub fn training_path(&self) -> PathBuf {
        self.path(TRAINING_FILE)
    }

    pub fn raw_block_path(&self) -> PathBuf {
        self.path(RAW_BLOCK_FILE)
    }

    /// Append one record, creating the file with its header first if needed
    fn append(&self, path: &Path, header: &[String], fields: &[String]) -> Result<()> {
        debug_assert_eq!(header.len(), fields.len(), "schema drift in {path:?}");
        let existed = path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {path:?}"))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if !existed {
            writer.write_record(header)?;
        }
        writer.write_record(fields)?;
        writer.flush()?;
        Ok(())
    }

    // ---- dashboard archive ----

    /// One canonical report row for an archived scan
    pub fn append_report(
        &self,
        sample_id: &str,
        meat_type: &str,
        frame: &Frame,
        verdict: &Verdict,
    ) -> Result<()> {
        let fields = vec![
            frame.wall_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            sample_id.to_string(),
            meat_type.to_string(),
            num(frame.env.temp_c),
            num(frame.env.humidity_pct),
            verdict.whc_idx.to_string(),
            verdict.fac_idx.to_string(),
            verdict.myo_idx.to_string(),
            num(frame.gas.mq137),
            num(frame.gas.mq135),
            num(frame.gas.mq3),
            num(frame.gas.mq4),
            format!("{} ({})", verdict.category, verdict.grade),
        ];
        self.append(&self.report_path(), report_header(), &fields)
    }

    /// One raw-database row per scan shot
    pub fn append_raw_database(&self, sample_id: &str, shots: &[Frame]) -> Result<()> {
        for shot in shots {
            let mut fields = vec![
                sample_id.to_string(),
                shot.iteration.to_string(),
                num(shot.env.temp_c),
                num(shot.env.humidity_pct),
                num(shot.gas.mq137),
                num(shot.gas.mq135),
                num(shot.gas.mq4),
                num(shot.gas.mq3),
            ];
            fields.extend(spectrum_cols(&shot.white));
            self.append(&self.raw_database_path(), raw_database_header(), &fields)?;
        }
        Ok(())
    }

    /// Scan the report CSV for the highest sequence within a type prefix
    /// and hand out the next one. Computed just-in-time at archive time.
    pub fn next_dashboard_seq(&self, prefix: &str) -> Result<u32> {
        let path = self.report_path();
        if !path.exists() {
            return Ok(1);
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut max_seq = 0u32;
        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(_) => continue,
            };
            if let Some((p, seq)) = record.get(1).and_then(SampleIdentity::parse_dashboard) {
                if p == prefix {
                    max_seq = max_seq.max(seq);
                }
            }
        }
        Ok(max_seq + 1)
    }

    // ---- baseline ----

    /// Baseline history row; absent spectral references serialize as NaN
    pub fn append_baseline_history(&self, baseline: &Baseline) -> Result<()> {
        let mut fields = vec![
            baseline.timestamp.to_rfc3339(),
            baseline.operator.clone(),
            num(baseline.ambient_temp),
            num(baseline.ambient_hum),
            num(baseline.mq137),
            num(baseline.mq135),
            num(baseline.mq4),
            num(baseline.mq3),
        ];
        fields.extend(opt_spectrum_cols(baseline.dark_ref.as_ref()));
        fields.extend(opt_spectrum_cols(baseline.white_ref.as_ref()));
        self.append(&self.baseline_path(), baseline_header(), &fields)
    }

    /// Timestamped JSON snapshot plus the `current` pointer file
    pub fn save_baseline_snapshot(&self, baseline: &Baseline) -> Result<()> {
        let dir = self.data_dir.join(BASELINES_DIR);
        let stamped = dir.join(format!(
            "{}.json",
            baseline.timestamp.format("%Y%m%d_%H%M%S")
        ));
        let json = serde_json::to_string_pretty(baseline)?;
        std::fs::write(&stamped, &json)?;
        std::fs::write(dir.join(CURRENT_BASELINE_FILE), &json)?;
        debug!("baseline snapshot written to {stamped:?}");
        Ok(())
    }

    /// Reload the last session's baseline, if any
    pub fn load_current_baseline(&self) -> Option<Baseline> {
        let path = self.data_dir.join(BASELINES_DIR).join(CURRENT_BASELINE_FILE);
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Spectral reference snapshot, refreshed after each ref capture
    pub fn save_refs_snapshot(&self, baseline: &Baseline) -> Result<()> {
        let snapshot = RefsSnapshot {
            dark_ref: baseline.dark_ref,
            white_ref: baseline.white_ref,
            uv_ref: baseline.uv_ref,
            ir_ref: baseline.ir_ref,
        };
        let path = self.data_dir.join(REFS_DIR).join(REFS_FILE);
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }

    // ---- continuous ----

    pub fn append_continuous(
        &self,
        kind: ContinuousKind,
        meta: &SampleMeta,
        frame: &Frame,
    ) -> Result<()> {
        let mut fields = vec![
            meta.sample_id.clone(),
            meta.meat_type.clone(),
            meta.storage.clone(),
            meta.replica.to_string(),
            meta.hour.to_string(),
            frame.wall_time.to_rfc3339(),
            num(frame.env.temp_c),
            num(frame.env.humidity_pct),
            num(frame.gas.mq137),
            num(frame.gas.mq135),
            num(frame.gas.mq4),
            num(frame.gas.mq3),
        ];
        fields.extend(spectrum_cols(&frame.white));
        fields.push(kind.label().to_string());
        fields.push((kind == ContinuousKind::Averaged).to_string());
        self.append(&self.continuous_path(kind), continuous_header(), &fields)
    }

    // ---- training ----

    /// One raw-block row; gas columns are NaN for the UV and IR passes
    #[allow(clippy::too_many_arguments)]
    pub fn append_raw_block(
        &self,
        meta: &SampleMeta,
        timestamp: DateTime<Utc>,
        env: &EnvReading,
        gas: Option<&GasReading>,
        led_source: LedSource,
        spectrum: &Spectrum,
    ) -> Result<()> {
        let mut fields = vec![
            meta.sample_id.clone(),
            meta.hour.to_string(),
            timestamp.to_rfc3339(),
            num(env.temp_c),
            num(env.humidity_pct),
            opt_num(gas.map(|g| g.mq137)),
            opt_num(gas.map(|g| g.mq135)),
            opt_num(gas.map(|g| g.mq4)),
            opt_num(gas.map(|g| g.mq3)),
            led_source.to_string(),
        ];
        fields.extend(spectrum_cols(spectrum));
        self.append(&self.raw_block_path(), raw_block_header(), &fields)
    }

    /// The canonical averaged training row
    pub fn append_training(&self, row: &TrainingRow) -> Result<()> {
        let mut fields = vec![
            row.meta.sample_id.clone(),
            row.meta.meat_type.clone(),
            row.meta.storage.clone(),
            row.meta.replica.to_string(),
            row.meta.hour.to_string(),
            row.timestamp.to_rfc3339(),
            row.operator.clone(),
            num(row.env.temp_c),
            num(row.env.humidity_pct),
            num(row.gas.mq137),
            num(row.gas.mq135),
            num(row.gas.mq4),
            num(row.gas.mq3),
        ];
        fields.extend(spectrum_cols(&row.white));
        fields.extend(spectrum_cols(&row.uv));
        fields.extend(spectrum_cols(&row.ir));
        fields.push(
            row.label
                .map(|l| l.to_string())
                .unwrap_or_else(|| "NaN".to_string()),
        );
        self.append(&self.training_path(), training_header(), &fields)
    }

    /// Highest replica already used for a meat/storage pair across the
    /// training and continuous files, plus one
    pub fn next_training_replica(&self, meat: &str, storage: &str) -> Result<u32> {
        let wanted = format!("{meat}_{storage}_");
        let mut max_replica = 0u32;
        for path in [
            self.training_path(),
            self.continuous_path(ContinuousKind::Raw),
            self.continuous_path(ContinuousKind::Averaged),
        ] {
            if !path.exists() {
                continue;
            }
            let mut reader = csv::Reader::from_path(&path)?;
            for record in reader.records() {
                let record = match record {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                if let Some(id) = record.get(0) {
                    if let Some(rest) = id.strip_prefix(&wanted) {
                        if let Ok(n) = rest.parse::<u32>() {
                            max_replica = max_replica.max(n);
                        }
                    }
                }
            }
        }
        Ok(max_replica + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ColorTag, Grade, QualityCategory};
    use crate::model::SPECTRAL_CHANNELS;

    fn store() -> (tempfile::TempDir, DataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn meta() -> SampleMeta {
        SampleMeta {
            sample_id: "BREAST_CHILLED_1".into(),
            meat_type: "BREAST".into(),
            storage: "CHILLED".into(),
            hour: 12,
            replica: 1,
        }
    }

    fn frame() -> Frame {
        Frame::new(
            EnvReading {
                temp_c: 23.1,
                humidity_pct: 61.0,
            },
            GasReading {
                mq137: 1.1,
                mq135: 0.2,
                mq4: 0.3,
                mq3: 0.5,
            },
            Spectrum([42.0; SPECTRAL_CHANNELS]),
        )
    }

    fn verdict() -> Verdict {
        Verdict {
            grade: Grade::A,
            category: QualityCategory::Fresh,
            color_tag: ColorTag::High,
            score: 95,
            enose_idx: 85,
            whc_idx: 84,
            fac_idx: 63,
            myo_idx: 50,
            myo_est: 1.75,
            fat_est: 5.04,
            whc_est: 83.6,
        }
    }

    #[test]
    fn test_header_written_once_and_matches_rows() {
        let (_dir, store) = store();
        store.append_report("PS-CB-0001", "Chicken Breast", &frame(), &verdict()).unwrap();
        store.append_report("PS-CB-0002", "Chicken Breast", &frame(), &verdict()).unwrap();

        let content = std::fs::read_to_string(store.report_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Timestamp,Sample ID,Type,"));
        // Field-for-field: the data row has exactly as many columns
        assert_eq!(
            lines[0].split(',').count(),
            lines[1].split(',').count()
        );
        assert_eq!(lines[0].matches("Timestamp").count(), 1);
        assert!(lines[2].contains("PS-CB-0002"));
    }

    #[test]
    fn test_header_idempotence_after_delete() {
        let (_dir, store) = store();
        store.append_report("PS-CB-0001", "Chicken Breast", &frame(), &verdict()).unwrap();
        std::fs::remove_file(store.report_path()).unwrap();
        store.append_report("PS-CB-0002", "Chicken Breast", &frame(), &verdict()).unwrap();

        let content = std::fs::read_to_string(store.report_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Timestamp,"));
    }

    #[test]
    fn test_missing_numerics_serialize_as_nan() {
        let (_dir, store) = store();
        let mut f = frame();
        f.env = EnvReading::nan();
        store
            .append_raw_database("PS-CB-0001", &[f])
            .unwrap();
        let content = std::fs::read_to_string(store.raw_database_path()).unwrap();
        let row = content.lines().nth(1).unwrap();
        assert!(row.contains("PS-CB-0001,0,NaN,NaN,"));
    }

    #[test]
    fn test_next_dashboard_seq_scans_existing_rows() {
        let (_dir, store) = store();
        assert_eq!(store.next_dashboard_seq("CB").unwrap(), 1);
        store.append_report("PS-CB-0004", "Chicken Breast", &frame(), &verdict()).unwrap();
        store.append_report("PS-TH-0009", "Chicken Thigh", &frame(), &verdict()).unwrap();
        assert_eq!(store.next_dashboard_seq("CB").unwrap(), 5);
        assert_eq!(store.next_dashboard_seq("TH").unwrap(), 10);
        assert_eq!(store.next_dashboard_seq("WG").unwrap(), 1);
    }

    #[test]
    fn test_next_training_replica_spans_files() {
        let (_dir, store) = store();
        assert_eq!(store.next_training_replica("BREAST", "CHILLED").unwrap(), 1);
        store
            .append_continuous(ContinuousKind::Raw, &meta(), &frame())
            .unwrap();
        let mut m = meta();
        m.sample_id = "BREAST_CHILLED_4".into();
        m.replica = 4;
        store
            .append_continuous(ContinuousKind::Averaged, &m, &frame())
            .unwrap();
        assert_eq!(store.next_training_replica("BREAST", "CHILLED").unwrap(), 5);
        assert_eq!(store.next_training_replica("THIGH", "CHILLED").unwrap(), 1);
    }

    #[test]
    fn test_baseline_history_with_absent_refs() {
        let (_dir, store) = store();
        let baseline = Baseline {
            timestamp: Utc::now(),
            operator: "system".into(),
            ambient_temp: 22.5,
            ambient_hum: 60.0,
            mq137: 1.2,
            mq135: 0.16,
            mq4: 0.35,
            mq3: 0.61,
            dark_ref: None,
            white_ref: Some(Spectrum([9.0; SPECTRAL_CHANNELS])),
            uv_ref: None,
            ir_ref: None,
        };
        store.append_baseline_history(&baseline).unwrap();
        let content = std::fs::read_to_string(store.baseline_path()).unwrap();
        let row = content.lines().nth(1).unwrap();
        // Dark ref columns are NaN, white ref columns carry the value
        assert_eq!(row.matches("NaN").count(), SPECTRAL_CHANNELS);
        assert!(row.contains('9'));
    }

    #[test]
    fn test_baseline_snapshot_round_trip() {
        let (_dir, store) = store();
        let baseline = Baseline {
            timestamp: Utc::now(),
            operator: "system".into(),
            ambient_temp: 22.5,
            ambient_hum: 60.0,
            mq137: 1.2,
            mq135: 0.16,
            mq4: 0.35,
            mq3: 0.61,
            dark_ref: Some(Spectrum::zeros()),
            white_ref: None,
            uv_ref: None,
            ir_ref: None,
        };
        store.save_baseline_snapshot(&baseline).unwrap();
        let loaded = store.load_current_baseline().unwrap();
        assert_eq!(loaded.mq137, 1.2);
        assert_eq!(loaded.dark_ref, Some(Spectrum::zeros()));
    }

    #[test]
    fn test_raw_block_rows_nan_gas_for_uv() {
        let (_dir, store) = store();
        let f = frame();
        store
            .append_raw_block(&meta(), f.wall_time, &f.env, None, LedSource::Uv, &f.white)
            .unwrap();
        let content = std::fs::read_to_string(store.raw_block_path()).unwrap();
        let row = content.lines().nth(1).unwrap();
        assert!(row.contains("NaN,NaN,NaN,NaN,UV"));
    }

    #[test]
    fn test_training_row_has_54_channels() {
        let (_dir, store) = store();
        let row = TrainingRow {
            meta: meta(),
            timestamp: Utc::now(),
            operator: "Operator".into(),
            env: EnvReading {
                temp_c: 22.0,
                humidity_pct: 55.0,
            },
            gas: GasReading {
                mq137: 1.0,
                mq135: 0.2,
                mq4: 0.3,
                mq3: 0.5,
            },
            white: Spectrum([1.0; SPECTRAL_CHANNELS]),
            uv: Spectrum([2.0; SPECTRAL_CHANNELS]),
            ir: Spectrum([3.0; SPECTRAL_CHANNELS]),
            label: Some(crate::model::SpoilageLabel::SemiFresh),
        };
        store.append_training(&row).unwrap();
        let content = std::fs::read_to_string(store.training_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0].split(',').count(), 13 + 54 + 1);
        assert!(lines[1].ends_with("Semi-Fresh"));
    }
}
