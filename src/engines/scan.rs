// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Single-sample scan engine
//!
//! Takes N fused shots with per-shot illumination, folds them into a
//! worst-case envelope (elementwise max) and runs the classifier on the
//! aggregate. Archival is a separate step driven by the operator's answer
//! to the archive prompt; a cancelled scan persists nothing.

use super::{run_engine, EngineError, SharedHal};
use crate::classify::{Classifier, Verdict};
use crate::config::AcquisitionConfig;
use crate::core::{EventBus, StopToken};
use crate::fusion::FusionReader;
use crate::hal::HalHandles;
use crate::model::Frame;
use crate::persist::DataStore;

/// A completed scan: the envelope the verdict was computed from plus the
/// raw shots that fed it
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub aggregate: Frame,
    pub shots: Vec<Frame>,
    pub verdict: Verdict,
}

pub fn run(
    shared: &SharedHal,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    classifier: &Classifier,
) -> Result<ScanOutcome, EngineError> {
    run_engine(shared, "scan", bus, |hal| {
        body(hal, acq, bus, token, classifier)
    })
}

fn body(
    hal: &mut HalHandles,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    classifier: &Classifier,
) -> Result<ScanOutcome, EngineError> {
    let n = acq.scan_shots.max(1);
    let mut shots: Vec<Frame> = Vec::with_capacity(n as usize);

    for i in 1..=n {
        if token.is_stopped() {
            // No persisted rows for a cancelled scan; chamber goes dark
            let _ = hal.led.set(false);
            return Err(EngineError::Cancelled);
        }
        bus.publish_progress(((i - 1) * 100 / n) as u8);

        let mut frame = FusionReader::new(hal, acq, token).read_all_sensors()?;
        frame.iteration = i;
        shots.push(frame);

        if i < n {
            token.sleep(acq.scan_shot_gap());
        }
    }
    bus.publish_progress(100);

    let aggregate = Frame::aggregate_max(&shots).ok_or(EngineError::Cancelled)?;
    let verdict = classifier.classify(&aggregate);
    bus.publish_log(format!(
        "Scan complete: {} ({}), eNose {} / WHC {} / FAC {} / Myo {}",
        verdict.category,
        verdict.grade,
        verdict.enose_idx,
        verdict.whc_idx,
        verdict.fac_idx,
        verdict.myo_idx
    ));

    Ok(ScanOutcome {
        aggregate,
        shots,
        verdict,
    })
}

/// Persist a confirmed scan: one report row plus one raw-database row per
/// shot. The caller supplies the sample ID it resolved just-in-time.
pub fn archive(
    store: &DataStore,
    outcome: &ScanOutcome,
    sample_id: &str,
    meat_type: &str,
) -> Result<(), EngineError> {
    store
        .append_report(sample_id, meat_type, &outcome.aggregate, &outcome.verdict)
        .map_err(|e| EngineError::Persist(e.to_string()))?;
    store
        .append_raw_database(sample_id, &outcome.shots)
        .map_err(|e| EngineError::Persist(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationTable;
    use crate::core::EngineEvent;
    use crate::hal::mock::MockHal;
    use crate::model::{GasReading, SPECTRAL_CHANNELS};
    use std::sync::Arc;

    fn classifier() -> Classifier {
        Classifier::new(Arc::new(CalibrationTable {
            mean_spectral_fresh: [200.0; SPECTRAL_CHANNELS],
            mean_spectral_semi: [400.0; SPECTRAL_CHANNELS],
            fresh_ch2_min: 50.0,
            fresh_mq137_max: 1.5,
            fresh_mq3_max: 0.8,
            max_redness: 300.0,
            max_luma: 250.0,
            whc_base: 88.0,
        }))
    }

    fn acq() -> AcquisitionConfig {
        AcquisitionConfig::instant()
    }

    #[test]
    fn test_scan_takes_n_shots_and_aggregates_by_max() {
        let mock = MockHal::new();
        let shared = SharedHal::new(mock.handles());
        mock.script_gas([0.4, 0.9, 0.5, 0.6, 0.3].into_iter().map(|v| GasReading {
            mq137: v,
            mq135: 0.2,
            mq4: 0.3,
            mq3: 0.5,
        }));
        let bus = EventBus::new(256);
        let outcome = run(&shared, &acq(), &bus, &StopToken::new(), &classifier()).unwrap();

        assert_eq!(outcome.shots.len(), 5);
        assert_eq!(outcome.shots[0].iteration, 1);
        assert_eq!(outcome.shots[4].iteration, 5);
        // Worst-case envelope, not the mean
        assert_eq!(outcome.aggregate.gas.mq137, 0.9);
        assert!(mock.all_quiet());
    }

    #[test]
    fn test_progress_sequence() {
        let mock = MockHal::new();
        let shared = SharedHal::new(mock.handles());
        let bus = EventBus::new(256);
        let mut rx = bus.subscribe();
        run(&shared, &acq(), &bus, &StopToken::new(), &classifier()).unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::Progress(p) = event {
                seen.push(p);
            }
        }
        assert_eq!(seen, vec![0, 20, 40, 60, 80, 100]);
    }

    #[test]
    fn test_cancelled_scan_cleans_up_without_rows() {
        let mock = MockHal::new();
        let shared = SharedHal::new(mock.handles());
        let bus = EventBus::new(256);
        let token = StopToken::new();
        token.stop();
        let err = run(&shared, &acq(), &bus, &token, &classifier()).unwrap_err();
        assert!(err.is_cancelled());
        assert!(mock.all_quiet());
    }

    #[test]
    fn test_archive_writes_report_and_raw_rows() {
        let mock = MockHal::new();
        let shared = SharedHal::new(mock.handles());
        let bus = EventBus::new(256);
        let outcome = run(&shared, &acq(), &bus, &StopToken::new(), &classifier()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path()).unwrap();
        let seq = store.next_dashboard_seq("CB").unwrap();
        let sample_id = format!("PS-CB-{seq:04}");
        archive(&store, &outcome, &sample_id, "Chicken Breast").unwrap();

        let report = std::fs::read_to_string(store.report_path()).unwrap();
        assert_eq!(report.lines().count(), 2);
        assert!(report.contains("PS-CB-0001"));

        let raw = std::fs::read_to_string(store.raw_database_path()).unwrap();
        // header + one row per shot
        assert_eq!(raw.lines().count(), 6);
    }
}
