// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Gas baseline capture
//!
//! Samples gas and ambient conditions at 1 Hz for the configured window
//! (30 s by default), reporting progress each second, and emits the mean
//! of all eight fields as the session's new baseline. The operator can
//! cancel between samples; the worker finishes its current 1 Hz slice and
//! reports a cancellation error.

use chrono::Utc;

use super::{run_engine, EngineError, SharedHal};
use crate::config::AcquisitionConfig;
use crate::core::{EventBus, StopToken};
use crate::hal::HalHandles;
use crate::model::Baseline;

/// Standalone baseline engine run (claims the hardware itself)
pub fn run(
    shared: &SharedHal,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    operator: &str,
) -> Result<Baseline, EngineError> {
    run_engine(shared, "baseline", bus, |hal| {
        capture(hal, acq, bus, token, operator)
    })
}

/// The sampling loop itself; the init sequence composes this after its
/// pre-purge under a single hardware claim.
pub(crate) fn capture(
    hal: &mut HalHandles,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    operator: &str,
) -> Result<Baseline, EngineError> {
    let samples = acq.baseline_samples.max(1);
    let mut mq137 = Vec::with_capacity(samples as usize);
    let mut mq135 = Vec::with_capacity(samples as usize);
    let mut mq4 = Vec::with_capacity(samples as usize);
    let mut mq3 = Vec::with_capacity(samples as usize);
    let mut temps = Vec::with_capacity(samples as usize);
    let mut hums = Vec::with_capacity(samples as usize);

    bus.publish_log(format!(
        "Capturing gas baseline: {samples} samples at {:?} intervals",
        acq.baseline_interval()
    ));

    for i in 0..samples {
        if token.is_stopped() {
            return Err(EngineError::Cancelled);
        }
        let gas = hal.gas.read()?;
        let env = hal.env.read()?;
        mq137.push(gas.mq137);
        mq135.push(gas.mq135);
        mq4.push(gas.mq4);
        mq3.push(gas.mq3);
        temps.push(env.temp_c);
        hums.push(env.humidity_pct);

        token.sleep(acq.baseline_interval());
        bus.publish_progress(((i + 1) * 100 / samples) as u8);
    }

    let mean = |vals: &[f64]| vals.iter().sum::<f64>() / vals.len() as f64;
    Ok(Baseline {
        timestamp: Utc::now(),
        operator: operator.to_string(),
        ambient_temp: mean(&temps),
        ambient_hum: mean(&hums),
        mq137: mean(&mq137),
        mq135: mean(&mq135),
        mq4: mean(&mq4),
        mq3: mean(&mq3),
        dark_ref: None,
        white_ref: None,
        uv_ref: None,
        ir_ref: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHal;
    use crate::hal::HwError;
    use crate::model::GasReading;

    fn acq() -> AcquisitionConfig {
        AcquisitionConfig::instant()
    }

    #[test]
    fn test_baseline_is_mean_of_samples() {
        let mock = MockHal::new();
        let shared = SharedHal::new(mock.handles());
        mock.script_gas((1..=30).map(|i| GasReading {
            mq137: i as f64,
            mq135: 0.2,
            mq4: 0.3,
            mq3: 0.5,
        }));
        let bus = EventBus::new(256);
        let baseline = run(&shared, &acq(), &bus, &StopToken::new(), "system").unwrap();
        // mean of 1..=30 is 15.5
        assert!((baseline.mq137 - 15.5).abs() < 1e-9);
        assert_eq!(baseline.mq135, 0.2);
        assert_eq!(baseline.ambient_temp, 22.0);
        assert!(baseline.dark_ref.is_none());
    }

    #[test]
    fn test_progress_reaches_100() {
        let mock = MockHal::new();
        let shared = SharedHal::new(mock.handles());
        let bus = EventBus::new(256);
        let mut rx = bus.subscribe();
        run(&shared, &acq(), &bus, &StopToken::new(), "system").unwrap();

        let mut last_progress = 0;
        while let Ok(event) = rx.try_recv() {
            if let crate::core::EngineEvent::Progress(p) = event {
                assert!(p >= last_progress);
                last_progress = p;
            }
        }
        assert_eq!(last_progress, 100);
    }

    #[test]
    fn test_cancel_reports_cancellation_error() {
        let mock = MockHal::new();
        let shared = SharedHal::new(mock.handles());
        let bus = EventBus::new(256);
        let token = StopToken::new();
        token.stop();
        let err = run(&shared, &acq(), &bus, &token, "system").unwrap_err();
        assert!(err.is_cancelled());
        assert!(mock.all_quiet());
    }

    #[test]
    fn test_hw_fault_bubbles_and_cleans_up() {
        let mock = MockHal::new();
        let shared = SharedHal::new(mock.handles());
        mock.fault_gas(HwError::not_initialized("ADS1115/MQ array"));
        let bus = EventBus::new(256);
        let err = run(&shared, &acq(), &bus, &StopToken::new(), "system").unwrap_err();
        assert!(matches!(err, EngineError::Hw(_)));
        assert!(mock.all_quiet());
    }
}
