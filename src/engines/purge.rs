// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Dynamic purge controller
//!
//! Drives the fan until all four gas voltages fall within the tolerance
//! band around their baseline targets, with a hard 60 s escape. Each check
//! emits one status line naming every sensor, its voltage and whether it
//! has cleared. The fan stops on every exit path.

use std::sync::Arc;
use std::time::Instant;

use super::{run_engine, EngineError, SharedHal};
use crate::config::AcquisitionConfig;
use crate::core::{EventBus, StopToken};
use crate::hal::HalHandles;
use crate::model::Baseline;

/// Why the purge loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeReason {
    /// Every sensor returned to its tolerance band
    Clean,
    /// The hard deadline fired first; the caller decides whether to warn
    Timeout,
    /// Operator stop
    Cancelled,
}

pub fn run(
    shared: &SharedHal,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    baseline: Arc<Baseline>,
) -> Result<PurgeReason, EngineError> {
    run_engine(shared, "purge", bus, |hal| {
        body(hal, acq, bus, token, &baseline)
    })
}

/// Tolerance-band membership; a zero target only accepts a zero reading
fn at_baseline(current: f64, target: f64, tolerance: f64) -> bool {
    if target == 0.0 {
        return current == 0.0;
    }
    let low = target * (1.0 - tolerance);
    let high = target * (1.0 + tolerance);
    low <= current && current <= high
}

fn body(
    hal: &mut HalHandles,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    baseline: &Baseline,
) -> Result<PurgeReason, EngineError> {
    let tolerance = acq.purge_tolerance_pct / 100.0;
    let targets = baseline.gas_targets();

    hal.fan.set_duty(100)?;
    bus.publish_log(format!(
        "Dynamic purge started, tolerance +/- {:.1}%",
        acq.purge_tolerance_pct
    ));

    let start = Instant::now();
    loop {
        if token.is_stopped() {
            bus.publish_log("Purge cancelled by operator");
            return Ok(PurgeReason::Cancelled);
        }
        if start.elapsed() >= acq.purge_timeout() {
            bus.publish_log("Purge deadline reached before all sensors cleared");
            return Ok(PurgeReason::Timeout);
        }

        let gas = hal.gas.read()?;
        let readings = gas.labelled();

        let mut all_clear = true;
        let mut status = Vec::with_capacity(targets.len());
        for (&(label, target), &(_, current)) in targets.iter().zip(readings.iter()) {
            let cleared = at_baseline(current, target, tolerance);
            all_clear &= cleared;
            status.push(format!(
                "{label}: {current:.3}V (Tgt: {target:.3}V) [{}]",
                if cleared { '+' } else { '-' }
            ));
        }
        bus.publish_log(format!("Purging... {}", status.join(" | ")));

        if all_clear {
            bus.publish_log("All sensors returned to baseline; purge complete");
            return Ok(PurgeReason::Clean);
        }
        if !token.sleep(acq.purge_check()) {
            bus.publish_log("Purge cancelled by operator");
            return Ok(PurgeReason::Cancelled);
        }
    }
}
