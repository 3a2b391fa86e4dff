// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Continuous monitoring engine
//!
//! Fixed-interval white-only samples appended to the raw log, with a
//! tumbling window of W samples averaged into the second log. The interval
//! sleep is sliced so a stop request lands within 100 ms; a stop between
//! ticks exits cleanly, and `Finished` is emitted exactly once on every
//! path by the engine epilogue.

use std::time::Instant;

use super::{run_engine, EngineError, SharedHal};
use crate::config::AcquisitionConfig;
use crate::core::{EventBus, StopToken};
use crate::fusion::FusionReader;
use crate::hal::HalHandles;
use crate::model::{Frame, SampleMeta};
use crate::persist::{ContinuousKind, DataStore};

pub fn run(
    shared: &SharedHal,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    store: &DataStore,
    meta: &SampleMeta,
) -> Result<(), EngineError> {
    run_engine(shared, "continuous", bus, |hal| {
        body(hal, acq, bus, token, store, meta)
    })
}

fn body(
    hal: &mut HalHandles,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    store: &DataStore,
    meta: &SampleMeta,
) -> Result<(), EngineError> {
    let window = acq.continuous_window.max(1);
    let mut buffer: Vec<Frame> = Vec::with_capacity(window);

    bus.publish_log(format!(
        "Continuous monitoring started (interval {:?}, window {window} samples)",
        acq.continuous_interval()
    ));

    loop {
        if token.is_stopped() {
            bus.publish_log("Stop received; continuous monitoring ending");
            return Ok(());
        }
        let tick_start = Instant::now();

        let mut frame = FusionReader::new(hal, acq, token)
            .read_white_only(acq.continuous_led_stab())?;
        frame.meta = Some(meta.clone());

        // A failed append is reported but never aborts the loop
        if let Err(e) = store.append_continuous(ContinuousKind::Raw, meta, &frame) {
            bus.publish_error(format!("persistence failure: {e}"));
        }
        bus.publish_raw_sample(frame.clone());
        buffer.push(frame);

        if buffer.len() == window {
            if let Some(mut avg) = Frame::aggregate_mean(&buffer) {
                // Stamp the average with the last reading of the window
                avg.wall_time = buffer[window - 1].wall_time;
                avg.meta = Some(meta.clone());
                if let Err(e) = store.append_continuous(ContinuousKind::Averaged, meta, &avg) {
                    bus.publish_error(format!("persistence failure: {e}"));
                }
                bus.publish_averaged_sample(avg);
            }
            // Tumbling: the next window starts empty, no overlap
            buffer.clear();
            bus.publish_log(format!("Window of {window} samples averaged; buffers cleared"));
        }

        let elapsed = tick_start.elapsed();
        if let Some(remaining) = acq.continuous_interval().checked_sub(elapsed) {
            if !token.sleep(remaining) {
                bus.publish_log("Stop received; continuous monitoring ending");
                return Ok(());
            }
        }
    }
}
