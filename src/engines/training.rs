// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Training acquisition engine
//!
//! Three blocks of five triplet shots per sample. Every shot lands three
//! labelled rows (WHITE/UV/IR) in the raw-block log; each block is reduced
//! to its arithmetic mean, and the three block means are averaged again
//! into the canonical training row. The ground-truth label arrives later
//! from the operator prompt; a cancelled prompt aborts the save but the
//! post-purge still runs.

use chrono::Utc;

use super::{run_engine, EngineError, SharedHal};
use crate::config::AcquisitionConfig;
use crate::core::{EventBus, StopToken};
use crate::fusion::FusionReader;
use crate::hal::HalHandles;
use crate::model::{Frame, LedSource, SampleMeta, TrainingRow};
use crate::persist::DataStore;

pub fn run(
    shared: &SharedHal,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    store: &DataStore,
    meta: &SampleMeta,
    operator: &str,
) -> Result<TrainingRow, EngineError> {
    run_engine(shared, "training", bus, |hal| {
        body(hal, acq, bus, token, store, meta, operator)
    })
}

fn body(
    hal: &mut HalHandles,
    acq: &AcquisitionConfig,
    bus: &EventBus,
    token: &StopToken,
    store: &DataStore,
    meta: &SampleMeta,
    operator: &str,
) -> Result<TrainingRow, EngineError> {
    let blocks = acq.training_blocks.max(1);
    let shots_per_block = acq.training_shots.max(1);
    let total_shots = blocks * shots_per_block;
    let mut done_shots = 0u32;
    let mut block_means: Vec<Frame> = Vec::with_capacity(blocks as usize);

    for block in 1..=blocks {
        if token.is_stopped() {
            return Err(EngineError::Cancelled);
        }
        bus.publish_log(format!("--- Starting block {block}/{blocks} ---"));
        let mut shots: Vec<Frame> = Vec::with_capacity(shots_per_block as usize);

        for shot in 1..=shots_per_block {
            if token.is_stopped() {
                return Err(EngineError::Cancelled);
            }
            bus.publish_log(format!(
                "Block {block}: reading white/UV/IR ({shot}/{shots_per_block})"
            ));

            let mut frame = FusionReader::new(hal, acq, token).read_triplet()?;
            frame.iteration = shot;
            frame.meta = Some(meta.clone());

            // Three raw rows per shot; gas columns only apply to the white
            // pass. Write failures are reported and the run carries on.
            let mut persist = |led: LedSource, spectrum| {
                let gas = (led == LedSource::White).then_some(&frame.gas);
                if let Err(e) =
                    store.append_raw_block(meta, frame.wall_time, &frame.env, gas, led, spectrum)
                {
                    bus.publish_error(format!("persistence failure: {e}"));
                }
            };
            persist(LedSource::White, &frame.white);
            if let Some(uv) = &frame.uv {
                persist(LedSource::Uv, uv);
            }
            if let Some(ir) = &frame.ir {
                persist(LedSource::Ir, ir);
            }

            shots.push(frame);
            done_shots += 1;
            bus.publish_progress((done_shots * 100 / total_shots) as u8);

            if shot < shots_per_block {
                token.sleep(acq.training_shot_gap());
            }
        }

        // Block reduction is the arithmetic mean, never the max envelope
        if let Some(mean) = Frame::aggregate_mean(&shots) {
            block_means.push(mean);
        }
        bus.publish_log(format!("Block {block} complete"));

        if block < blocks {
            bus.publish_log(format!(
                "Waiting {:?} before next block",
                acq.training_block_gap()
            ));
            token.sleep(acq.training_block_gap());
        }
    }

    let final_avg = Frame::aggregate_mean(&block_means).ok_or(EngineError::Cancelled)?;
    bus.publish_log("All blocks complete; final average computed");

    Ok(TrainingRow {
        meta: meta.clone(),
        timestamp: Utc::now(),
        operator: operator.to_string(),
        env: final_avg.env,
        gas: final_avg.gas,
        white: final_avg.white,
        uv: final_avg.uv.unwrap_or_else(crate::model::Spectrum::zeros),
        ir: final_avg.ir.unwrap_or_else(crate::model::Spectrum::zeros),
        label: None,
    })
}

/// Persist the canonical row once the operator confirmed the label
pub fn save_labelled(
    store: &DataStore,
    mut row: TrainingRow,
    label: crate::model::SpoilageLabel,
) -> Result<(), EngineError> {
    row.label = Some(label);
    store
        .append_training(&row)
        .map_err(|e| EngineError::Persist(e.to_string()))
}
