// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Event bus for core-to-UI communication
//!
//! The core publishes a typed event stream and consumes a symmetric command
//! channel; it has no dependency on any UI framework. Every engine worker
//! ends its life with `Error` (on fault or cancel) followed by `Finished`,
//! or just `Finished` on success.

use tokio::sync::broadcast;

use crate::classify::Verdict;
use crate::core::state_machine::MachineState;
use crate::model::{Baseline, Frame, SampleMeta, SpoilageLabel, TrainingRow};

/// Events the core emits toward the UI
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Operator-facing status line
    Log(String),
    /// 0-100 progress of the running operation
    Progress(u8),
    /// The acquisition state machine moved
    StateChange(MachineState),
    /// One raw acquisition frame (continuous mode, per tick)
    RawSample(Box<Frame>),
    /// One tumbling-window average (continuous mode, per full window)
    AveragedSample(Box<Frame>),
    /// A finished dashboard scan awaiting the archive decision
    ScanResult {
        verdict: Box<Verdict>,
        shots: Vec<Frame>,
    },
    /// A finished training run awaiting its ground-truth label
    TrainingResult(Box<TrainingRow>),
    /// A fresh baseline was captured and swapped in
    BaselineReady(Box<Baseline>),
    /// Fault or cancellation; always followed by `Finished`
    Error(String),
    /// The owning worker exited; emitted exactly once per engine run
    Finished,
}

/// Operator answers to the archive / label prompts
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Archive the finished scan under a fresh sample ID
    ArchiveNew,
    /// Archive under the previous sample's ID (re-test of the same bird)
    ArchiveSame,
    /// Skip archiving; the post-purge still runs
    Discard,
    /// Ground truth for the finished training run
    Label(SpoilageLabel),
}

/// Commands the UI posts into the state machine
#[derive(Debug, Clone)]
pub enum Command {
    /// Operator unlocked the instrument
    Unlock,
    /// Begin pre-purge, stabilize and gas baseline
    StartInit,
    /// Capture the spectral reference the current state is waiting for
    CaptureRef,
    /// Run one dashboard scan for the selected meat type
    StartScan {
        meat_type: String,
        prefix: String,
    },
    /// Start the continuous monitoring loop
    StartContinuous { meta: SampleMeta },
    /// Run a three-block training acquisition
    StartTraining { meta: SampleMeta },
    /// Operator-initiated chamber purge
    StartPurge,
    /// Answer to the archive / label prompt
    Confirm(Confirmation),
    /// Dismiss the prompt without saving
    Cancel,
    /// Cooperative stop of the running engine
    Stop,
}

/// Central broadcast bus; cloneable handles feed every engine
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: EngineEvent) {
        // A bus with no subscribers is fine; events are fire-and-forget
        let _ = self.tx.send(event);
    }

    pub fn publish_log(&self, message: impl Into<String>) {
        self.publish(EngineEvent::Log(message.into()));
    }

    pub fn publish_progress(&self, percent: u8) {
        self.publish(EngineEvent::Progress(percent.min(100)));
    }

    pub fn publish_state(&self, state: MachineState) {
        self.publish(EngineEvent::StateChange(state));
    }

    pub fn publish_raw_sample(&self, frame: Frame) {
        self.publish(EngineEvent::RawSample(Box::new(frame)));
    }

    pub fn publish_averaged_sample(&self, frame: Frame) {
        self.publish(EngineEvent::AveragedSample(Box::new(frame)));
    }

    pub fn publish_scan_result(&self, verdict: Verdict, shots: Vec<Frame>) {
        self.publish(EngineEvent::ScanResult {
            verdict: Box::new(verdict),
            shots,
        });
    }

    pub fn publish_training_result(&self, row: TrainingRow) {
        self.publish(EngineEvent::TrainingResult(Box::new(row)));
    }

    pub fn publish_baseline(&self, baseline: Baseline) {
        self.publish(EngineEvent::BaselineReady(Box::new(baseline)));
    }

    pub fn publish_error(&self, message: impl Into<String>) {
        self.publish(EngineEvent::Error(message.into()));
    }

    pub fn publish_finished(&self) {
        self.publish(EngineEvent::Finished);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_see_events_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish_log("starting");
        bus.publish_progress(40);
        bus.publish_finished();

        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Log(_)));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Progress(40)));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Finished));
    }

    #[test]
    fn test_progress_is_clamped() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish_progress(250);
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Progress(100)));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish_log("nobody listening");
        bus.publish_finished();
    }
}
