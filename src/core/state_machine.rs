// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Acquisition state machine
//!
//! A finite automaton with a single owning control thread. The UI posts
//! `Command`s; worker threads do the blocking I/O and report back over an
//! internal channel. The machine gates the hardware so dashboard scan,
//! training, continuous monitoring, baseline capture and purge never
//! overlap, and any fatal fault lands back in `NeedsInit` after the
//! universal HAL cleanup has run.
//!
//! ```text
//! Locked --unlock--> NeedsInit --start_init--> PrePurge -> Stabilize
//!   -> InitializingGas --baseline_ok--> NeedsDarkRef (training)
//!                                     | ReadyToMeasure (otherwise)
//! NeedsDarkRef -> NeedsWhiteRef -> [NeedsUvRef -> NeedsIrRef ->] ReadyToMeasure
//! ReadyToMeasure --start--> Measuring --done--> Purging/PostPurge --> ReadyToMeasure
//! any --fatal--> NeedsInit
//! ```

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::calibration::CalibrationTable;
use crate::classify::Classifier;
use crate::config::AcquisitionConfig;
use crate::core::event_bus::{Command, Confirmation, EventBus};
use crate::core::scheduler::{spawn_worker, StopToken, WorkerHandle};
use crate::engines::purge::PurgeReason;
use crate::engines::scan::ScanOutcome;
use crate::engines::{self, EngineError, SharedHal};
use crate::fusion::FusionReader;
use crate::model::{Baseline, LedSource, SampleMeta, Spectrum, TrainingRow};
use crate::persist::DataStore;

/// Operator identity stamped on baselines and training rows
const OPERATOR: &str = "Operator";
const BASELINE_OPERATOR: &str = "system";

/// Process-wide acquisition state, owned by exactly one engine at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    Locked,
    NeedsInit,
    PrePurge,
    Stabilize,
    InitializingGas,
    NeedsDarkRef,
    NeedsWhiteRef,
    NeedsUvRef,
    NeedsIrRef,
    ReadyToMeasure,
    Measuring,
    Purging,
    PostPurge,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which acquisition front-end owns the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dashboard,
    Continuous,
    Training,
}

/// Spectral reference slots the ref states fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Dark,
    White,
    Uv,
    Ir,
}

/// Worker-to-machine messages
enum Internal {
    Phase(MachineState),
    BaselineDone(Result<Baseline, EngineError>),
    RefDone(RefKind, Result<Spectrum, EngineError>),
    ScanDone(Box<Result<PendingScan, EngineError>>),
    ContinuousDone(Result<(), EngineError>),
    TrainingDone(Box<Result<TrainingRow, EngineError>>),
    PurgeDone(Result<PurgeReason, EngineError>),
}

pub struct StateMachine {
    mode: Mode,
    acq: AcquisitionConfig,
    shared: Arc<SharedHal>,
    bus: Arc<EventBus>,
    store: Arc<DataStore>,
    classifier: Classifier,

    state: Arc<RwLock<MachineState>>,
    baseline: Arc<RwLock<Option<Arc<Baseline>>>>,

    worker: Option<WorkerHandle>,
    pending_scan: Option<PendingScan>,
    pending_training: Option<TrainingRow>,
    last_sample_id: Option<String>,
}

struct PendingScan {
    outcome: ScanOutcome,
    meat_type: String,
    prefix: String,
}

impl StateMachine {
    pub fn new(
        mode: Mode,
        acq: AcquisitionConfig,
        shared: Arc<SharedHal>,
        bus: Arc<EventBus>,
        store: Arc<DataStore>,
        calibration: Arc<CalibrationTable>,
    ) -> Self {
        Self {
            mode,
            acq,
            shared,
            bus,
            store,
            classifier: Classifier::new(calibration),
            state: Arc::new(RwLock::new(MachineState::Locked)),
            baseline: Arc::new(RwLock::new(None)),
            worker: None,
            pending_scan: None,
            pending_training: None,
            last_sample_id: None,
        }
    }

    /// Observable state handle for the UI and for tests
    pub fn state_watch(&self) -> Arc<RwLock<MachineState>> {
        self.state.clone()
    }

    /// Observable baseline handle
    pub fn baseline_watch(&self) -> Arc<RwLock<Option<Arc<Baseline>>>> {
        self.baseline.clone()
    }

    /// Move the machine onto its control thread
    pub fn start(self, commands: Receiver<Command>) -> WorkerHandle {
        spawn_worker("state-machine", StopToken::new(), move |token| {
            self.run(commands, token)
        })
    }

    fn run(mut self, commands: Receiver<Command>, token: StopToken) {
        let (tx, internal) = unbounded::<Internal>();

        // A previous session's baseline gives the purge button targets
        // before the first init; a fresh init still replaces it.
        if let Some(prev) = self.store.load_current_baseline() {
            info!("reloaded baseline from {}", prev.timestamp);
            *self.baseline.write() = Some(Arc::new(prev));
        }
        self.set_state(MachineState::Locked);

        loop {
            if token.is_stopped() {
                break;
            }
            crossbeam::select! {
                recv(commands) -> cmd => match cmd {
                    Ok(cmd) => self.handle_command(cmd, &tx),
                    Err(_) => break,
                },
                recv(internal) -> msg => match msg {
                    Ok(msg) => self.handle_internal(msg, &tx),
                    Err(_) => break,
                },
                default(Duration::from_millis(100)) => {}
            }
        }

        if let Some(worker) = self.worker.take() {
            worker.stop_and_join();
        }
        // Leave the chamber in a known state on any exit path
        self.shared.emergency_shutdown();
    }

    fn set_state(&self, state: MachineState) {
        *self.state.write() = state;
        self.bus.publish_state(state);
    }

    fn current_state(&self) -> MachineState {
        *self.state.read()
    }

    fn ignore(&self, what: &str) {
        self.bus.publish_log(format!(
            "{what} ignored in state {}",
            self.current_state()
        ));
    }

    /// A worker is still on the hardware; starting another would only be
    /// refused by the interlock, so the command is dropped up front
    fn busy(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }

    // ---- command handling ----

    fn handle_command(&mut self, cmd: Command, tx: &Sender<Internal>) {
        match cmd {
            Command::Unlock => {
                if self.current_state() == MachineState::Locked {
                    self.set_state(MachineState::NeedsInit);
                } else {
                    self.ignore("unlock");
                }
            }
            Command::StartInit => {
                if self.current_state() == MachineState::NeedsInit {
                    self.spawn_init(tx);
                } else {
                    self.ignore("init");
                }
            }
            Command::CaptureRef => {
                if self.busy() {
                    self.ignore("reference capture (busy)");
                    return;
                }
                match self.current_state() {
                    MachineState::NeedsDarkRef => self.spawn_ref(RefKind::Dark, tx),
                    MachineState::NeedsWhiteRef => self.spawn_ref(RefKind::White, tx),
                    MachineState::NeedsUvRef => self.spawn_ref(RefKind::Uv, tx),
                    MachineState::NeedsIrRef => self.spawn_ref(RefKind::Ir, tx),
                    _ => self.ignore("reference capture"),
                }
            }
            Command::StartScan { meat_type, prefix } => {
                if self.current_state() == MachineState::ReadyToMeasure {
                    self.spawn_scan(meat_type, prefix, tx);
                } else {
                    self.ignore("scan");
                }
            }
            Command::StartContinuous { meta } => {
                if self.current_state() == MachineState::ReadyToMeasure {
                    self.spawn_continuous(meta, tx);
                } else {
                    self.ignore("continuous monitoring");
                }
            }
            Command::StartTraining { meta } => {
                if self.current_state() == MachineState::ReadyToMeasure {
                    self.spawn_training(meta, tx);
                } else {
                    self.ignore("training run");
                }
            }
            Command::StartPurge => {
                if self.current_state() == MachineState::ReadyToMeasure {
                    self.spawn_purge(MachineState::Purging, tx);
                } else {
                    self.ignore("purge");
                }
            }
            Command::Stop => {
                if let Some(worker) = &self.worker {
                    self.bus.publish_log(format!("stop requested for '{}'", worker.name()));
                    worker.stop();
                } else {
                    self.ignore("stop");
                }
            }
            Command::Confirm(confirmation) => self.handle_confirm(confirmation, tx),
            Command::Cancel => self.handle_cancel(tx),
        }
    }

    fn handle_confirm(&mut self, confirmation: Confirmation, tx: &Sender<Internal>) {
        match confirmation {
            Confirmation::ArchiveNew | Confirmation::ArchiveSame => {
                let Some(pending) = self.pending_scan.take() else {
                    self.ignore("archive confirmation");
                    return;
                };
                let sample_id = match confirmation {
                    Confirmation::ArchiveSame if self.last_sample_id.is_some() => {
                        self.last_sample_id.clone().unwrap()
                    }
                    _ => match self.store.next_dashboard_seq(&pending.prefix) {
                        Ok(seq) => format!("PS-{}-{seq:04}", pending.prefix),
                        Err(e) => {
                            self.bus
                                .publish_error(format!("persistence failure: {e}"));
                            self.spawn_purge(MachineState::Purging, tx);
                            return;
                        }
                    },
                };
                match engines::scan::archive(
                    &self.store,
                    &pending.outcome,
                    &sample_id,
                    &pending.meat_type,
                ) {
                    Ok(()) => {
                        self.bus
                            .publish_log(format!("Test data archived as {sample_id}"));
                        self.last_sample_id = Some(sample_id);
                    }
                    Err(e) => self.bus.publish_error(e.to_string()),
                }
                // The post-scan purge runs whether or not the save happened
                self.spawn_purge(MachineState::Purging, tx);
            }
            Confirmation::Discard => {
                if self.pending_scan.take().is_some() {
                    self.bus.publish_log("Scan discarded without archiving");
                    self.spawn_purge(MachineState::Purging, tx);
                } else {
                    self.ignore("discard");
                }
            }
            Confirmation::Label(label) => {
                let Some(row) = self.pending_training.take() else {
                    self.ignore("label confirmation");
                    return;
                };
                match engines::training::save_labelled(&self.store, row, label) {
                    Ok(()) => self
                        .bus
                        .publish_log(format!("Training row saved with label {label}")),
                    Err(e) => self.bus.publish_error(e.to_string()),
                }
                self.spawn_purge(MachineState::PostPurge, tx);
            }
        }
    }

    /// Dismissing a prompt skips the save but never the post-purge
    fn handle_cancel(&mut self, tx: &Sender<Internal>) {
        if self.pending_scan.take().is_some() {
            self.bus.publish_log("Archive prompt cancelled; scan not saved");
            self.spawn_purge(MachineState::Purging, tx);
        } else if self.pending_training.take().is_some() {
            self.bus
                .publish_log("Label prompt cancelled; training row not saved");
            self.spawn_purge(MachineState::PostPurge, tx);
        } else {
            self.ignore("cancel");
        }
    }

    // ---- worker spawning ----

    fn spawn_init(&mut self, tx: &Sender<Internal>) {
        self.set_state(MachineState::PrePurge);
        let shared = self.shared.clone();
        let bus = self.bus.clone();
        let acq = self.acq.clone();
        let tx = tx.clone();
        self.worker = Some(spawn_worker("init", StopToken::new(), move |token| {
            let result = engines::run_engine(&shared, "init", &bus, |hal| {
                bus.publish_log("Pre-purge: fan at 100%");
                hal.fan.set_duty(100)?;
                if !token.sleep(acq.pre_purge()) {
                    return Err(EngineError::Cancelled);
                }
                let _ = tx.send(Internal::Phase(MachineState::Stabilize));
                bus.publish_log("Stabilizing: fan off");
                hal.fan.set_duty(0)?;
                if !token.sleep(acq.stabilize()) {
                    return Err(EngineError::Cancelled);
                }
                let _ = tx.send(Internal::Phase(MachineState::InitializingGas));
                engines::baseline::capture(hal, &acq, &bus, &token, BASELINE_OPERATOR)
            });
            let _ = tx.send(Internal::BaselineDone(result));
        }));
    }

    fn spawn_ref(&mut self, kind: RefKind, tx: &Sender<Internal>) {
        let shared = self.shared.clone();
        let bus = self.bus.clone();
        let acq = self.acq.clone();
        let tx = tx.clone();
        self.worker = Some(spawn_worker("ref-capture", StopToken::new(), move |token| {
            let result = engines::run_engine(&shared, "ref-capture", &bus, |hal| {
                match kind {
                    RefKind::Dark => {
                        // Instrument zero: everything dark before and during
                        bus.publish_log("Capturing dark reference");
                        hal.all_bulbs_off();
                        hal.led.set(false)?;
                        token.sleep(acq.bulb_stab());
                        FusionReader::new(hal, &acq, &token)
                            .read_spectrum(false)
                            .map_err(EngineError::from)
                    }
                    RefKind::White => {
                        bus.publish_log("Capturing white reference");
                        hal.led.set(true)?;
                        hal.spectro.enable_bulb(LedSource::White)?;
                        token.sleep(acq.bulb_stab());
                        FusionReader::new(hal, &acq, &token)
                            .read_spectrum(true)
                            .map_err(EngineError::from)
                    }
                    RefKind::Uv => {
                        bus.publish_log("Capturing UV reference");
                        hal.spectro.enable_bulb(LedSource::Uv)?;
                        token.sleep(acq.bulb_stab());
                        FusionReader::new(hal, &acq, &token)
                            .read_spectrum(true)
                            .map_err(EngineError::from)
                    }
                    RefKind::Ir => {
                        bus.publish_log("Capturing IR reference");
                        hal.spectro.enable_bulb(LedSource::Ir)?;
                        token.sleep(acq.bulb_stab());
                        FusionReader::new(hal, &acq, &token)
                            .read_spectrum(true)
                            .map_err(EngineError::from)
                    }
                }
            });
            let _ = tx.send(Internal::RefDone(kind, result));
        }));
    }

    fn spawn_scan(&mut self, meat_type: String, prefix: String, tx: &Sender<Internal>) {
        self.set_state(MachineState::Measuring);
        let shared = self.shared.clone();
        let bus = self.bus.clone();
        let acq = self.acq.clone();
        let classifier = self.classifier.clone();
        let tx = tx.clone();
        self.pending_scan = None;
        self.worker = Some(spawn_worker("scan", StopToken::new(), move |token| {
            // The archive metadata rides back with the outcome
            let result = engines::scan::run(&shared, &acq, &bus, &token, &classifier)
                .map(|outcome| PendingScan {
                    outcome,
                    meat_type,
                    prefix,
                });
            let _ = tx.send(Internal::ScanDone(Box::new(result)));
        }));
    }

    fn spawn_continuous(&mut self, meta: SampleMeta, tx: &Sender<Internal>) {
        self.set_state(MachineState::Measuring);
        let shared = self.shared.clone();
        let bus = self.bus.clone();
        let acq = self.acq.clone();
        let store = self.store.clone();
        let tx = tx.clone();
        self.worker = Some(spawn_worker("continuous", StopToken::new(), move |token| {
            let result = engines::continuous::run(&shared, &acq, &bus, &token, &store, &meta);
            let _ = tx.send(Internal::ContinuousDone(result));
        }));
    }

    fn spawn_training(&mut self, meta: SampleMeta, tx: &Sender<Internal>) {
        self.set_state(MachineState::Measuring);
        let shared = self.shared.clone();
        let bus = self.bus.clone();
        let acq = self.acq.clone();
        let store = self.store.clone();
        let tx = tx.clone();
        self.worker = Some(spawn_worker("training", StopToken::new(), move |token| {
            let result =
                engines::training::run(&shared, &acq, &bus, &token, &store, &meta, OPERATOR);
            let _ = tx.send(Internal::TrainingDone(Box::new(result)));
        }));
    }

    fn spawn_purge(&mut self, via: MachineState, tx: &Sender<Internal>) {
        let Some(baseline) = self.baseline.read().clone() else {
            self.bus
                .publish_error(EngineError::NoBaseline.to_string());
            self.set_state(MachineState::ReadyToMeasure);
            return;
        };
        self.set_state(via);
        let shared = self.shared.clone();
        let bus = self.bus.clone();
        let acq = self.acq.clone();
        let tx = tx.clone();
        self.worker = Some(spawn_worker("purge", StopToken::new(), move |token| {
            let result = engines::purge::run(&shared, &acq, &bus, &token, baseline);
            let _ = tx.send(Internal::PurgeDone(result));
        }));
    }

    // ---- internal results ----

    fn handle_internal(&mut self, msg: Internal, tx: &Sender<Internal>) {
        match msg {
            Internal::Phase(state) => self.set_state(state),

            Internal::BaselineDone(Ok(baseline)) => {
                self.worker = None;
                if let Err(e) = self.store.save_baseline_snapshot(&baseline) {
                    self.bus.publish_error(format!("persistence failure: {e}"));
                }
                if let Err(e) = self.store.append_baseline_history(&baseline) {
                    self.bus.publish_error(format!("persistence failure: {e}"));
                }
                self.bus.publish_baseline(baseline.clone());
                *self.baseline.write() = Some(Arc::new(baseline));
                let next = if self.mode == Mode::Training {
                    MachineState::NeedsDarkRef
                } else {
                    MachineState::ReadyToMeasure
                };
                self.set_state(next);
            }
            Internal::BaselineDone(Err(e)) => self.engine_failed("init", e),

            Internal::RefDone(kind, Ok(spectrum)) => {
                self.worker = None;
                self.store_ref(kind, spectrum);
                let next = match (kind, self.mode) {
                    (RefKind::Dark, _) => MachineState::NeedsWhiteRef,
                    (RefKind::White, Mode::Training) => MachineState::NeedsUvRef,
                    (RefKind::White, _) => MachineState::ReadyToMeasure,
                    (RefKind::Uv, _) => MachineState::NeedsIrRef,
                    (RefKind::Ir, _) => MachineState::ReadyToMeasure,
                };
                self.set_state(next);
            }
            Internal::RefDone(_, Err(e)) => self.engine_failed("ref-capture", e),

            Internal::ScanDone(result) => {
                self.worker = None;
                match *result {
                    Ok(pending) => {
                        self.bus.publish_scan_result(
                            pending.outcome.verdict.clone(),
                            pending.outcome.shots.clone(),
                        );
                        self.pending_scan = Some(pending);
                        // Stay in Measuring until the archive prompt resolves
                    }
                    Err(e) => self.engine_failed("scan", e),
                }
            }

            Internal::ContinuousDone(Ok(())) => {
                self.worker = None;
                self.spawn_purge(MachineState::PostPurge, tx);
            }
            Internal::ContinuousDone(Err(e)) => self.engine_failed("continuous", e),

            Internal::TrainingDone(result) => {
                self.worker = None;
                match *result {
                    Ok(row) => {
                        self.bus.publish_training_result(row.clone());
                        self.pending_training = Some(row);
                        // Stay in Measuring until the label prompt resolves
                    }
                    Err(e) => self.engine_failed("training", e),
                }
            }

            Internal::PurgeDone(Ok(reason)) => {
                self.worker = None;
                if reason == PurgeReason::Timeout {
                    self.bus.publish_log(
                        "Purge timed out; chamber may still carry residual volatiles",
                    );
                }
                self.set_state(MachineState::ReadyToMeasure);
            }
            Internal::PurgeDone(Err(e)) => self.engine_failed("purge", e),
        }
    }

    /// Update the baseline's reference slot and refresh both snapshots
    fn store_ref(&mut self, kind: RefKind, spectrum: Spectrum) {
        let mut guard = self.baseline.write();
        let Some(current) = guard.as_ref() else {
            warn!("reference captured without a baseline; dropping it");
            return;
        };
        let mut updated = (**current).clone();
        match kind {
            RefKind::Dark => updated.dark_ref = Some(spectrum),
            RefKind::White => updated.white_ref = Some(spectrum),
            RefKind::Uv => updated.uv_ref = Some(spectrum),
            RefKind::Ir => updated.ir_ref = Some(spectrum),
        }
        if let Err(e) = self.store.save_refs_snapshot(&updated) {
            self.bus.publish_error(format!("persistence failure: {e}"));
        }
        if let Err(e) = self.store.save_baseline_snapshot(&updated) {
            self.bus.publish_error(format!("persistence failure: {e}"));
        }
        *guard = Some(Arc::new(updated));
    }

    /// Engine exit on the error path. Cancels return to the ready state;
    /// anything fatal goes back to `NeedsInit` (cleanup already ran in the
    /// engine epilogue).
    fn engine_failed(&mut self, engine: &str, err: EngineError) {
        self.worker = None;
        match err {
            EngineError::Cancelled => {
                self.bus.publish_log(format!("'{engine}' cancelled"));
                let recover = match self.current_state() {
                    MachineState::PrePurge
                    | MachineState::Stabilize
                    | MachineState::InitializingGas => MachineState::NeedsInit,
                    _ => MachineState::ReadyToMeasure,
                };
                self.set_state(recover);
            }
            EngineError::Preempted { .. } => {
                // The interlock already refused; keep the current state
                warn!("'{engine}' refused: {err}");
            }
            _ => {
                self.bus
                    .publish_log(format!("'{engine}' failed; re-initialization required"));
                self.set_state(MachineState::NeedsInit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::EngineEvent;
    use crate::hal::mock::MockHal;
    use crate::model::SPECTRAL_CHANNELS;
    use std::time::Instant;
    use tokio::sync::broadcast;

    fn calibration() -> Arc<CalibrationTable> {
        Arc::new(CalibrationTable {
            mean_spectral_fresh: [110.0; SPECTRAL_CHANNELS],
            mean_spectral_semi: [400.0; SPECTRAL_CHANNELS],
            fresh_ch2_min: 10.0,
            fresh_mq137_max: 2.0,
            fresh_mq3_max: 1.0,
            max_redness: 300.0,
            max_luma: 250.0,
            whc_base: 88.0,
        })
    }

    struct Rig {
        mock: MockHal,
        bus: Arc<EventBus>,
        store: Arc<DataStore>,
        state: Arc<RwLock<MachineState>>,
        cmd: Sender<Command>,
        // The machine must stop before the tempdir it writes to is removed
        _machine: WorkerHandle,
        _dir: tempfile::TempDir,
    }

    fn rig(mode: Mode) -> Rig {
        let mock = MockHal::new();
        let shared = Arc::new(SharedHal::new(mock.handles()));
        let bus = Arc::new(EventBus::new(65536));
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DataStore::new(dir.path()).unwrap());
        let machine = StateMachine::new(
            mode,
            AcquisitionConfig::instant(),
            shared,
            bus.clone(),
            store.clone(),
            calibration(),
        );
        let state = machine.state_watch();
        let (cmd_tx, cmd_rx) = unbounded();
        let handle = machine.start(cmd_rx);
        Rig {
            mock,
            bus,
            store,
            state,
            cmd: cmd_tx,
            _machine: handle,
            _dir: dir,
        }
    }

    fn wait_for_state(rig: &Rig, target: MachineState) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if *rig.state.read() == target {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {target}, still at {}",
                *rig.state.read()
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn wait_for_event(
        rx: &mut broadcast::Receiver<EngineEvent>,
        mut pred: impl FnMut(&EngineEvent) -> bool,
    ) -> EngineEvent {
        loop {
            match rx.blocking_recv() {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    }

    #[test]
    fn test_dashboard_session_unlock_to_archived_scan() {
        let rig = rig(Mode::Dashboard);
        let mut rx = rig.bus.subscribe();

        rig.cmd.send(Command::Unlock).unwrap();
        wait_for_state(&rig, MachineState::NeedsInit);

        rig.cmd.send(Command::StartInit).unwrap();
        wait_for_state(&rig, MachineState::ReadyToMeasure);
        assert!(rig.store.load_current_baseline().is_some());
        assert!(rig.store.baseline_path().exists());

        rig.cmd
            .send(Command::StartScan {
                meat_type: "Chicken Breast".into(),
                prefix: "CB".into(),
            })
            .unwrap();
        let event = wait_for_event(&mut rx, |e| matches!(e, EngineEvent::ScanResult { .. }));
        if let EngineEvent::ScanResult { verdict, shots } = event {
            assert_eq!(shots.len(), 5);
            assert!(verdict.enose_idx <= 100);
        }

        rig.cmd.send(Command::Confirm(Confirmation::ArchiveNew)).unwrap();
        wait_for_state(&rig, MachineState::ReadyToMeasure);

        let report = std::fs::read_to_string(rig.store.report_path()).unwrap();
        assert!(report.contains("PS-CB-0001"));
        let raw = std::fs::read_to_string(rig.store.raw_database_path()).unwrap();
        assert_eq!(raw.lines().count(), 6);
        assert!(rig.mock.all_quiet());
    }

    #[test]
    fn test_discarded_scan_still_purges_but_saves_nothing() {
        let rig = rig(Mode::Dashboard);
        let mut rx = rig.bus.subscribe();

        rig.cmd.send(Command::Unlock).unwrap();
        rig.cmd.send(Command::StartInit).unwrap();
        wait_for_state(&rig, MachineState::ReadyToMeasure);

        rig.cmd
            .send(Command::StartScan {
                meat_type: "Chicken Thigh".into(),
                prefix: "TH".into(),
            })
            .unwrap();
        wait_for_event(&mut rx, |e| matches!(e, EngineEvent::ScanResult { .. }));
        rig.cmd.send(Command::Confirm(Confirmation::Discard)).unwrap();
        // Post-scan purge runs even without a save
        wait_for_state(&rig, MachineState::ReadyToMeasure);

        assert!(!rig.store.report_path().exists());
        assert!(rig.mock.all_quiet());
    }

    #[test]
    fn test_training_session_with_reference_ladder() {
        let rig = rig(Mode::Training);
        let mut rx = rig.bus.subscribe();

        rig.cmd.send(Command::Unlock).unwrap();
        rig.cmd.send(Command::StartInit).unwrap();
        wait_for_state(&rig, MachineState::NeedsDarkRef);

        for expected in [
            MachineState::NeedsWhiteRef,
            MachineState::NeedsUvRef,
            MachineState::NeedsIrRef,
            MachineState::ReadyToMeasure,
        ] {
            rig.cmd.send(Command::CaptureRef).unwrap();
            wait_for_state(&rig, expected);
        }

        let baseline = rig.store.load_current_baseline().unwrap();
        assert!(baseline.dark_ref.is_some());
        assert!(baseline.white_ref.is_some());
        assert!(baseline.uv_ref.is_some());
        assert!(baseline.ir_ref.is_some());

        let meta = SampleMeta {
            sample_id: "BREAST_CHILLED_1".into(),
            meat_type: "BREAST".into(),
            storage: "CHILLED".into(),
            hour: 0,
            replica: 1,
        };
        rig.cmd.send(Command::StartTraining { meta }).unwrap();
        wait_for_event(&mut rx, |e| matches!(e, EngineEvent::TrainingResult(_)));
        rig.cmd
            .send(Command::Confirm(Confirmation::Label(
                crate::model::SpoilageLabel::Fresh,
            )))
            .unwrap();
        wait_for_state(&rig, MachineState::ReadyToMeasure);

        let canonical = std::fs::read_to_string(rig.store.training_path()).unwrap();
        assert_eq!(canonical.lines().count(), 2);
        let raw_block = std::fs::read_to_string(rig.store.raw_block_path()).unwrap();
        assert_eq!(raw_block.lines().count(), 1 + 45);
        assert!(rig.mock.all_quiet());
    }

    #[test]
    fn test_cancelled_label_prompt_skips_save_but_purges() {
        let rig = rig(Mode::Training);
        let mut rx = rig.bus.subscribe();

        rig.cmd.send(Command::Unlock).unwrap();
        rig.cmd.send(Command::StartInit).unwrap();
        wait_for_state(&rig, MachineState::NeedsDarkRef);
        for expected in [
            MachineState::NeedsWhiteRef,
            MachineState::NeedsUvRef,
            MachineState::NeedsIrRef,
            MachineState::ReadyToMeasure,
        ] {
            rig.cmd.send(Command::CaptureRef).unwrap();
            wait_for_state(&rig, expected);
        }

        let meta = SampleMeta {
            sample_id: "BREAST_FROZEN_1".into(),
            meat_type: "BREAST".into(),
            storage: "FROZEN".into(),
            hour: 0,
            replica: 1,
        };
        rig.cmd.send(Command::StartTraining { meta }).unwrap();
        wait_for_event(&mut rx, |e| matches!(e, EngineEvent::TrainingResult(_)));
        rig.cmd.send(Command::Cancel).unwrap();
        wait_for_state(&rig, MachineState::ReadyToMeasure);

        assert!(!rig.store.training_path().exists());
        assert!(rig.mock.all_quiet());
    }

    #[test]
    fn test_hal_fault_during_init_returns_to_needs_init() {
        let rig = rig(Mode::Dashboard);
        let mut rx = rig.bus.subscribe();
        rig.mock
            .fault_gas(crate::hal::HwError::not_initialized("ADS1115/MQ array"));

        rig.cmd.send(Command::Unlock).unwrap();
        wait_for_state(&rig, MachineState::NeedsInit);
        rig.cmd.send(Command::StartInit).unwrap();

        wait_for_event(&mut rx, |e| matches!(e, EngineEvent::Error(_)));
        wait_for_state(&rig, MachineState::NeedsInit);
        assert!(rig.mock.all_quiet());
    }

    #[test]
    fn test_continuous_stop_flows_into_post_purge() {
        let rig = rig(Mode::Continuous);
        let mut rx = rig.bus.subscribe();

        rig.cmd.send(Command::Unlock).unwrap();
        rig.cmd.send(Command::StartInit).unwrap();
        wait_for_state(&rig, MachineState::ReadyToMeasure);

        let meta = SampleMeta {
            sample_id: "BREAST_CHILLED_1".into(),
            meat_type: "BREAST".into(),
            storage: "CHILLED".into(),
            hour: 0,
            replica: 1,
        };
        rig.cmd.send(Command::StartContinuous { meta }).unwrap();
        // Let a few ticks land, then stop
        for _ in 0..3 {
            wait_for_event(&mut rx, |e| matches!(e, EngineEvent::RawSample(_)));
        }
        rig.cmd.send(Command::Stop).unwrap();
        wait_for_state(&rig, MachineState::ReadyToMeasure);

        let raw = std::fs::read_to_string(
            rig.store
                .continuous_path(crate::persist::ContinuousKind::Raw),
        )
        .unwrap();
        assert!(raw.lines().count() >= 4); // header + at least 3 ticks
        assert!(rig.mock.all_quiet());
    }

    #[test]
    fn test_commands_out_of_state_are_ignored() {
        let rig = rig(Mode::Dashboard);
        rig.cmd
            .send(Command::StartScan {
                meat_type: "Chicken Breast".into(),
                prefix: "CB".into(),
            })
            .unwrap();
        rig.cmd.send(Command::StartPurge).unwrap();
        rig.cmd.send(Command::Unlock).unwrap();
        wait_for_state(&rig, MachineState::NeedsInit);
        // Nothing ran, nothing touched the hardware beyond bring-up
        assert!(rig.mock.all_quiet());
    }
}

