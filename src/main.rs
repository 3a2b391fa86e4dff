// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! PoultriScan - headless session driver
//!
//! Wires configuration, calibration, HAL and the acquisition state machine
//! together and drives one session from the command line: a dashboard scan,
//! a continuous monitoring run, a training acquisition or a manual purge.
//! The graphical operator console lives in a separate front-end crate and
//! talks to the same command/event channels.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel::{unbounded, Sender};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use poultriscan::core::{Command, Confirmation, EngineEvent, EventBus, MachineState, Mode, StateMachine};
use poultriscan::engines::SharedHal;
use poultriscan::hal::HalHandles;
use poultriscan::model::{SampleMeta, SpoilageLabel};
use poultriscan::persist::DataStore;
use poultriscan::{CalibrationTable, Config, VERSION};

/// PoultriScan - non-invasive broiler meat quality appraisal
#[derive(Parser, Debug)]
#[command(name = "poultriscan")]
#[command(author = "PoultriScan Project")]
#[command(version = VERSION)]
#[command(about = "Sensor-fusion meat quality appraisal core")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data output directory (overrides the configured one)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Calibration CSV path (overrides the configured one)
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Run against simulated sensors instead of the I2C bus
    #[arg(long)]
    sim: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Initialize the chamber and run one dashboard scan
    Scan {
        /// Meat type recorded on the report row
        #[arg(long, default_value = "Chicken Breast")]
        meat_type: String,

        /// Sample ID type prefix (PS-<PREFIX>-NNNN)
        #[arg(long, default_value = "CB")]
        prefix: String,

        /// Discard the result instead of archiving it
        #[arg(long)]
        no_archive: bool,
    },

    /// Continuous monitoring with tumbling-window averaging
    Monitor {
        #[arg(long, default_value = "BREAST")]
        meat: String,

        #[arg(long, default_value = "CHILLED")]
        storage: String,

        /// Hours since slaughter for the sample annotation
        #[arg(long, default_value_t = 0)]
        hour: u32,

        /// How long to monitor before stopping
        #[arg(long, default_value_t = 300)]
        duration_secs: u64,
    },

    /// Three-block training acquisition with spectral references
    Train {
        #[arg(long, default_value = "BREAST")]
        meat: String,

        #[arg(long, default_value = "CHILLED")]
        storage: String,

        #[arg(long, default_value_t = 0)]
        hour: u32,

        /// Ground-truth label (Fresh, Semi-Fresh, Semi-Degraded, Spoiled);
        /// omitted = collect without saving the canonical row
        #[arg(long)]
        label: Option<String>,
    },

    /// Run the dynamic purge against the stored baseline
    Purge,
}

fn parse_label(s: &str) -> Result<SpoilageLabel> {
    Ok(match s {
        "Fresh" => SpoilageLabel::Fresh,
        "Semi-Fresh" => SpoilageLabel::SemiFresh,
        "Semi-Degraded" => SpoilageLabel::SemiDegraded,
        "Spoiled" => SpoilageLabel::Spoiled,
        other => bail!("unknown label '{other}' (expected Fresh, Semi-Fresh, Semi-Degraded or Spoiled)"),
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("PoultriScan v{VERSION} - meat quality appraisal core");

    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;
    if args.sim {
        config.sim_mode = true;
    }
    if let Some(data_dir) = args.data_dir {
        config.paths.data_dir = data_dir;
    }
    if let Some(calibration) = args.calibration {
        config.paths.calibration_file = calibration;
    }

    // Missing or malformed calibration is fatal; there is no grading
    // without the compiled training data.
    let calibration = CalibrationTable::load(&config.paths.calibration_file)
        .context("startup calibration load failed")?;

    let store = Arc::new(DataStore::new(&config.paths.data_dir)?);
    let handles = if config.sim_mode {
        HalHandles::simulated()
    } else {
        HalHandles::probe(&config.hardware)
    };
    let shared = Arc::new(SharedHal::new(handles));
    let bus = Arc::new(EventBus::new(4096));

    let mode = match &args.command {
        Cmd::Train { .. } => Mode::Training,
        Cmd::Monitor { .. } => Mode::Continuous,
        _ => Mode::Dashboard,
    };
    let machine = StateMachine::new(
        mode,
        config.acquisition.clone(),
        shared.clone(),
        bus.clone(),
        store.clone(),
        Arc::new(calibration),
    );
    let state = machine.state_watch();
    let (cmd_tx, cmd_rx) = unbounded();
    let machine_handle = machine.start(cmd_rx);

    let mut events = bus.subscribe();
    let session = Session {
        cmd: cmd_tx,
        state,
    };

    let result = session.drive(&mut events, args.command, &store, mode);

    drop(session); // closes the command channel
    machine_handle.stop_and_join();
    shared.emergency_shutdown();
    result
}

struct Session {
    cmd: Sender<Command>,
    state: Arc<RwLock<MachineState>>,
}

impl Session {
    fn drive(
        &self,
        events: &mut broadcast::Receiver<EngineEvent>,
        command: Cmd,
        store: &DataStore,
        mode: Mode,
    ) -> Result<()> {
        self.cmd.send(Command::Unlock)?;
        self.cmd.send(Command::StartInit)?;
        self.wait_state(events, MachineState::ReadyToMeasure, || {
            // Training mode parks on each reference state until told to go
            if mode == Mode::Training {
                let s = *self.state.read();
                if matches!(
                    s,
                    MachineState::NeedsDarkRef
                        | MachineState::NeedsWhiteRef
                        | MachineState::NeedsUvRef
                        | MachineState::NeedsIrRef
                ) {
                    let _ = self.cmd.send(Command::CaptureRef);
                }
            }
        })?;
        info!("chamber initialized and ready");

        match command {
            Cmd::Scan {
                meat_type,
                prefix,
                no_archive,
            } => {
                self.cmd.send(Command::StartScan { meat_type, prefix })?;
                let event = self.wait_event(events, |e| {
                    matches!(e, EngineEvent::ScanResult { .. })
                })?;
                if let EngineEvent::ScanResult { verdict, .. } = event {
                    info!(
                        "verdict: {} ({}) score {} | eNose {} WHC {} FAC {} Myo {}",
                        verdict.category,
                        verdict.grade,
                        verdict.score,
                        verdict.enose_idx,
                        verdict.whc_idx,
                        verdict.fac_idx,
                        verdict.myo_idx
                    );
                }
                self.cmd.send(Command::Confirm(if no_archive {
                    Confirmation::Discard
                } else {
                    Confirmation::ArchiveNew
                }))?;
                self.wait_state(events, MachineState::ReadyToMeasure, || {})?;
            }

            Cmd::Monitor {
                meat,
                storage,
                hour,
                duration_secs,
            } => {
                let meta = sample_meta(store, &meat, &storage, hour)?;
                info!("monitoring as {}", meta.sample_id);
                self.cmd.send(Command::StartContinuous { meta })?;
                let deadline = Instant::now() + Duration::from_secs(duration_secs);
                self.pump_until(events, || Instant::now() >= deadline)?;
                self.cmd.send(Command::Stop)?;
                self.wait_state(events, MachineState::ReadyToMeasure, || {})?;
            }

            Cmd::Train {
                meat,
                storage,
                hour,
                label,
            } => {
                let label = label.as_deref().map(parse_label).transpose()?;
                let meta = sample_meta(store, &meat, &storage, hour)?;
                info!("training sample {}", meta.sample_id);
                self.cmd.send(Command::StartTraining { meta })?;
                self.wait_event(events, |e| matches!(e, EngineEvent::TrainingResult(_)))?;
                match label {
                    Some(label) => self.cmd.send(Command::Confirm(Confirmation::Label(label)))?,
                    None => self.cmd.send(Command::Cancel)?,
                }
                self.wait_state(events, MachineState::ReadyToMeasure, || {})?;
            }

            Cmd::Purge => {
                self.cmd.send(Command::StartPurge)?;
                self.wait_state(events, MachineState::ReadyToMeasure, || {})?;
            }
        }

        info!("session complete");
        Ok(())
    }

    /// Drain events (logging them) until the machine reaches `target`
    fn wait_state(
        &self,
        events: &mut broadcast::Receiver<EngineEvent>,
        target: MachineState,
        mut on_state: impl FnMut(),
    ) -> Result<()> {
        loop {
            match events.blocking_recv() {
                Ok(event) => {
                    print_event(&event);
                    if let EngineEvent::StateChange(state) = event {
                        if state == target {
                            return Ok(());
                        }
                        on_state();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event stream lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => bail!("event bus closed"),
            }
        }
    }

    fn wait_event(
        &self,
        events: &mut broadcast::Receiver<EngineEvent>,
        pred: impl Fn(&EngineEvent) -> bool,
    ) -> Result<EngineEvent> {
        loop {
            match events.blocking_recv() {
                Ok(event) => {
                    print_event(&event);
                    if pred(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event stream lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => bail!("event bus closed"),
            }
        }
    }

    /// Print events until the predicate trips (checked between events via
    /// a short receive timeout emulated with try_recv + sleep)
    fn pump_until(
        &self,
        events: &mut broadcast::Receiver<EngineEvent>,
        mut done: impl FnMut() -> bool,
    ) -> Result<()> {
        loop {
            if done() {
                return Ok(());
            }
            match events.try_recv() {
                Ok(event) => print_event(&event),
                Err(broadcast::error::TryRecvError::Empty) => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("event stream lagged by {n} events");
                }
                Err(broadcast::error::TryRecvError::Closed) => bail!("event bus closed"),
            }
        }
    }
}

/// Allocate the next replica for a meat/storage pair just-in-time
fn sample_meta(store: &DataStore, meat: &str, storage: &str, hour: u32) -> Result<SampleMeta> {
    let replica = store.next_training_replica(meat, storage)?;
    Ok(SampleMeta {
        sample_id: format!("{meat}_{storage}_{replica}"),
        meat_type: meat.to_string(),
        storage: storage.to_string(),
        hour,
        replica,
    })
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Log(line) => info!("{line}"),
        EngineEvent::Progress(p) => info!("progress: {p}%"),
        EngineEvent::StateChange(state) => info!("state: {state}"),
        EngineEvent::Error(message) => warn!("error: {message}"),
        EngineEvent::RawSample(frame) => info!(
            "raw sample: {:.1}C {:.1}% mq137={:.3}V",
            frame.env.temp_c, frame.env.humidity_pct, frame.gas.mq137
        ),
        EngineEvent::AveragedSample(frame) => info!(
            "window average: {:.1}C {:.1}% mq137={:.3}V",
            frame.env.temp_c, frame.env.humidity_pct, frame.gas.mq137
        ),
        EngineEvent::BaselineReady(baseline) => info!(
            "baseline: mq137={:.3}V mq135={:.3}V mq4={:.3}V mq3={:.3}V",
            baseline.mq137, baseline.mq135, baseline.mq4, baseline.mq3
        ),
        EngineEvent::TrainingResult(_) => info!("training acquisition complete"),
        EngineEvent::ScanResult { .. } => {}
        EngineEvent::Finished => {}
    }
}
