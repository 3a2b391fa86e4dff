// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! PoultriScan - Broiler Meat Quality Appraisal Core
//!
//! The acquisition-and-verdict pipeline behind the PoultriScan instrument:
//! - Blocking HAL for an AHT20, a 4x MQ gas array on an ADS1115, and an
//!   AS7265x 18-channel spectral triad with switchable white/UV/IR bulbs
//! - Three-pass spectral fusion reader with stabilization protocol
//! - Nearest-centroid spectral classifier with gas safety limits
//! - Acquisition state machine (pre-purge, baseline, references, scan)
//! - Single-sample scan, continuous monitoring and training engines
//! - Dynamic fan purge with convergence criteria
//! - Header-aware CSV appenders for every persisted schema
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  Acquisition State Machine                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────┐  ┌────────────┐  ┌──────────┐  ┌─────────────┐   │
//! │  │ Fusion │→ │  Engines   │→ │Classifier│→ │ Persistence │   │
//! │  │ Reader │  │ scan/cont/ │  │          │  │  Appenders  │   │
//! │  └────────┘  │ train/purge│  └──────────┘  └─────────────┘   │
//! │      ↓       └────────────┘       ↓              ↓           │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │                      Event Bus                       │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! │      ↓                                                       │
//! │  ┌────────┐  ┌─────────────┐  ┌───────────────────────┐      │
//! │  │  HAL   │  │ Calibration │  │ Config / Stop tokens  │      │
//! │  └────────┘  └─────────────┘  └───────────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![allow(dead_code)]

pub mod core;
pub mod hal;
pub mod model;
pub mod fusion;
pub mod calibration;
pub mod classify;
pub mod engines;
pub mod persist;
pub mod config;

// Re-exports for convenience
pub use config::Config;
pub use core::{Command, EngineEvent, EventBus, MachineState, StateMachine, StopToken};
pub use hal::{HalHandles, HwError};
pub use model::{Baseline, Frame, SampleIdentity};
pub use calibration::CalibrationTable;
pub use classify::{Classifier, Verdict};

/// PoultriScan core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// PoultriScan name
pub const NAME: &str = "PoultriScan";
