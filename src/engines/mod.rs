// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Acquisition engines
//!
//! Each engine is a blocking function run on its own worker thread. At most
//! one engine owns the hardware at any time: every run starts by claiming
//! the interlock, and a second claimant is refused with a pre-empt error
//! before it touches a single HAL handle. Every exit path, success
//! included, funnels through the same epilogue: universal HAL cleanup, an
//! `Error` event on fault or cancel, then exactly one `Finished`.

pub mod baseline;
pub mod continuous;
pub mod purge;
pub mod scan;
pub mod training;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::core::EventBus;
use crate::hal::{HalHandles, HwError};

/// Engine-level fault taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Hw(#[from] HwError),

    /// Operator stop; not a fault, but takes the same cleanup path
    #[error("operation cancelled by operator")]
    Cancelled,

    /// Another engine holds the hardware
    #[error("hardware busy: '{owner}' is running, '{requested}' refused")]
    Preempted {
        owner: &'static str,
        requested: &'static str,
    },

    /// An engine that needs purge targets started before any baseline
    #[error("no baseline captured; run initialization first")]
    NoBaseline,

    /// CSV/JSON write failure; engines report it and keep their state
    #[error("persistence failure: {0}")]
    Persist(String),
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

/// The HAL handles plus the single-owner interlock in front of them
pub struct SharedHal {
    owner: Mutex<Option<&'static str>>,
    handles: Mutex<HalHandles>,
}

impl SharedHal {
    pub fn new(handles: HalHandles) -> Self {
        Self {
            owner: Mutex::new(None),
            handles: Mutex::new(handles),
        }
    }

    /// Claim exclusive hardware ownership for one engine run. Fails
    /// immediately, without blocking or touching the HAL, if another
    /// engine holds the claim.
    pub fn claim(&self, engine: &'static str) -> Result<HalClaim<'_>, EngineError> {
        {
            let mut owner = self.owner.lock();
            if let Some(current) = *owner {
                return Err(EngineError::Preempted {
                    owner: current,
                    requested: engine,
                });
            }
            *owner = Some(engine);
        }
        Ok(HalClaim {
            shared: self,
            guard: self.handles.lock(),
        })
    }

    /// Top-level shutdown hook; used at process exit, outside any engine
    pub fn emergency_shutdown(&self) {
        self.handles.lock().shutdown();
    }
}

/// Exclusive access to the handles for the lifetime of one engine run
pub struct HalClaim<'a> {
    shared: &'a SharedHal,
    guard: MutexGuard<'a, HalHandles>,
}

impl HalClaim<'_> {
    pub fn hal(&mut self) -> &mut HalHandles {
        &mut self.guard
    }
}

impl Drop for HalClaim<'_> {
    fn drop(&mut self) {
        *self.shared.owner.lock() = None;
    }
}

/// Run one engine body under the interlock with the universal epilogue:
/// bulbs off, strip LED off, fan stopped, `Error` on fault, one `Finished`.
pub(crate) fn run_engine<T>(
    shared: &SharedHal,
    engine: &'static str,
    bus: &EventBus,
    body: impl FnOnce(&mut HalHandles) -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    let mut claim = match shared.claim(engine) {
        Ok(claim) => claim,
        Err(e) => {
            bus.publish_error(e.to_string());
            bus.publish_finished();
            return Err(e);
        }
    };

    let result = body(claim.hal());
    claim.hal().shutdown();

    if let Err(e) = &result {
        bus.publish_error(e.to_string());
    }
    bus.publish_finished();
    result
}
