// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Scripted, recording HAL double for the property tests
//!
//! Unlike the simulator, the mock is deterministic: readings come from
//! operator-supplied scripts, any device can be faulted, and every actuator
//! transition lands in an ordered journal so tests can assert the cleanup
//! invariant (bulbs off, LED off, fan 0) on every exit path.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{EnvSensor, Fan, GasArray, HalHandles, HwError, Illuminator, Spectrometer};
use crate::model::{EnvReading, GasReading, LedSource, SPECTRAL_CHANNELS};

/// One observed HAL interaction
#[derive(Debug, Clone, PartialEq)]
pub enum MockOp {
    BulbOn(LedSource),
    BulbOff(LedSource),
    Led(bool),
    Fan(u8),
    ReadEnv,
    ReadGas,
    Measure,
}

#[derive(Default)]
struct MockInner {
    journal: Vec<MockOp>,
    calls: usize,

    bulbs: [bool; 3],
    led_on: bool,
    fan_duty: u8,

    env: Option<EnvReading>,
    env_fault: Option<HwError>,

    gas_script: VecDeque<GasReading>,
    gas_last: Option<GasReading>,
    gas_fault: Option<HwError>,
    gas_fail_after: Option<usize>,
    gas_reads: usize,

    spectrum: [f64; SPECTRAL_CHANNELS],
    spectro_fault: Option<HwError>,
}

fn bulb_index(bulb: LedSource) -> usize {
    match bulb {
        LedSource::White => 0,
        LedSource::Uv => 1,
        LedSource::Ir => 2,
    }
}

/// Shared control handle; the device objects handed to the engines all
/// point back at the same inner state.
#[derive(Clone)]
pub struct MockHal {
    inner: Arc<Mutex<MockInner>>,
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHal {
    pub fn new() -> Self {
        let mut inner = MockInner::default();
        inner.env = Some(EnvReading {
            temp_c: 22.0,
            humidity_pct: 55.0,
        });
        inner.gas_last = Some(GasReading {
            mq137: 1.0,
            mq135: 0.2,
            mq4: 0.3,
            mq3: 0.5,
        });
        inner.spectrum = [100.0; SPECTRAL_CHANNELS];
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Build the five handles engines consume
    pub fn handles(&self) -> HalHandles {
        HalHandles {
            env: Box::new(MockDevice {
                inner: self.inner.clone(),
            }),
            gas: Box::new(MockDevice {
                inner: self.inner.clone(),
            }),
            spectro: Box::new(MockDevice {
                inner: self.inner.clone(),
            }),
            fan: Box::new(MockDevice {
                inner: self.inner.clone(),
            }),
            led: Box::new(MockDevice {
                inner: self.inner.clone(),
            }),
        }
    }

    // ---- scripting ----

    pub fn set_env(&self, env: EnvReading) {
        self.inner.lock().env = Some(env);
    }

    pub fn fault_env(&self, err: HwError) {
        self.inner.lock().env_fault = Some(err);
    }

    /// Constant gas reading returned once the script runs dry
    pub fn set_gas(&self, gas: GasReading) {
        let mut inner = self.inner.lock();
        inner.gas_script.clear();
        inner.gas_last = Some(gas);
    }

    /// Queue a sequence of gas readings; the final one repeats forever
    pub fn script_gas(&self, readings: impl IntoIterator<Item = GasReading>) {
        let mut inner = self.inner.lock();
        inner.gas_script = readings.into_iter().collect();
    }

    pub fn fault_gas(&self, err: HwError) {
        self.inner.lock().gas_fault = Some(err);
    }

    /// Let `n` reads succeed, then fault every later one
    pub fn fault_gas_after(&self, n: usize, err: HwError) {
        let mut inner = self.inner.lock();
        inner.gas_fail_after = Some(n);
        inner.gas_fault = Some(err);
    }

    pub fn set_spectrum(&self, channels: [f64; SPECTRAL_CHANNELS]) {
        self.inner.lock().spectrum = channels;
    }

    pub fn fault_spectro(&self, err: HwError) {
        self.inner.lock().spectro_fault = Some(err);
    }

    // ---- inspection ----

    pub fn fan_duty(&self) -> u8 {
        self.inner.lock().fan_duty
    }

    pub fn led_on(&self) -> bool {
        self.inner.lock().led_on
    }

    pub fn bulbs_lit(&self) -> Vec<LedSource> {
        let inner = self.inner.lock();
        [LedSource::White, LedSource::Uv, LedSource::Ir]
            .into_iter()
            .filter(|&b| inner.bulbs[bulb_index(b)])
            .collect()
    }

    /// The cleanup invariant: all bulbs off, strip LED off, fan stopped
    pub fn all_quiet(&self) -> bool {
        let inner = self.inner.lock();
        !inner.bulbs.iter().any(|&b| b) && !inner.led_on && inner.fan_duty == 0
    }

    /// Total HAL interactions observed (reads and actuations)
    pub fn call_count(&self) -> usize {
        self.inner.lock().calls
    }

    pub fn journal(&self) -> Vec<MockOp> {
        self.inner.lock().journal.clone()
    }
}

/// One struct implements every capability; the journal keeps them apart
struct MockDevice {
    inner: Arc<Mutex<MockInner>>,
}

impl EnvSensor for MockDevice {
    fn read(&mut self) -> Result<EnvReading, HwError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        inner.journal.push(MockOp::ReadEnv);
        if let Some(err) = &inner.env_fault {
            return Err(err.clone());
        }
        Ok(inner.env.unwrap_or(EnvReading::nan()))
    }
}

impl GasArray for MockDevice {
    fn read(&mut self) -> Result<GasReading, HwError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        inner.journal.push(MockOp::ReadGas);
        inner.gas_reads += 1;
        let fault_active = match inner.gas_fail_after {
            Some(n) => inner.gas_reads > n,
            None => true,
        };
        if fault_active {
            if let Some(err) = &inner.gas_fault {
                return Err(err.clone());
            }
        }
        if let Some(next) = inner.gas_script.pop_front() {
            if inner.gas_script.is_empty() {
                inner.gas_last = Some(next);
            }
            return Ok(next);
        }
        Ok(inner.gas_last.unwrap_or(GasReading::nan()))
    }
}

impl Spectrometer for MockDevice {
    fn enable_bulb(&mut self, bulb: LedSource) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        inner.journal.push(MockOp::BulbOn(bulb));
        inner.bulbs[bulb_index(bulb)] = true;
        Ok(())
    }

    fn disable_bulb(&mut self, bulb: LedSource) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        inner.journal.push(MockOp::BulbOff(bulb));
        inner.bulbs[bulb_index(bulb)] = false;
        Ok(())
    }

    fn take_measurement(&mut self) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        inner.journal.push(MockOp::Measure);
        if let Some(err) = &inner.spectro_fault {
            return Err(err.clone());
        }
        Ok(())
    }

    fn get_channel(&mut self, channel: usize) -> Result<f64, HwError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        if let Some(err) = &inner.spectro_fault {
            return Err(err.clone());
        }
        if !(1..=SPECTRAL_CHANNELS).contains(&channel) {
            return Err(HwError::read("AS7265x", format!("channel {channel} out of range")));
        }
        Ok(inner.spectrum[channel - 1])
    }
}

impl Fan for MockDevice {
    fn set_duty(&mut self, duty: u8) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        inner.journal.push(MockOp::Fan(duty));
        inner.fan_duty = duty;
        Ok(())
    }
}

impl Illuminator for MockDevice {
    fn set(&mut self, on: bool) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        inner.journal.push(MockOp::Led(on));
        inner.led_on = on;
        Ok(())
    }
}
