// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Hardware abstraction layer
//!
//! Three sensor capabilities (`EnvSensor`, `GasArray`, `Spectrometer`) and
//! two actuators (`Fan`, `Illuminator`). Every call is synchronous and
//! blocking; the HAL is not reentrant and callers serialize through the
//! engine interlock. Construction probes the bus; a failed probe installs a
//! sentinel that returns `NotInitialized` on every read so the application
//! can come up and show the fault instead of dying on import.

mod sim;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "hardware"))]
mod aht20;
#[cfg(all(target_os = "linux", feature = "hardware"))]
mod ads1115;
#[cfg(all(target_os = "linux", feature = "hardware"))]
mod as7265x;
#[cfg(all(target_os = "linux", feature = "hardware"))]
mod gpio;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::HardwareConfig;
use crate::model::{EnvReading, GasReading, LedSource};

pub use sim::SimHal;

/// Hardware fault taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    /// The device never came up; retriable only by restarting the program
    #[error("{device} not initialized; check wiring and that I2C is enabled")]
    NotInitialized { device: &'static str },

    /// A single transient read failed; engines substitute a placeholder
    #[error("{device} read failed: {reason}")]
    ReadError { device: &'static str, reason: String },
}

impl HwError {
    pub fn not_initialized(device: &'static str) -> Self {
        HwError::NotInitialized { device }
    }

    pub fn read(device: &'static str, reason: impl Into<String>) -> Self {
        HwError::ReadError {
            device,
            reason: reason.into(),
        }
    }

    /// Transient faults are replaced with placeholders; the rest bubble
    pub fn is_transient(&self) -> bool {
        matches!(self, HwError::ReadError { .. })
    }
}

/// Ambient temperature/humidity capability (AHT20)
pub trait EnvSensor: Send {
    fn read(&mut self) -> Result<EnvReading, HwError>;
}

/// Four-channel electrochemical gas array capability (MQ sensors on ADS1115)
pub trait GasArray: Send {
    fn read(&mut self) -> Result<GasReading, HwError>;
}

/// 18-channel spectral triad capability (AS7265x)
///
/// `take_measurement` integrates on-device and must be followed by the
/// channel getters within the same logical shot.
pub trait Spectrometer: Send {
    fn enable_bulb(&mut self, bulb: LedSource) -> Result<(), HwError>;
    fn disable_bulb(&mut self, bulb: LedSource) -> Result<(), HwError>;
    fn take_measurement(&mut self) -> Result<(), HwError>;
    /// Calibrated float for channel 1-18 from the last `take_measurement`
    fn get_channel(&mut self, channel: usize) -> Result<f64, HwError>;
}

/// Chamber ventilation fan, PWM duty 0-100. Idempotent and cheap.
pub trait Fan: Send {
    fn set_duty(&mut self, duty: u8) -> Result<(), HwError>;
}

/// 5050 strip LED inside the chamber. Idempotent and cheap.
pub trait Illuminator: Send {
    fn set(&mut self, on: bool) -> Result<(), HwError>;
}

/// Sentinel installed when the AHT20 probe fails
struct UnavailableEnv;

impl EnvSensor for UnavailableEnv {
    fn read(&mut self) -> Result<EnvReading, HwError> {
        Err(HwError::not_initialized("AHT20"))
    }
}

/// Sentinel installed when the ADS1115 probe fails
struct UnavailableGas;

impl GasArray for UnavailableGas {
    fn read(&mut self) -> Result<GasReading, HwError> {
        Err(HwError::not_initialized("ADS1115/MQ array"))
    }
}

/// Sentinel installed when the AS7265x probe fails
struct UnavailableSpectro;

impl Spectrometer for UnavailableSpectro {
    fn enable_bulb(&mut self, _bulb: LedSource) -> Result<(), HwError> {
        Err(HwError::not_initialized("AS7265x"))
    }
    fn disable_bulb(&mut self, _bulb: LedSource) -> Result<(), HwError> {
        Err(HwError::not_initialized("AS7265x"))
    }
    fn take_measurement(&mut self) -> Result<(), HwError> {
        Err(HwError::not_initialized("AS7265x"))
    }
    fn get_channel(&mut self, _channel: usize) -> Result<f64, HwError> {
        Err(HwError::not_initialized("AS7265x"))
    }
}

/// Sentinel installed when the GPIO chip cannot be opened
struct UnavailableFan;

impl Fan for UnavailableFan {
    fn set_duty(&mut self, _duty: u8) -> Result<(), HwError> {
        Err(HwError::not_initialized("fan GPIO"))
    }
}

struct UnavailableLed;

impl Illuminator for UnavailableLed {
    fn set(&mut self, _on: bool) -> Result<(), HwError> {
        Err(HwError::not_initialized("strip-LED GPIO"))
    }
}

/// The five hardware handles, owned by the top-level application and lent
/// to exactly one engine at a time.
pub struct HalHandles {
    pub env: Box<dyn EnvSensor>,
    pub gas: Box<dyn GasArray>,
    pub spectro: Box<dyn Spectrometer>,
    pub fan: Box<dyn Fan>,
    pub led: Box<dyn Illuminator>,
}

impl HalHandles {
    /// Simulated sensors for `--sim` runs and development machines
    pub fn simulated() -> Self {
        info!("HAL running against simulated sensors");
        SimHal::handles()
    }

    /// Probe the real bus. Each failed probe logs and installs the matching
    /// sentinel instead of failing the whole bring-up.
    #[cfg(all(target_os = "linux", feature = "hardware"))]
    pub fn probe(hw: &HardwareConfig) -> Self {
        let env: Box<dyn EnvSensor> = match aht20::Aht20::probe(hw) {
            Ok(dev) => {
                info!("AHT20 initialized");
                Box::new(dev)
            }
            Err(e) => {
                tracing::error!("AHT20 probe failed: {e}; readings will raise NotInitialized");
                Box::new(UnavailableEnv)
            }
        };
        let gas: Box<dyn GasArray> = match ads1115::Ads1115::probe(hw) {
            Ok(dev) => {
                info!("ADS1115 initialized (A0=MQ-137 A1=MQ-135 A2=MQ-3 A3=MQ-4)");
                Box::new(dev)
            }
            Err(e) => {
                tracing::error!("ADS1115 probe failed: {e}; readings will raise NotInitialized");
                Box::new(UnavailableGas)
            }
        };
        let spectro: Box<dyn Spectrometer> = match as7265x::As7265x::probe(hw) {
            Ok(dev) => {
                info!("AS7265x spectral triad initialized");
                Box::new(dev)
            }
            Err(e) => {
                tracing::error!("AS7265x probe failed: {e}; readings will raise NotInitialized");
                Box::new(UnavailableSpectro)
            }
        };
        let (fan, led): (Box<dyn Fan>, Box<dyn Illuminator>) = match gpio::GpioBank::probe(hw) {
            Ok((fan, led)) => (Box::new(fan), Box::new(led)),
            Err(e) => {
                tracing::error!("GPIO probe failed: {e}; actuators will raise NotInitialized");
                (Box::new(UnavailableFan), Box::new(UnavailableLed))
            }
        };
        Self {
            env,
            gas,
            spectro,
            fan,
            led,
        }
    }

    /// Non-Linux / no-hardware builds only ever see simulated handles
    #[cfg(not(all(target_os = "linux", feature = "hardware")))]
    pub fn probe(_hw: &HardwareConfig) -> Self {
        warn!("built without the `hardware` feature; falling back to simulated sensors");
        Self::simulated()
    }

    /// Disable the three spectrometer bulbs, swallowing errors
    pub fn all_bulbs_off(&mut self) {
        for bulb in [LedSource::White, LedSource::Uv, LedSource::Ir] {
            if let Err(e) = self.spectro.disable_bulb(bulb) {
                warn!("failed to disable {bulb} bulb during cleanup: {e}");
            }
        }
    }

    /// Universal cleanup: every bulb off, strip LED off, fan duty 0.
    /// Runs on every engine exit path and at process shutdown; errors are
    /// swallowed so cleanup always reaches the last actuator.
    pub fn shutdown(&mut self) {
        self.all_bulbs_off();
        if let Err(e) = self.led.set(false) {
            warn!("failed to disable strip LED during cleanup: {e}");
        }
        if let Err(e) = self.fan.set_duty(0) {
            warn!("failed to stop fan during cleanup: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_raise_not_initialized() {
        let mut env = UnavailableEnv;
        assert_eq!(
            env.read().unwrap_err(),
            HwError::not_initialized("AHT20")
        );
        let mut spectro = UnavailableSpectro;
        assert!(matches!(
            spectro.take_measurement().unwrap_err(),
            HwError::NotInitialized { .. }
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(HwError::read("AHT20", "i2c timeout").is_transient());
        assert!(!HwError::not_initialized("AHT20").is_transient());
    }
}
