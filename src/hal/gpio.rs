// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Fan PWM and strip-LED GPIO.
//!
//! Fan: software PWM at 100 Hz on BCM 27, duty 0-100.
//! Strip LED: plain digital output on BCM 17.

use rppal::gpio::{Gpio, OutputPin};

use super::{Fan, HwError, Illuminator};
use crate::config::HardwareConfig;

const DEVICE_FAN: &str = "fan GPIO";
const DEVICE_LED: &str = "strip-LED GPIO";

pub struct GpioBank;

impl GpioBank {
    /// Claim both pins; a failure on either leaves the other unclaimed
    pub fn probe(hw: &HardwareConfig) -> Result<(FanPwm, StripLed), HwError> {
        let gpio =
            Gpio::new().map_err(|e| HwError::read(DEVICE_FAN, format!("opening gpiochip: {e}")))?;
        let fan_pin = gpio
            .get(hw.fan_pin)
            .map_err(|e| HwError::read(DEVICE_FAN, format!("claiming BCM {}: {e}", hw.fan_pin)))?
            .into_output_low();
        let led_pin = gpio
            .get(hw.led_pin)
            .map_err(|e| HwError::read(DEVICE_LED, format!("claiming BCM {}: {e}", hw.led_pin)))?
            .into_output_low();

        Ok((
            FanPwm {
                pin: fan_pin,
                freq_hz: hw.pwm_freq_hz,
            },
            StripLed { pin: led_pin },
        ))
    }
}

pub struct FanPwm {
    pin: OutputPin,
    freq_hz: f64,
}

impl Fan for FanPwm {
    fn set_duty(&mut self, duty: u8) -> Result<(), HwError> {
        let duty = duty.min(100);
        if duty == 0 {
            self.pin
                .clear_pwm()
                .map_err(|e| HwError::read(DEVICE_FAN, format!("stopping PWM: {e}")))?;
            self.pin.set_low();
        } else {
            self.pin
                .set_pwm_frequency(self.freq_hz, f64::from(duty) / 100.0)
                .map_err(|e| HwError::read(DEVICE_FAN, format!("setting PWM: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for FanPwm {
    fn drop(&mut self) {
        let _ = self.pin.clear_pwm();
        self.pin.set_low();
    }
}

pub struct StripLed {
    pin: OutputPin,
}

impl Illuminator for StripLed {
    fn set(&mut self, on: bool) -> Result<(), HwError> {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }
}

impl Drop for StripLed {
    fn drop(&mut self) {
        self.pin.set_low();
    }
}
