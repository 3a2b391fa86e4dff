// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! ADS1115 16-bit ADC over I2C carrying the four MQ gas sensors.
//!
//! Single-ended single-shot reads at PGA +/-4.096 V (gain 1), 128 SPS.
//! Channel map: A0=MQ-137, A1=MQ-135, A2=MQ-3, A3=MQ-4.

use rppal::i2c::I2c;
use std::thread;
use std::time::Duration;

use super::{GasArray, HwError};
use crate::config::HardwareConfig;
use crate::model::GasReading;

/// Conversion result register (read-only, 16-bit signed)
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write)
const REG_CONFIG: u8 = 0x01;

// Config register layout (MSB first):
//   [15]    OS       - write 1 to start single-shot conversion
//   [14:12] MUX      - input multiplexer
//   [11:9]  PGA      - programmable gain amplifier
//   [8]     MODE     - 1 = single-shot
//   [7:5]   DR       - data rate
//   [1:0]   COMP_QUE - 11 = comparator off

/// OS=1, PGA=001 (+/-4.096 V), MODE=1, DR=100 (128 SPS), comparator off
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u8 = 12;
/// MUX values for AINx vs GND
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Full-scale voltage at PGA +/-4.096 V
const FULL_SCALE_V: f64 = 4.096;

/// Conversion time at 128 SPS is ~7.8 ms; wait 9 ms for margin
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Conversion-ready flag when the config register is read back
const OS_READY_BIT: u16 = 1 << 15;

const DEVICE: &str = "ADS1115/MQ array";

pub struct Ads1115 {
    i2c: I2c,
}

impl Ads1115 {
    /// Open the bus and verify the chip answers at its address
    pub fn probe(hw: &HardwareConfig) -> Result<Self, HwError> {
        let mut i2c = I2c::with_bus(hw.i2c_bus)
            .map_err(|e| HwError::read(DEVICE, format!("opening I2C bus: {e}")))?;
        i2c.set_slave_address(hw.ads1115_addr)
            .map_err(|e| HwError::read(DEVICE, format!("setting address: {e}")))?;

        let mut dev = Self { i2c };
        // A config-register read doubles as the presence check
        dev.read_register(REG_CONFIG)?;
        Ok(dev)
    }

    fn read_register(&mut self, reg: u8) -> Result<u16, HwError> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&[reg], &mut buf)
            .map_err(|e| HwError::read(DEVICE, format!("register {reg:#04x} read: {e}")))?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write_register(&mut self, reg: u8, value: u16) -> Result<(), HwError> {
        let bytes = value.to_be_bytes();
        self.i2c
            .write(&[reg, bytes[0], bytes[1]])
            .map_err(|e| HwError::read(DEVICE, format!("register {reg:#04x} write: {e}")))?;
        Ok(())
    }

    /// Single-shot read of one single-ended channel, in volts
    fn read_channel(&mut self, channel: usize) -> Result<f64, HwError> {
        let config = CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT);
        self.write_register(REG_CONFIG, config)?;
        thread::sleep(CONVERSION_WAIT);

        // Poll the ready bit a few times in case the conversion ran long
        for _ in 0..3 {
            if self.read_register(REG_CONFIG)? & OS_READY_BIT != 0 {
                let raw = self.read_register(REG_CONVERSION)? as i16;
                let volts = f64::from(raw.max(0)) * FULL_SCALE_V / 32768.0;
                return Ok((volts * 1000.0).round() / 1000.0);
            }
            thread::sleep(Duration::from_millis(2));
        }
        Err(HwError::read(DEVICE, format!("conversion on AIN{channel} never completed")))
    }
}

impl GasArray for Ads1115 {
    fn read(&mut self) -> Result<GasReading, HwError> {
        Ok(GasReading {
            mq137: self.read_channel(0)?,
            mq135: self.read_channel(1)?,
            mq3: self.read_channel(2)?,
            mq4: self.read_channel(3)?,
        })
    }
}
