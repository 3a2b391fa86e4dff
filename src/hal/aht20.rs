// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! AHT20 ambient temperature/humidity sensor over I2C.

use rppal::i2c::I2c;
use std::thread;
use std::time::Duration;

use super::{EnvSensor, HwError};
use crate::config::HardwareConfig;
use crate::model::EnvReading;

const CMD_INIT: [u8; 3] = [0xBE, 0x08, 0x00];
const CMD_MEASURE: [u8; 3] = [0xAC, 0x33, 0x00];
const CMD_STATUS: u8 = 0x71;

/// Status bit 7: measurement in progress
const STATUS_BUSY: u8 = 0x80;
/// Status bit 3: calibration loaded
const STATUS_CALIBRATED: u8 = 0x08;

/// Datasheet power-on settle
const POWER_ON_WAIT: Duration = Duration::from_millis(40);
/// Typical measurement time is 75 ms; wait 80 ms before the first poll
const MEASUREMENT_WAIT: Duration = Duration::from_millis(80);

const DEVICE: &str = "AHT20";

pub struct Aht20 {
    i2c: I2c,
}

impl Aht20 {
    /// Open the bus, load calibration if the sensor lost it
    pub fn probe(hw: &HardwareConfig) -> Result<Self, HwError> {
        let mut i2c = I2c::with_bus(hw.i2c_bus)
            .map_err(|e| HwError::read(DEVICE, format!("opening I2C bus: {e}")))?;
        i2c.set_slave_address(hw.aht20_addr)
            .map_err(|e| HwError::read(DEVICE, format!("setting address: {e}")))?;

        thread::sleep(POWER_ON_WAIT);

        let mut dev = Self { i2c };
        if dev.status()? & STATUS_CALIBRATED == 0 {
            dev.i2c
                .write(&CMD_INIT)
                .map_err(|e| HwError::read(DEVICE, format!("init command: {e}")))?;
            thread::sleep(Duration::from_millis(10));
            if dev.status()? & STATUS_CALIBRATED == 0 {
                return Err(HwError::read(DEVICE, "calibration never loaded"));
            }
        }
        Ok(dev)
    }

    fn status(&mut self) -> Result<u8, HwError> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(&[CMD_STATUS], &mut buf)
            .map_err(|e| HwError::read(DEVICE, format!("status read: {e}")))?;
        Ok(buf[0])
    }
}

impl EnvSensor for Aht20 {
    fn read(&mut self) -> Result<EnvReading, HwError> {
        self.i2c
            .write(&CMD_MEASURE)
            .map_err(|e| HwError::read(DEVICE, format!("trigger: {e}")))?;
        thread::sleep(MEASUREMENT_WAIT);

        let mut buf = [0u8; 7];
        for _ in 0..5 {
            self.i2c
                .read(&mut buf)
                .map_err(|e| HwError::read(DEVICE, format!("data read: {e}")))?;
            if buf[0] & STATUS_BUSY == 0 {
                // 20-bit humidity, 20-bit temperature, big-endian packed
                let raw_hum = (u32::from(buf[1]) << 12)
                    | (u32::from(buf[2]) << 4)
                    | (u32::from(buf[3]) >> 4);
                let raw_temp = ((u32::from(buf[3]) & 0x0F) << 16)
                    | (u32::from(buf[4]) << 8)
                    | u32::from(buf[5]);

                let humidity = f64::from(raw_hum) / f64::from(1u32 << 20) * 100.0;
                let temp = f64::from(raw_temp) / f64::from(1u32 << 20) * 200.0 - 50.0;

                return Ok(EnvReading {
                    temp_c: (temp * 10.0).round() / 10.0,
                    humidity_pct: (humidity * 10.0).round() / 10.0,
                });
            }
            thread::sleep(Duration::from_millis(10));
        }
        Err(HwError::read(DEVICE, "sensor stayed busy past the poll budget"))
    }
}
