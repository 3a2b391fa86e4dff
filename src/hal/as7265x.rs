// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! AS7265x spectral triad over I2C.
//!
//! The triad is three AS7265x dies behind one virtual-register bridge: a
//! status/write/read mailbox on the physical bus, with a device-selector
//! register multiplexing the A/B/C dies. Channels are numbered 1-18 in
//! wavelength order: 1-6 (410-535 nm) on the UV die, 7-12 (560-705 nm) on
//! the visible die, 13-18 (730-940 nm) on the NIR die. Each die also drives
//! one bulb: UV, white and IR respectively.

use rppal::i2c::I2c;
use std::thread;
use std::time::{Duration, Instant};

use super::{HwError, Spectrometer};
use crate::config::HardwareConfig;
use crate::model::{LedSource, SPECTRAL_CHANNELS};

const I2C_ADDR: u16 = 0x49;

// Physical mailbox registers
const REG_STATUS: u8 = 0x00;
const REG_WRITE: u8 = 0x01;
const REG_READ: u8 = 0x02;

const STATUS_RX_VALID: u8 = 0x01;
const STATUS_TX_VALID: u8 = 0x02;

// Virtual registers (per selected die unless noted)
const VREG_HW_VERSION: u8 = 0x00;
const VREG_CONFIG: u8 = 0x04;
const VREG_INTEG_TIME: u8 = 0x05;
const VREG_LED_CONFIG: u8 = 0x07;
/// Device selector, shared across the bridge
const VREG_DEV_SEL: u8 = 0x4F;
/// First calibrated-result register; six 4-byte floats per die
const VREG_CAL_BASE: u8 = 0x14;

/// Config register: DATA_RDY flag and one-shot-all-channels mode
const CONFIG_DATA_RDY: u8 = 0x02;
const MODE_SHIFT: u8 = 2;
const MODE_MASK: u8 = 0b11 << MODE_SHIFT;
const MODE_ONE_SHOT: u8 = 0b11;

/// LED_CONFIG bit 3 enables the bulb driver
const LED_DRV_ENABLE: u8 = 0x08;

/// Expected HW version high byte for the AS72651 family
const HW_VERSION_AS72651: u8 = 0x41;

/// Mailbox poll budget; virtual access is slow but bounded
const MAILBOX_TIMEOUT: Duration = Duration::from_millis(500);
/// Integration poll budget for a one-shot capture
const MEASURE_TIMEOUT: Duration = Duration::from_secs(3);

const DEVICE: &str = "AS7265x";

/// Die selector values for `VREG_DEV_SEL`
#[derive(Clone, Copy, PartialEq)]
enum Die {
    Nir = 0,     // AS72651, channels 13-18, IR bulb
    Visible = 1, // AS72652, channels 7-12, white bulb
    Uv = 2,      // AS72653, channels 1-6, UV bulb
}

impl Die {
    fn for_bulb(bulb: LedSource) -> Die {
        match bulb {
            LedSource::White => Die::Visible,
            LedSource::Uv => Die::Uv,
            LedSource::Ir => Die::Nir,
        }
    }

    /// Die and calibrated-register slot for a 1-based channel
    fn for_channel(channel: usize) -> (Die, u8) {
        let slot = ((channel - 1) % 6) as u8;
        let die = match channel {
            1..=6 => Die::Uv,
            7..=12 => Die::Visible,
            _ => Die::Nir,
        };
        (die, VREG_CAL_BASE + slot * 4)
    }
}

pub struct As7265x {
    i2c: I2c,
    selected: Option<Die>,
}

impl As7265x {
    /// Open the bus and verify the master die answers with its HW version
    pub fn probe(hw: &HardwareConfig) -> Result<Self, HwError> {
        let mut i2c = I2c::with_bus(hw.i2c_bus)
            .map_err(|e| HwError::read(DEVICE, format!("opening I2C bus: {e}")))?;
        i2c.set_slave_address(I2C_ADDR)
            .map_err(|e| HwError::read(DEVICE, format!("setting address: {e}")))?;

        let mut dev = Self {
            i2c,
            selected: None,
        };
        let version = dev.virtual_read(VREG_HW_VERSION)?;
        if version != HW_VERSION_AS72651 {
            return Err(HwError::read(
                DEVICE,
                format!("unexpected HW version {version:#04x}"),
            ));
        }
        // Default integration time on every die
        for die in [Die::Nir, Die::Visible, Die::Uv] {
            dev.select(die)?;
            dev.virtual_write(VREG_INTEG_TIME, 50)?;
        }
        Ok(dev)
    }

    fn mailbox_status(&mut self) -> Result<u8, HwError> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(&[REG_STATUS], &mut buf)
            .map_err(|e| HwError::read(DEVICE, format!("status read: {e}")))?;
        Ok(buf[0])
    }

    fn wait_tx_clear(&mut self) -> Result<(), HwError> {
        let start = Instant::now();
        while self.mailbox_status()? & STATUS_TX_VALID != 0 {
            if start.elapsed() > MAILBOX_TIMEOUT {
                return Err(HwError::read(DEVICE, "mailbox TX never cleared"));
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn virtual_read(&mut self, vreg: u8) -> Result<u8, HwError> {
        // Flush any stale RX byte
        if self.mailbox_status()? & STATUS_RX_VALID != 0 {
            let mut buf = [0u8; 1];
            self.i2c
                .write_read(&[REG_READ], &mut buf)
                .map_err(|e| HwError::read(DEVICE, format!("stale RX flush: {e}")))?;
        }
        self.wait_tx_clear()?;
        self.i2c
            .write(&[REG_WRITE, vreg])
            .map_err(|e| HwError::read(DEVICE, format!("vreg {vreg:#04x} select: {e}")))?;

        let start = Instant::now();
        while self.mailbox_status()? & STATUS_RX_VALID == 0 {
            if start.elapsed() > MAILBOX_TIMEOUT {
                return Err(HwError::read(DEVICE, "mailbox RX never filled"));
            }
            thread::sleep(Duration::from_millis(1));
        }
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(&[REG_READ], &mut buf)
            .map_err(|e| HwError::read(DEVICE, format!("vreg {vreg:#04x} read: {e}")))?;
        Ok(buf[0])
    }

    fn virtual_write(&mut self, vreg: u8, value: u8) -> Result<(), HwError> {
        self.wait_tx_clear()?;
        self.i2c
            .write(&[REG_WRITE, vreg | 0x80])
            .map_err(|e| HwError::read(DEVICE, format!("vreg {vreg:#04x} select: {e}")))?;
        self.wait_tx_clear()?;
        self.i2c
            .write(&[REG_WRITE, value])
            .map_err(|e| HwError::read(DEVICE, format!("vreg {vreg:#04x} write: {e}")))?;
        Ok(())
    }

    fn select(&mut self, die: Die) -> Result<(), HwError> {
        if self.selected == Some(die) {
            return Ok(());
        }
        self.virtual_write(VREG_DEV_SEL, die as u8)?;
        self.selected = Some(die);
        Ok(())
    }

    /// IEEE-754 float from four consecutive calibrated registers
    fn read_calibrated(&mut self, base: u8) -> Result<f64, HwError> {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.virtual_read(base + i as u8)?;
        }
        Ok(f64::from(f32::from_be_bytes(bytes)))
    }
}

impl Spectrometer for As7265x {
    fn enable_bulb(&mut self, bulb: LedSource) -> Result<(), HwError> {
        self.select(Die::for_bulb(bulb))?;
        let led = self.virtual_read(VREG_LED_CONFIG)?;
        self.virtual_write(VREG_LED_CONFIG, led | LED_DRV_ENABLE)
    }

    fn disable_bulb(&mut self, bulb: LedSource) -> Result<(), HwError> {
        self.select(Die::for_bulb(bulb))?;
        let led = self.virtual_read(VREG_LED_CONFIG)?;
        self.virtual_write(VREG_LED_CONFIG, led & !LED_DRV_ENABLE)
    }

    fn take_measurement(&mut self) -> Result<(), HwError> {
        // One-shot all-channels on every die; the master die reports ready
        for die in [Die::Nir, Die::Visible, Die::Uv] {
            self.select(die)?;
            let config = self.virtual_read(VREG_CONFIG)?;
            let config = (config & !MODE_MASK) | (MODE_ONE_SHOT << MODE_SHIFT);
            self.virtual_write(VREG_CONFIG, config & !CONFIG_DATA_RDY)?;
        }

        self.select(Die::Nir)?;
        let start = Instant::now();
        loop {
            if self.virtual_read(VREG_CONFIG)? & CONFIG_DATA_RDY != 0 {
                return Ok(());
            }
            if start.elapsed() > MEASURE_TIMEOUT {
                return Err(HwError::read(DEVICE, "integration never completed"));
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn get_channel(&mut self, channel: usize) -> Result<f64, HwError> {
        if !(1..=SPECTRAL_CHANNELS).contains(&channel) {
            return Err(HwError::read(DEVICE, format!("channel {channel} out of range")));
        }
        let (die, base) = Die::for_channel(channel);
        self.select(die)?;
        self.read_calibrated(base)
    }
}
