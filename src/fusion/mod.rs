// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Fusion reader
//!
//! Sequences the spectral bulbs (white, IR, UV), applies the stabilization
//! protocol and assembles one 18-channel frame together with the latest
//! environmental and gas readings. Any fault inside the sequence disables
//! every bulb and the strip LED before the caller sees it; transient read
//! faults degrade to placeholders (18 zeroes for the spectrum, NaN for
//! scalars) and are logged once per process.

use std::ops::RangeInclusive;
use std::sync::Once;
use std::time::Duration;
use tracing::warn;

use crate::config::AcquisitionConfig;
use crate::core::StopToken;
use crate::hal::{HalHandles, HwError};
use crate::model::{EnvReading, Frame, GasReading, LedSource, Spectrum, SPECTRAL_CHANNELS};

/// Visible/red band captured under the white bulb
const WHITE_BAND: RangeInclusive<usize> = 7..=12;
/// NIR band captured under the IR bulb
const IR_BAND: RangeInclusive<usize> = 13..=18;
/// UV/violet band captured under the UV bulb
const UV_BAND: RangeInclusive<usize> = 1..=6;

static TRANSIENT_WARNED: Once = Once::new();

/// Warn about a degraded read exactly once per process to avoid flooding
fn warn_once(err: &HwError) {
    TRANSIENT_WARNED.call_once(|| {
        warn!("transient sensor fault, substituting placeholders (reported once): {err}");
    });
}

/// Borrow-of-the-moment reader over the HAL handles
pub struct FusionReader<'a> {
    hal: &'a mut HalHandles,
    acq: &'a AcquisitionConfig,
    token: &'a StopToken,
}

impl<'a> FusionReader<'a> {
    pub fn new(hal: &'a mut HalHandles, acq: &'a AcquisitionConfig, token: &'a StopToken) -> Self {
        Self { hal, acq, token }
    }

    /// Three-pass spectral capture.
    ///
    /// With `leds_on` the strip LED comes up and each pass runs under its
    /// bulb; without, the same three passes run dark with identical timing,
    /// which is the only way to obtain a dark reference.
    pub fn read_spectrum(&mut self, leds_on: bool) -> Result<Spectrum, HwError> {
        let result = self.spectrum_passes(leds_on);
        if result.is_err() {
            // Leave the chamber dark no matter where the sequence died
            self.hal.all_bulbs_off();
            if let Err(e) = self.hal.led.set(false) {
                warn!("strip LED off failed during fault cleanup: {e}");
            }
        }
        match result {
            Ok(spectrum) => Ok(spectrum),
            Err(e) if e.is_transient() => {
                warn_once(&e);
                Ok(Spectrum::zeros())
            }
            Err(e) => Err(e),
        }
    }

    fn spectrum_passes(&mut self, leds_on: bool) -> Result<Spectrum, HwError> {
        let mut spectrum = Spectrum::zeros();
        if leds_on {
            self.hal.led.set(true)?;
        }

        self.pass(leds_on.then_some(LedSource::White), WHITE_BAND, &mut spectrum)?;
        self.token.sleep(self.acq.bulb_settle());
        self.pass(leds_on.then_some(LedSource::Ir), IR_BAND, &mut spectrum)?;
        self.token.sleep(self.acq.bulb_settle());
        self.pass(leds_on.then_some(LedSource::Uv), UV_BAND, &mut spectrum)?;

        if leds_on {
            self.hal.led.set(false)?;
        }
        Ok(spectrum)
    }

    /// One bulb pass: light, stabilize, integrate, read the band, dark
    fn pass(
        &mut self,
        bulb: Option<LedSource>,
        band: RangeInclusive<usize>,
        out: &mut Spectrum,
    ) -> Result<(), HwError> {
        if let Some(b) = bulb {
            self.hal.spectro.enable_bulb(b)?;
        }
        self.token.sleep(self.acq.bulb_stab());
        self.hal.spectro.take_measurement()?;
        for ch in band {
            out.set_channel(ch, self.hal.spectro.get_channel(ch)?);
        }
        if let Some(b) = bulb {
            self.hal.spectro.disable_bulb(b)?;
        }
        Ok(())
    }

    /// Full fused frame: three-pass spectrum plus env and gas
    pub fn read_all_sensors(&mut self) -> Result<Frame, HwError> {
        let white = self.read_spectrum(true)?;
        let env = self.read_env_lenient()?;
        let gas = self.read_gas_lenient()?;
        Ok(Frame::new(env, gas, white))
    }

    /// Single-pass white-only frame for continuous mode: strip LED and
    /// white bulb, a short stabilization, one integration, all 18 channels.
    pub fn read_white_only(&mut self, stab: Duration) -> Result<Frame, HwError> {
        let result = self.white_only_inner(stab);
        if result.is_err() {
            self.hal.all_bulbs_off();
            if let Err(e) = self.hal.led.set(false) {
                warn!("strip LED off failed during fault cleanup: {e}");
            }
        }
        result
    }

    fn white_only_inner(&mut self, stab: Duration) -> Result<Frame, HwError> {
        self.hal.led.set(true)?;
        self.hal.spectro.enable_bulb(LedSource::White)?;
        self.token.sleep(stab);

        let gas = self.read_gas_lenient()?;
        let env = self.read_env_lenient()?;

        let spectrum = match self.integrate_all() {
            Ok(s) => s,
            Err(e) if e.is_transient() => {
                warn_once(&e);
                Spectrum::zeros()
            }
            Err(e) => return Err(e),
        };

        self.hal.spectro.disable_bulb(LedSource::White)?;
        self.hal.led.set(false)?;
        Ok(Frame::new(env, gas, spectrum))
    }

    /// One training shot: a white-lit fused read followed by UV and IR
    /// spectra, each with the full stabilization and settle protocol. The
    /// returned frame carries all three illumination contexts.
    pub fn read_triplet(&mut self) -> Result<Frame, HwError> {
        let result = self.triplet_inner();
        if result.is_err() {
            self.hal.all_bulbs_off();
            if let Err(e) = self.hal.led.set(false) {
                warn!("strip LED off failed during fault cleanup: {e}");
            }
        }
        result
    }

    fn triplet_inner(&mut self) -> Result<Frame, HwError> {
        // White pass carries the gas and env reads
        self.hal.led.set(true)?;
        self.hal.spectro.enable_bulb(LedSource::White)?;
        self.token.sleep(self.acq.bulb_stab());

        let gas = self.read_gas_lenient()?;
        let env = self.read_env_lenient()?;
        let white = self.integrate_lenient()?;

        self.hal.spectro.disable_bulb(LedSource::White)?;
        self.hal.led.set(false)?;
        self.token.sleep(self.acq.bulb_settle());

        let uv = self.single_bulb_pass(LedSource::Uv)?;
        self.token.sleep(self.acq.bulb_settle());
        let ir = self.single_bulb_pass(LedSource::Ir)?;

        let mut frame = Frame::new(env, gas, white);
        frame.uv = Some(uv);
        frame.ir = Some(ir);
        Ok(frame)
    }

    fn single_bulb_pass(&mut self, bulb: LedSource) -> Result<Spectrum, HwError> {
        self.hal.spectro.enable_bulb(bulb)?;
        self.token.sleep(self.acq.bulb_stab());
        let spectrum = self.integrate_lenient()?;
        self.hal.spectro.disable_bulb(bulb)?;
        Ok(spectrum)
    }

    fn integrate_lenient(&mut self) -> Result<Spectrum, HwError> {
        match self.integrate_all() {
            Ok(s) => Ok(s),
            Err(e) if e.is_transient() => {
                warn_once(&e);
                Ok(Spectrum::zeros())
            }
            Err(e) => Err(e),
        }
    }

    /// Integrate once and read every channel of the current illumination
    pub fn integrate_all(&mut self) -> Result<Spectrum, HwError> {
        self.hal.spectro.take_measurement()?;
        let mut spectrum = Spectrum::zeros();
        for ch in 1..=SPECTRAL_CHANNELS {
            spectrum.set_channel(ch, self.hal.spectro.get_channel(ch)?);
        }
        Ok(spectrum)
    }

    fn read_env_lenient(&mut self) -> Result<EnvReading, HwError> {
        match self.hal.env.read() {
            Ok(env) => Ok(env),
            Err(e) if e.is_transient() => {
                warn_once(&e);
                Ok(EnvReading::nan())
            }
            Err(e) => Err(e),
        }
    }

    fn read_gas_lenient(&mut self) -> Result<GasReading, HwError> {
        match self.hal.gas.read() {
            Ok(gas) => Ok(gas),
            Err(e) if e.is_transient() => {
                warn_once(&e);
                Ok(GasReading::nan())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcquisitionConfig;
    use crate::hal::mock::{MockHal, MockOp};

    fn acq() -> AcquisitionConfig {
        AcquisitionConfig::instant()
    }

    #[test]
    fn test_three_pass_order_white_ir_uv() {
        let mock = MockHal::new();
        let mut handles = mock.handles();
        let acq = acq();
        let token = StopToken::new();
        let spectrum = FusionReader::new(&mut handles, &acq, &token)
            .read_spectrum(true)
            .unwrap();
        assert_eq!(spectrum.channel(1), 100.0);

        let bulbs: Vec<MockOp> = mock
            .journal()
            .into_iter()
            .filter(|op| matches!(op, MockOp::BulbOn(_)))
            .collect();
        assert_eq!(
            bulbs,
            vec![
                MockOp::BulbOn(LedSource::White),
                MockOp::BulbOn(LedSource::Ir),
                MockOp::BulbOn(LedSource::Uv),
            ]
        );
        assert!(mock.all_quiet());
    }

    #[test]
    fn test_dark_reference_never_lights_anything() {
        let mock = MockHal::new();
        let mut handles = mock.handles();
        let acq = acq();
        let token = StopToken::new();
        FusionReader::new(&mut handles, &acq, &token)
            .read_spectrum(false)
            .unwrap();
        assert!(!mock
            .journal()
            .iter()
            .any(|op| matches!(op, MockOp::BulbOn(_) | MockOp::Led(true))));
        // Still three integrations so the timing stays comparable
        let measures = mock
            .journal()
            .iter()
            .filter(|op| matches!(op, MockOp::Measure))
            .count();
        assert_eq!(measures, 3);
    }

    #[test]
    fn test_transient_fault_degrades_to_zeroes_and_cleans_up() {
        let mock = MockHal::new();
        mock.fault_spectro(HwError::read("AS7265x", "flaky channel"));
        let mut handles = mock.handles();
        let acq = acq();
        let token = StopToken::new();
        let spectrum = FusionReader::new(&mut handles, &acq, &token)
            .read_spectrum(true)
            .unwrap();
        assert_eq!(spectrum, Spectrum::zeros());
        assert!(mock.all_quiet());
    }

    #[test]
    fn test_not_initialized_propagates_after_cleanup() {
        let mock = MockHal::new();
        mock.fault_spectro(HwError::not_initialized("AS7265x"));
        let mut handles = mock.handles();
        let acq = acq();
        let token = StopToken::new();
        let err = FusionReader::new(&mut handles, &acq, &token)
            .read_spectrum(true)
            .unwrap_err();
        assert!(matches!(err, HwError::NotInitialized { .. }));
        assert!(mock.all_quiet());
    }

    #[test]
    fn test_read_all_sensors_merges_env_and_gas() {
        let mock = MockHal::new();
        let mut handles = mock.handles();
        let acq = acq();
        let token = StopToken::new();
        let frame = FusionReader::new(&mut handles, &acq, &token)
            .read_all_sensors()
            .unwrap();
        assert_eq!(frame.env.temp_c, 22.0);
        assert_eq!(frame.gas.mq137, 1.0);
        assert!(frame.uv.is_none());
    }

    #[test]
    fn test_transient_env_fault_becomes_nan() {
        let mock = MockHal::new();
        mock.fault_env(HwError::read("AHT20", "busy"));
        let mut handles = mock.handles();
        let acq = acq();
        let token = StopToken::new();
        let frame = FusionReader::new(&mut handles, &acq, &token)
            .read_all_sensors()
            .unwrap();
        assert!(frame.env.temp_c.is_nan());
        assert!(!frame.gas.mq137.is_nan());
    }
}
