// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Simulated chamber for demo/testing
//!
//! One shared chamber model behind all five handles: gas voltages creep up
//! while the fan is off and decay toward rest values while it runs, and the
//! spectral channels respond to whichever bulb is lit. Good enough to drive
//! the whole pipeline on a dev machine with `--sim`.

use parking_lot::Mutex;
use rand::prelude::*;
use std::sync::Arc;

use super::{EnvSensor, Fan, GasArray, HalHandles, HwError, Illuminator, Spectrometer};
use crate::model::{EnvReading, GasReading, LedSource, SPECTRAL_CHANNELS};

const GAS_REST: [f64; 4] = [1.22, 0.16, 0.35, 0.61]; // mq137, mq135, mq4, mq3

struct SimState {
    rng: StdRng,
    fan_duty: u8,
    led_on: bool,
    bulbs: [bool; 3],
    // Volatile load in the chamber, decayed by the fan
    gas: [f64; 4],
    temp_c: f64,
    humidity_pct: f64,
    last_shot: [f64; SPECTRAL_CHANNELS],
}

impl SimState {
    fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            fan_duty: 0,
            led_on: false,
            bulbs: [false; 3],
            gas: GAS_REST,
            temp_c: 23.5,
            humidity_pct: 58.0,
            last_shot: [0.0; SPECTRAL_CHANNELS],
        }
    }

    fn step(&mut self) {
        self.temp_c += self.rng.gen_range(-0.05..0.05);
        self.humidity_pct = (self.humidity_pct + self.rng.gen_range(-0.2..0.2)).clamp(20.0, 95.0);

        let decay = self.fan_duty as f64 / 100.0 * 0.15;
        for (g, rest) in self.gas.iter_mut().zip(GAS_REST) {
            // Drift up while the chamber is sealed, relax toward rest under airflow
            *g += self.rng.gen_range(0.0..0.01);
            *g -= (*g - rest) * decay;
            *g = g.max(0.0);
        }
    }

    fn bulb_index(bulb: LedSource) -> usize {
        match bulb {
            LedSource::White => 0,
            LedSource::Uv => 1,
            LedSource::Ir => 2,
        }
    }

    fn integrate(&mut self) {
        let [white, uv, ir] = self.bulbs;
        for ch in 0..SPECTRAL_CHANNELS {
            // Dark floor plus the band each bulb excites
            let mut counts = self.rng.gen_range(0.5..2.0);
            if uv && ch < 6 {
                counts += 180.0 + self.rng.gen_range(-8.0..8.0);
            }
            if white && (6..12).contains(&ch) {
                counts += 240.0 + self.rng.gen_range(-10.0..10.0);
            }
            if ir && ch >= 12 {
                counts += 200.0 + self.rng.gen_range(-9.0..9.0);
            }
            if self.led_on && (6..12).contains(&ch) {
                counts += 30.0;
            }
            self.last_shot[ch] = counts;
        }
    }
}

/// Handle factory for the simulated chamber
pub struct SimHal;

impl SimHal {
    pub fn handles() -> HalHandles {
        let state = Arc::new(Mutex::new(SimState::new()));
        HalHandles {
            env: Box::new(SimEnv {
                state: state.clone(),
            }),
            gas: Box::new(SimGas {
                state: state.clone(),
            }),
            spectro: Box::new(SimSpectro {
                state: state.clone(),
            }),
            fan: Box::new(SimFan {
                state: state.clone(),
            }),
            led: Box::new(SimLed { state }),
        }
    }
}

struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

impl EnvSensor for SimEnv {
    fn read(&mut self) -> Result<EnvReading, HwError> {
        let mut st = self.state.lock();
        st.step();
        Ok(EnvReading {
            temp_c: (st.temp_c * 10.0).round() / 10.0,
            humidity_pct: (st.humidity_pct * 10.0).round() / 10.0,
        })
    }
}

struct SimGas {
    state: Arc<Mutex<SimState>>,
}

impl GasArray for SimGas {
    fn read(&mut self) -> Result<GasReading, HwError> {
        let mut st = self.state.lock();
        st.step();
        let round3 = |v: f64| (v * 1000.0).round() / 1000.0;
        Ok(GasReading {
            mq137: round3(st.gas[0]),
            mq135: round3(st.gas[1]),
            mq4: round3(st.gas[2]),
            mq3: round3(st.gas[3]),
        })
    }
}

struct SimSpectro {
    state: Arc<Mutex<SimState>>,
}

impl Spectrometer for SimSpectro {
    fn enable_bulb(&mut self, bulb: LedSource) -> Result<(), HwError> {
        self.state.lock().bulbs[SimState::bulb_index(bulb)] = true;
        Ok(())
    }

    fn disable_bulb(&mut self, bulb: LedSource) -> Result<(), HwError> {
        self.state.lock().bulbs[SimState::bulb_index(bulb)] = false;
        Ok(())
    }

    fn take_measurement(&mut self) -> Result<(), HwError> {
        self.state.lock().integrate();
        Ok(())
    }

    fn get_channel(&mut self, channel: usize) -> Result<f64, HwError> {
        if !(1..=SPECTRAL_CHANNELS).contains(&channel) {
            return Err(HwError::read("AS7265x", format!("channel {channel} out of range")));
        }
        Ok(self.state.lock().last_shot[channel - 1])
    }
}

struct SimFan {
    state: Arc<Mutex<SimState>>,
}

impl Fan for SimFan {
    fn set_duty(&mut self, duty: u8) -> Result<(), HwError> {
        self.state.lock().fan_duty = duty.min(100);
        Ok(())
    }
}

struct SimLed {
    state: Arc<Mutex<SimState>>,
}

impl Illuminator for SimLed {
    fn set(&mut self, on: bool) -> Result<(), HwError> {
        self.state.lock().led_on = on;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_decays_gas_toward_rest() {
        let mut handles = SimHal::handles();
        // Load the chamber by stepping with the fan off
        for _ in 0..200 {
            let _ = handles.gas.read().unwrap();
        }
        let loaded = handles.gas.read().unwrap();
        assert!(loaded.mq137 > GAS_REST[0]);

        handles.fan.set_duty(100).unwrap();
        for _ in 0..300 {
            let _ = handles.gas.read().unwrap();
        }
        let purged = handles.gas.read().unwrap();
        assert!(purged.mq137 < loaded.mq137);
    }

    #[test]
    fn test_bulbs_light_their_bands() {
        let mut handles = SimHal::handles();
        handles.spectro.enable_bulb(LedSource::White).unwrap();
        handles.spectro.take_measurement().unwrap();
        let lit = handles.spectro.get_channel(9).unwrap();
        let dark = handles.spectro.get_channel(2).unwrap();
        assert!(lit > 100.0);
        assert!(dark < 10.0);
    }
}
