// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Application version
    pub version: String,

    /// Log level
    pub log_level: String,

    /// Run against simulated sensors instead of the I2C bus
    pub sim_mode: bool,

    /// File locations
    pub paths: PathsConfig,

    /// Hardware wiring
    pub hardware: HardwareConfig,

    /// Acquisition timing and sampling parameters
    pub acquisition: AcquisitionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "PoultriScan".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            sim_mode: false,
            paths: PathsConfig::default(),
            hardware: HardwareConfig::default(),
            acquisition: AcquisitionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("poultriscan"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory receiving every CSV and JSON snapshot
    pub data_dir: PathBuf,

    /// Compiled training data used to build the calibration table
    pub calibration_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            calibration_file: PathBuf::from("[COMPILED POULTRISCAN DATA.csv"),
        }
    }
}

/// Hardware wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// I2C bus number
    pub i2c_bus: u8,

    /// AHT20 I2C address
    pub aht20_addr: u16,

    /// ADS1115 I2C address
    pub ads1115_addr: u16,

    /// ADS1115 PGA gain setting (1 = +/-4.096 V)
    pub ads1115_gain: u8,

    /// Fan GPIO (BCM numbering)
    pub fan_pin: u8,

    /// Strip LED GPIO (BCM numbering)
    pub led_pin: u8,

    /// Fan PWM frequency in Hz
    pub pwm_freq_hz: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            aht20_addr: 0x38,
            ads1115_addr: 0x48,
            ads1115_gain: 1,
            fan_pin: 27,
            led_pin: 17,
            pwm_freq_hz: 100.0,
        }
    }
}

/// Acquisition timing and sampling parameters
///
/// Every delay the pipeline takes lives here so tests can zero them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Startup purge, fan at 100% (seconds)
    pub pre_purge_secs: u64,

    /// Fan-off settle after the startup purge (seconds)
    pub stabilize_secs: u64,

    /// Gas baseline sample count
    pub baseline_samples: u32,

    /// Gap between baseline samples (milliseconds)
    pub baseline_interval_ms: u64,

    /// Bulb stabilization before a spectral capture (milliseconds)
    pub bulb_stab_ms: u64,

    /// Settle pause after a bulb is switched off (milliseconds)
    pub bulb_settle_ms: u64,

    /// Shots aggregated into one dashboard scan
    pub scan_shots: u32,

    /// Gap between scan shots (milliseconds)
    pub scan_shot_gap_ms: u64,

    /// Continuous-mode tick interval (milliseconds)
    pub continuous_interval_ms: u64,

    /// Continuous-mode tumbling window size in samples
    pub continuous_window: usize,

    /// LED stabilization before a continuous-mode read (milliseconds)
    pub continuous_led_stab_ms: u64,

    /// Training blocks per sample
    pub training_blocks: u32,

    /// Shots per training block
    pub training_shots: u32,

    /// Idle between training shots (milliseconds)
    pub training_shot_gap_ms: u64,

    /// Idle between training blocks (milliseconds)
    pub training_block_gap_ms: u64,

    /// Purge tolerance band around each baseline target (percent)
    pub purge_tolerance_pct: f64,

    /// Purge sensor check interval (milliseconds)
    pub purge_check_ms: u64,

    /// Purge hard deadline (milliseconds)
    pub purge_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            pre_purge_secs: 10,
            stabilize_secs: 5,
            baseline_samples: 30,
            baseline_interval_ms: 1000,
            bulb_stab_ms: 2000,
            bulb_settle_ms: 300,
            scan_shots: 5,
            scan_shot_gap_ms: 500,
            continuous_interval_ms: 5000,
            continuous_window: 60,
            continuous_led_stab_ms: 500,
            training_blocks: 3,
            training_shots: 5,
            training_shot_gap_ms: 3000,
            training_block_gap_ms: 5000,
            purge_tolerance_pct: 5.0,
            purge_check_ms: 3000,
            purge_timeout_ms: 60_000,
        }
    }
}

impl AcquisitionConfig {
    /// Every delay zeroed and the purge deadline collapsed; sampling counts
    /// untouched. Used by the property tests to run the pipeline flat-out.
    pub fn instant() -> Self {
        Self {
            pre_purge_secs: 0,
            stabilize_secs: 0,
            baseline_interval_ms: 0,
            bulb_stab_ms: 0,
            bulb_settle_ms: 0,
            scan_shot_gap_ms: 0,
            continuous_interval_ms: 0,
            continuous_led_stab_ms: 0,
            training_shot_gap_ms: 0,
            training_block_gap_ms: 0,
            purge_check_ms: 0,
            purge_timeout_ms: 0,
            ..Self::default()
        }
    }

    pub fn pre_purge(&self) -> Duration {
        Duration::from_secs(self.pre_purge_secs)
    }

    pub fn stabilize(&self) -> Duration {
        Duration::from_secs(self.stabilize_secs)
    }

    pub fn baseline_interval(&self) -> Duration {
        Duration::from_millis(self.baseline_interval_ms)
    }

    pub fn bulb_stab(&self) -> Duration {
        Duration::from_millis(self.bulb_stab_ms)
    }

    pub fn bulb_settle(&self) -> Duration {
        Duration::from_millis(self.bulb_settle_ms)
    }

    pub fn scan_shot_gap(&self) -> Duration {
        Duration::from_millis(self.scan_shot_gap_ms)
    }

    pub fn continuous_interval(&self) -> Duration {
        Duration::from_millis(self.continuous_interval_ms)
    }

    pub fn continuous_led_stab(&self) -> Duration {
        Duration::from_millis(self.continuous_led_stab_ms)
    }

    pub fn training_shot_gap(&self) -> Duration {
        Duration::from_millis(self.training_shot_gap_ms)
    }

    pub fn training_block_gap(&self) -> Duration {
        Duration::from_millis(self.training_block_gap_ms)
    }

    pub fn purge_check(&self) -> Duration {
        Duration::from_millis(self.purge_check_ms)
    }

    pub fn purge_timeout(&self) -> Duration {
        Duration::from_millis(self.purge_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let acq = AcquisitionConfig::default();
        assert_eq!(acq.pre_purge(), Duration::from_secs(10));
        assert_eq!(acq.bulb_stab(), Duration::from_millis(2000));
        assert_eq!(acq.bulb_settle(), Duration::from_millis(300));
        assert_eq!(acq.scan_shots, 5);
        assert_eq!(acq.continuous_window, 60);
        assert_eq!(acq.purge_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.hardware.fan_pin, 27);
        assert_eq!(back.hardware.led_pin, 17);
        assert_eq!(back.acquisition.baseline_samples, 30);
    }
}
