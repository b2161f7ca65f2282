use crate::error::ConfigError;
use crate::staircase::StaircaseParams;
use crate::threshold::ThresholdParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub trials_path: PathBuf,
    pub output_dir: PathBuf,
    /// TrueType font for on-screen messages. Text is skipped if it cannot be loaded.
    pub font_path: PathBuf,
    pub block_size: usize,
    /// Fraction of trials that carry a vibration cue.
    pub vibration_proportion: f64,
    pub fixation_ms: u64,
    /// Search trials without a LEFT/RIGHT response end after this long.
    pub response_window_ms: u64,
    pub calibration_frames: usize,
    pub tile_size: f32,
    pub staircase: StaircaseConfig,
    pub threshold: ThresholdConfig,
    pub device: DeviceConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            trials_path: PathBuf::from("contextual_trials_chun1998_black_FULL.csv"),
            output_dir: PathBuf::from("."),
            font_path: PathBuf::from("assets/DejaVuSans.ttf"),
            block_size: 24,
            vibration_proportion: 0.75,
            fixation_ms: 500,
            response_window_ms: 6000,
            calibration_frames: 120,
            tile_size: 50.0,
            staircase: StaircaseConfig::default(),
            threshold: ThresholdConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

/// Response-timing staircase settings, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaircaseConfig {
    pub initial_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub step_ms: u64,
    /// Before-response margins at or below this hold the delay.
    pub tolerance_ms: u64,
    /// Step multiplier applied on every reversal. 1.0 keeps the step fixed.
    pub shrink_factor: f64,
    pub min_step_ms: u64,
}

impl Default for StaircaseConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 600,
            min_delay_ms: 100,
            max_delay_ms: 3000,
            step_ms: 50,
            tolerance_ms: 20,
            shrink_factor: 1.0,
            min_step_ms: 10,
        }
    }
}

impl StaircaseConfig {
    pub fn params(&self) -> StaircaseParams {
        StaircaseParams {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            step: Duration::from_millis(self.step_ms),
            tolerance: Duration::from_millis(self.tolerance_ms),
            shrink_factor: self.shrink_factor,
            min_step: Duration::from_millis(self.min_step_ms),
        }
    }
}

/// Vibration detection staircase run before the search task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub enabled: bool,
    pub start_intensity: u8,
    pub trials: usize,
    pub step: u8,
    pub min_intensity: u8,
    pub max_intensity: u8,
    pub reversals_averaged: usize,
    pub interval_secs: (u64, u64),
    pub response_window_ms: u64,
    /// Intensity used for cues when the detection staircase is disabled.
    pub fallback_intensity: u8,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_intensity: 5,
            trials: 15,
            step: 1,
            min_intensity: 2,
            max_intensity: 10,
            reversals_averaged: 6,
            interval_secs: (1, 3),
            response_window_ms: 5000,
            fallback_intensity: 5,
        }
    }
}

impl ThresholdConfig {
    pub fn params(&self) -> ThresholdParams {
        ThresholdParams {
            start_intensity: self.start_intensity,
            trials: self.trials,
            step: self.step,
            min_intensity: self.min_intensity,
            max_intensity: self.max_intensity,
            reversals_averaged: self.reversals_averaged,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Boards that reset on connect need a moment before accepting bytes.
    pub settle_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: if cfg!(windows) {
                "COM4".to_string()
            } else {
                "/dev/ttyACM0".to_string()
            },
            baud_rate: 115_200,
            settle_ms: 2000,
        }
    }
}

impl ExperimentConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|cause| ConfigError::Read {
            path: path.to_path_buf(),
            cause,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|cause| ConfigError::Parse {
            path: path.to_path_buf(),
            cause,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, problem: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                problem: problem.into(),
            }
        }

        if self.block_size == 0 {
            return Err(invalid("block_size", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.vibration_proportion) {
            return Err(invalid("vibration_proportion", "must be within [0, 1]"));
        }
        if self.response_window_ms == 0 {
            return Err(invalid("response_window_ms", "must be positive"));
        }
        let s = &self.staircase;
        if s.min_delay_ms > s.max_delay_ms {
            return Err(invalid("staircase.min_delay_ms", "exceeds max_delay_ms"));
        }
        if s.step_ms == 0 {
            return Err(invalid("staircase.step_ms", "must be positive"));
        }
        if !(s.shrink_factor > 0.0 && s.shrink_factor <= 1.0) {
            return Err(invalid("staircase.shrink_factor", "must be within (0, 1]"));
        }
        let t = &self.threshold;
        if t.min_intensity > t.max_intensity {
            return Err(invalid("threshold.min_intensity", "exceeds max_intensity"));
        }
        if t.interval_secs.0 > t.interval_secs.1 {
            return Err(invalid("threshold.interval_secs", "lower bound exceeds upper"));
        }
        Ok(())
    }
}
