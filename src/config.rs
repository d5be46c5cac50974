use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::processor::Downmix;
use crate::error::ConfigError;
use crate::onset::detector::BandPolicy;
use crate::onset::lanes::LanePolicy;
use crate::spectrum::bands::band_widths;
use crate::spectrum::transform::TransformExecution;
use crate::spectrum::window::WindowKind;

pub const WINDOW_SIZE: usize = 2048;
pub const HOP_LENGTH: usize = 2048;

pub const NUM_BANDS: usize = 4;
pub const FIRST_BAND_WIDTH: f32 = 10.0;
pub const TOTAL_BAND_WIDTH: f32 = 64.0;

pub const HISTORY_SIZE: usize = 43;
pub const SENSITIVITY: f32 = 3.0;
pub const MIN_INTERVAL: f64 = 0.2;
pub const ENERGY_THRESHOLD: f32 = 1e-4;
pub const REST_TIME: f64 = 0.5;
pub const NUM_LANES: usize = 4;

pub const BASE_C: f32 = 1.514_285_7;
pub const VARIANCE_CORRECTION: f32 = 0.002_571_4;
pub const FLOOR_C: f32 = 1.0;
pub const VARIANCE_FLOOR: f32 = 0.2;
pub const LANE_CHANGE_FACTOR: f32 = 1.0;

pub const QUEUE_CAPACITY: usize = 4096;

/// Where per-hop energy comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyMode {
    /// Mean squared sample of the raw segment, one band, no transform.
    TimeDomain,
    /// Windowed spectrum partitioned into sub-bands.
    #[default]
    SubBand,
}

/// Runtime configuration for an [`OnsetDetector`](crate::OnsetDetector).
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Analysis window in frames. Must be a power of two, at least 4.
    pub window_size: usize,
    /// Stride between hops, counted in interleaved input samples.
    pub hop_length: usize,
    pub window_kind: WindowKind,
    pub energy_mode: EnergyMode,

    pub num_bands: usize,
    /// Width in bins of the lowest band.
    pub first_band_width: f32,
    /// Sum of all band widths in bins. Bins above it are not analysed.
    pub total_band_width: f32,

    pub sensitivity: f32,
    /// Minimum seconds between two emitted events (per band for
    /// [`BandPolicy::Independent`]).
    pub min_interval: f64,
    /// Absolute energy floor below which a hop never fires.
    pub energy_threshold: f32,
    pub history_size: usize,
    /// Seconds from the start of the stream during which nothing fires.
    pub rest_time: f64,
    pub num_lanes: usize,

    pub base_c: f32,
    pub variance_correction: f32,
    pub floor_c: f32,
    pub variance_floor: f32,
    /// `k` in `|E - last| > k * variance`, the "sharp change" test for lanes.
    pub lane_change_factor: f32,

    pub lane_policy: LanePolicy,
    pub band_policy: BandPolicy,
    pub downmix: Downmix,
    pub execution: TransformExecution,
    pub queue_capacity: usize,
    /// Seed for lane selection. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            hop_length: HOP_LENGTH,
            window_kind: WindowKind::default(),
            energy_mode: EnergyMode::default(),
            num_bands: NUM_BANDS,
            first_band_width: FIRST_BAND_WIDTH,
            total_band_width: TOTAL_BAND_WIDTH,
            sensitivity: SENSITIVITY,
            min_interval: MIN_INTERVAL,
            energy_threshold: ENERGY_THRESHOLD,
            history_size: HISTORY_SIZE,
            rest_time: REST_TIME,
            num_lanes: NUM_LANES,
            base_c: BASE_C,
            variance_correction: VARIANCE_CORRECTION,
            floor_c: FLOOR_C,
            variance_floor: VARIANCE_FLOOR,
            lane_change_factor: LANE_CHANGE_FACTOR,
            lane_policy: LanePolicy::default(),
            band_policy: BandPolicy::default(),
            downmix: Downmix::default(),
            execution: TransformExecution::default(),
            queue_capacity: QUEUE_CAPACITY,
            seed: None,
        }
    }
}

impl DetectorConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        log::debug!("Loading detector configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Number of energy channels the detector tracks.
    pub fn bands(&self) -> usize {
        match self.energy_mode {
            EnergyMode::TimeDomain => 1,
            EnergyMode::SubBand => self.num_bands,
        }
    }

    /// Duration of one hop in seconds for a stream of the given shape.
    pub fn hop_seconds(&self, sample_rate: u32, channels: u16) -> f64 {
        let stride = (self.hop_length / channels.max(1) as usize).max(1);
        stride as f64 / sample_rate.max(1) as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size < 4 || !self.window_size.is_power_of_two() {
            return Err(ConfigError::InvalidTransformSize(self.window_size));
        }
        if self.hop_length == 0 {
            return Err(ConfigError::ZeroHop);
        }
        if self.history_size == 0 {
            return Err(ConfigError::ZeroHistory);
        }
        if self.num_lanes == 0 {
            return Err(ConfigError::ZeroLanes);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        positive("sensitivity", self.sensitivity)?;
        non_negative("energy_threshold", self.energy_threshold)?;
        non_negative("base_c", self.base_c)?;
        non_negative("variance_correction", self.variance_correction)?;
        non_negative("floor_c", self.floor_c)?;
        non_negative("variance_floor", self.variance_floor)?;
        non_negative("lane_change_factor", self.lane_change_factor)?;
        non_negative_time("min_interval", self.min_interval)?;
        non_negative_time("rest_time", self.rest_time)?;

        if self.energy_mode == EnergyMode::SubBand {
            let widths = band_widths(self.num_bands, self.first_band_width, self.total_band_width)?;
            let available = (self.window_size / 2) as f32;
            let total: f32 = widths.iter().sum();
            if total > available {
                return Err(ConfigError::BandLayout(format!(
                    "total band width {} exceeds the {} bins of a {}-point spectrum",
                    total, available, self.window_size
                )));
            }
        }

        Ok(())
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            reason: format!("expected a finite value > 0, got {}", value),
        })
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            reason: format!("expected a finite value >= 0, got {}", value),
        })
    }
}

fn non_negative_time(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            reason: format!("expected a finite number of seconds >= 0, got {}", value),
        })
    }
}
