//! Per-hop energy extraction.

use crate::config::{DetectorConfig, EnergyMode};
use crate::error::ConfigError;
use crate::spectrum::{SpectrumTransform, SubBandPartitioner, WindowFunction};

/// Reduces one hop segment to one energy value per band.
pub trait EnergyExtractor: Send {
    fn bands(&self) -> usize;
    /// `segment` is exactly one window long; `energies` has `bands()` slots.
    fn extract(&mut self, segment: &[f32], energies: &mut [f32]);
    fn name(&self) -> &str;
}

/// Build the extractor described by `config`.
pub fn from_config(config: &DetectorConfig) -> Result<Box<dyn EnergyExtractor>, ConfigError> {
    Ok(match config.energy_mode {
        EnergyMode::TimeDomain => Box::new(TimeDomainEnergy::new(config.window_size)),
        EnergyMode::SubBand => Box::new(SubBandEnergy::new(config)?),
    })
}

/// Mean squared sample over the window. Skips the transform entirely.
pub struct TimeDomainEnergy {
    window_size: usize,
}

impl TimeDomainEnergy {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }
}

impl EnergyExtractor for TimeDomainEnergy {
    fn bands(&self) -> usize {
        1
    }

    fn extract(&mut self, segment: &[f32], energies: &mut [f32]) {
        let sum: f32 = segment.iter().map(|&x| x * x).sum();
        energies[0] = sum / self.window_size as f32;
    }

    fn name(&self) -> &str {
        "time-domain"
    }
}

/// Window, transform, then partition the spectrum into sub-bands.
pub struct SubBandEnergy {
    window: WindowFunction,
    transform: SpectrumTransform,
    partitioner: SubBandPartitioner,
    windowed: Vec<f32>,
}

impl SubBandEnergy {
    pub fn new(config: &DetectorConfig) -> Result<Self, ConfigError> {
        let transform = SpectrumTransform::new(config.window_size, config.execution)?;
        let partitioner = SubBandPartitioner::new(
            config.num_bands,
            config.first_band_width,
            config.total_band_width,
        )?;

        Ok(Self {
            window: WindowFunction::new(config.window_kind, config.window_size),
            transform,
            partitioner,
            windowed: vec![0.0; config.window_size],
        })
    }

    pub fn partitioner(&self) -> &SubBandPartitioner {
        &self.partitioner
    }
}

impl EnergyExtractor for SubBandEnergy {
    fn bands(&self) -> usize {
        self.partitioner.len()
    }

    fn extract(&mut self, segment: &[f32], energies: &mut [f32]) {
        self.window.apply(segment, &mut self.windowed);
        let spectrum = self.transform.transform(&self.windowed);
        self.partitioner.accumulate(spectrum, energies);
    }

    fn name(&self) -> &str {
        "sub-band"
    }
}
