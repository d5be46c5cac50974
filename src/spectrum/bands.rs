//! Sub-band layout: a few contiguous bin ranges, narrow at the bottom of the
//! spectrum and widening linearly towards the top.

use crate::error::ConfigError;

/// Half-open bin range `[start, end)`. Edges may fall between bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub start: f32,
    pub end: f32,
}

impl Band {
    pub fn width(&self) -> f32 {
        self.end - self.start
    }

    pub fn contains(&self, bin: usize) -> bool {
        let bin = bin as f32;
        bin >= self.start && bin < self.end
    }
}

/// Widths `a * i + b` for `i` in `0..num_bands`, with `b = first_width` and
/// `a` chosen so the widths sum to `total_width`.
pub fn band_widths(
    num_bands: usize,
    first_width: f32,
    total_width: f32,
) -> Result<Vec<f32>, ConfigError> {
    if num_bands == 0 {
        return Err(ConfigError::ZeroBands);
    }
    if !first_width.is_finite() || first_width <= 0.0 {
        return Err(ConfigError::BandLayout(format!(
            "first band width must be finite and > 0, got {}",
            first_width
        )));
    }
    if !total_width.is_finite() || total_width < first_width * num_bands as f32 {
        return Err(ConfigError::BandLayout(format!(
            "total width {} cannot hold {} bands of at least {} bins",
            total_width, num_bands, first_width
        )));
    }

    if num_bands == 1 {
        return Ok(vec![total_width]);
    }

    let n = num_bands as f32;
    let slope = 2.0 * (total_width - first_width * n) / (n * (n - 1.0));

    Ok((0..num_bands)
        .map(|i| slope * i as f32 + first_width)
        .collect())
}

#[derive(Debug, Clone)]
pub struct SubBandPartitioner {
    bands: Vec<Band>,
}

impl SubBandPartitioner {
    pub fn new(num_bands: usize, first_width: f32, total_width: f32) -> Result<Self, ConfigError> {
        let widths = band_widths(num_bands, first_width, total_width)?;

        let mut start = 0.0;
        let bands = widths
            .iter()
            .map(|&w| {
                let band = Band {
                    start,
                    end: start + w,
                };
                start += w;
                band
            })
            .collect();

        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Sum `magnitude² / band_width` per band into `energies`.
    ///
    /// Bins past the last band are ignored.
    pub fn accumulate(&self, spectrum: &[f32], energies: &mut [f32]) {
        energies.fill(0.0);

        let mut band = 0;
        for (bin, &magnitude) in spectrum.iter().enumerate() {
            while band < self.bands.len() && bin as f32 >= self.bands[band].end {
                band += 1;
            }
            if band >= self.bands.len() {
                break;
            }

            energies[band] += magnitude * magnitude / self.bands[band].width();
        }
    }
}
