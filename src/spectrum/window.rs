use apodize::{blackman_iter, hamming_iter, hanning_iter};
use serde::{Deserialize, Serialize};

/// Taper applied to a segment before it is transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// `0.54 - 0.46 * cos(2πi / (N - 1))`
    #[default]
    Hamming,
    Hann,
    Blackman,
    Rectangular,
}

/// Precomputed window coefficients, built once and reused every hop.
#[derive(Debug, Clone)]
pub struct WindowFunction {
    kind: WindowKind,
    coefficients: Vec<f32>,
}

impl WindowFunction {
    pub fn new(kind: WindowKind, size: usize) -> Self {
        let coefficients: Vec<f32> = match kind {
            WindowKind::Hamming => hamming_iter(size).map(|x| x as f32).collect(),
            WindowKind::Hann => hanning_iter(size).map(|x| x as f32).collect(),
            WindowKind::Blackman => blackman_iter(size).map(|x| x as f32).collect(),
            WindowKind::Rectangular => vec![1.0; size],
        };

        Self { kind, coefficients }
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    /// Multiply `samples` by the window into `out`. Missing samples are zero.
    pub fn apply(&self, samples: &[f32], out: &mut [f32]) {
        for (i, (o, &w)) in out.iter_mut().zip(self.coefficients.iter()).enumerate() {
            *o = samples.get(i).copied().unwrap_or(0.0) * w;
        }
    }
}
