//! Radix-2 decimation-in-time power spectrum.
//!
//! The real input is folded into pairs of complex values: the first pass reads
//! two bit-reversed samples per slot and writes their sum and difference, which
//! are the size-2 DFTs that seed the butterfly stages. Each slot holds two
//! adjacent complex bins so one butterfly entry rotates two values at once.
//!
//! Stages `m = 4, 8, .., N` run strictly in order. Within a stage every
//! butterfly touches a disjoint pair of slots, so with
//! [`TransformExecution::Parallel`] a stage fans out over the rayon pool and
//! the next stage starts only after the whole stage has joined.

use std::f64::consts::PI;

use rayon::prelude::*;
use rustfft::num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Minimum number of slots handed to one rayon task.
const PARALLEL_GRAIN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformExecution {
    Sequential,
    #[default]
    Parallel,
}

type Slot = [Complex32; 2];

/// Twiddle factors for bins `j` and `j + 1` of one butterfly entry.
#[derive(Debug, Clone, Copy)]
struct Twiddle([Complex32; 2]);

#[derive(Debug)]
pub struct SpectrumTransform {
    size: usize,
    /// Input indices `(rev(2i), rev(2i + 1))` for slot `i`.
    permutation: Vec<(usize, usize)>,
    /// One table per stage; stage `s` has `m / 4` entries with `m = 4 << s`.
    twiddles: Vec<Vec<Twiddle>>,
    scratch: Vec<Slot>,
    spectrum: Vec<f32>,
    execution: TransformExecution,
}

impl SpectrumTransform {
    /// Build the tables for an `size`-point transform.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTransformSize`] unless `size` is a power
    /// of two and at least 4.
    pub fn new(size: usize, execution: TransformExecution) -> Result<Self, ConfigError> {
        if size < 4 || !size.is_power_of_two() {
            return Err(ConfigError::InvalidTransformSize(size));
        }

        let log_size = size.trailing_zeros();

        let permutation: Vec<(usize, usize)> = (0..size / 2)
            .map(|i| {
                (
                    reverse_bits(2 * i, log_size),
                    reverse_bits(2 * i + 1, log_size),
                )
            })
            .collect();

        let mut twiddles: Vec<Vec<Twiddle>> = Vec::with_capacity(log_size as usize - 1);
        let mut m = 4;
        while m <= size {
            let stage = (0..m / 2)
                .step_by(2)
                .map(|j| Twiddle([twiddle(j, m), twiddle(j + 1, m)]))
                .collect();
            twiddles.push(stage);
            m <<= 1;
        }

        log::debug!(
            "Built {}-point transform: {} stages, {:?} execution",
            size,
            twiddles.len(),
            execution
        );

        Ok(Self {
            size,
            permutation,
            twiddles,
            scratch: vec![[Complex32::new(0.0, 0.0); 2]; size / 2],
            spectrum: vec![0.0; size],
            execution,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn execution(&self) -> TransformExecution {
        self.execution
    }

    pub fn set_execution(&mut self, execution: TransformExecution) {
        self.execution = execution;
    }

    /// Transform `segment` and return `size / 2` magnitudes scaled by `2 / N`.
    ///
    /// A segment shorter than the transform is zero-padded; extra samples are
    /// ignored.
    pub fn transform(&mut self, segment: &[f32]) -> &[f32] {
        let scale = 2.0 / self.size as f32;

        match self.execution {
            TransformExecution::Sequential => {
                for (slot, &(a, b)) in self.scratch.iter_mut().zip(self.permutation.iter()) {
                    first_pass(slot, segment, a, b);
                }

                for (stage, table) in self.twiddles.iter().enumerate() {
                    let half = table.len();
                    debug_assert_eq!(half, 1 << stage);
                    for block in self.scratch.chunks_mut(2 * half) {
                        let (lo, hi) = block.split_at_mut(half);
                        for ((e, o), w) in lo.iter_mut().zip(hi.iter_mut()).zip(table.iter()) {
                            butterfly(e, o, w);
                        }
                    }
                }

                for (out, slot) in self.spectrum.chunks_mut(2).zip(self.scratch.iter()) {
                    postprocess(out, slot, scale);
                }
            }
            TransformExecution::Parallel => {
                self.scratch
                    .par_iter_mut()
                    .with_min_len(PARALLEL_GRAIN)
                    .zip(self.permutation.par_iter())
                    .for_each(|(slot, &(a, b))| first_pass(slot, segment, a, b));

                for table in &self.twiddles {
                    let half = table.len();
                    self.scratch.par_chunks_mut(2 * half).for_each(|block| {
                        let (lo, hi) = block.split_at_mut(half);
                        lo.par_iter_mut()
                            .with_min_len(PARALLEL_GRAIN)
                            .zip(hi.par_iter_mut())
                            .zip(table.par_iter())
                            .for_each(|((e, o), w)| butterfly(e, o, w));
                    });
                }

                self.spectrum
                    .par_chunks_mut(2)
                    .with_min_len(PARALLEL_GRAIN)
                    .zip(self.scratch.par_iter())
                    .for_each(|(out, slot)| postprocess(out, slot, scale));
            }
        }

        &self.spectrum[..self.size / 2]
    }

    /// Magnitudes from the most recent call to [`transform`](Self::transform).
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum[..self.size / 2]
    }
}

fn reverse_bits(x: usize, bits: u32) -> usize {
    x.reverse_bits() >> (usize::BITS - bits)
}

fn twiddle(j: usize, m: usize) -> Complex32 {
    let angle = -2.0 * PI * j as f64 / m as f64;
    Complex32::new(angle.cos() as f32, angle.sin() as f32)
}

#[inline]
fn first_pass(slot: &mut Slot, segment: &[f32], a: usize, b: usize) {
    let a1 = segment.get(a).copied().unwrap_or(0.0);
    let a2 = segment.get(b).copied().unwrap_or(0.0);
    *slot = [Complex32::new(a1 + a2, 0.0), Complex32::new(a1 - a2, 0.0)];
}

#[inline]
fn butterfly(even: &mut Slot, odd: &mut Slot, w: &Twiddle) {
    for k in 0..2 {
        let e = even[k];
        let o = w.0[k] * odd[k];
        even[k] = e + o;
        odd[k] = e - o;
    }
}

#[inline]
fn postprocess(out: &mut [f32], slot: &Slot, scale: f32) {
    out[0] = slot[0].norm() * scale;
    out[1] = slot[1].norm() * scale;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rustfft::FftPlanner;

    fn naive_magnitudes(input: &[f32]) -> Vec<f32> {
        let n = input.len();
        (0..n / 2)
            .map(|k| {
                let (mut re, mut im) = (0.0f64, 0.0f64);
                for (t, &x) in input.iter().enumerate() {
                    let angle = -2.0 * PI * (k * t % n) as f64 / n as f64;
                    re += x as f64 * angle.cos();
                    im += x as f64 * angle.sin();
                }
                ((re * re + im * im).sqrt() * 2.0 / n as f64) as f32
            })
            .collect()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        let peak = expected.iter().cloned().fold(0.0f32, f32::max);
        let tolerance = 1e-3 * peak.max(1e-3);
        for (k, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
            assert!(
                (a - e).abs() <= tolerance,
                "bin {}: got {}, expected {} (tolerance {})",
                k,
                a,
                e,
                tolerance
            );
        }
    }

    #[test]
    fn rejects_invalid_sizes() {
        for size in [0, 1, 2, 3, 6, 100, 1000] {
            assert_eq!(
                SpectrumTransform::new(size, TransformExecution::Sequential).unwrap_err(),
                ConfigError::InvalidTransformSize(size)
            );
        }
    }

    #[test]
    fn smallest_transform() {
        let mut fft = SpectrumTransform::new(4, TransformExecution::Sequential).unwrap();
        let input = [1.0, 2.0, 3.0, 4.0];
        let spectrum = fft.transform(&input).to_vec();
        assert_close(&spectrum, &naive_magnitudes(&input));
    }

    #[test]
    fn matches_naive_dft_on_random_input() {
        let mut rng = StdRng::seed_from_u64(42);
        for size in [64, 256, 1024, 4096] {
            let input: Vec<f32> = (0..size).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let mut fft = SpectrumTransform::new(size, TransformExecution::Parallel).unwrap();
            let spectrum = fft.transform(&input).to_vec();
            assert_close(&spectrum, &naive_magnitudes(&input));
        }
    }

    #[test]
    fn sinusoid_peaks_at_its_bin() {
        let bin = 19;
        for size in [64, 256, 1024, 4096] {
            let input: Vec<f32> = (0..size)
                .map(|t| (2.0 * PI * bin as f64 * t as f64 / size as f64).sin() as f32 * 0.5)
                .collect();

            let mut fft = SpectrumTransform::new(size, TransformExecution::Sequential).unwrap();
            let spectrum = fft.transform(&input).to_vec();

            assert_abs_diff_eq!(spectrum[bin], 0.5, epsilon = 1e-4);
            assert_close(&spectrum, &naive_magnitudes(&input));
        }
    }

    #[test]
    fn matches_rustfft() {
        let size = 2048;
        let mut rng = StdRng::seed_from_u64(3);
        let input: Vec<f32> = (0..size).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let mut buffer: Vec<Complex32> = input.iter().map(|&x| Complex32::new(x, 0.0)).collect();
        FftPlanner::<f32>::new()
            .plan_fft_forward(size)
            .process(&mut buffer);
        let expected: Vec<f32> = buffer[..size / 2]
            .iter()
            .map(|c| c.norm() * 2.0 / size as f32)
            .collect();

        let mut fft = SpectrumTransform::new(size, TransformExecution::Parallel).unwrap();
        assert_close(fft.transform(&input), &expected);
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let size = 1024;
        let mut rng = StdRng::seed_from_u64(11);
        let input: Vec<f32> = (0..size).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let mut seq = SpectrumTransform::new(size, TransformExecution::Sequential).unwrap();
        let mut par = SpectrumTransform::new(size, TransformExecution::Parallel).unwrap();

        let a = seq.transform(&input).to_vec();
        let b = par.transform(&input).to_vec();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-7);
        }
    }

    #[test]
    fn instance_is_reusable_and_zero_pads() {
        let size = 64;
        let mut fft = SpectrumTransform::new(size, TransformExecution::Sequential).unwrap();

        let loud: Vec<f32> = (0..size).map(|t| (t as f32 * 0.3).sin()).collect();
        fft.transform(&loud);

        // A short segment must not see leftovers from the previous call.
        let short = [0.25f32; 10];
        let mut padded = short.to_vec();
        padded.resize(size, 0.0);

        let spectrum = fft.transform(&short).to_vec();
        assert_close(&spectrum, &naive_magnitudes(&padded));
        assert_eq!(fft.spectrum(), spectrum.as_slice());
    }

    #[test]
    fn silence_is_exactly_zero() {
        let mut fft = SpectrumTransform::new(128, TransformExecution::Parallel).unwrap();
        assert!(fft.transform(&[0.0; 128]).iter().all(|&m| m == 0.0));
    }
}
