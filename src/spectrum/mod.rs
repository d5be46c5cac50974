//! Windowing, the radix-2 power spectrum, and sub-band partitioning.

pub mod bands;
pub mod transform;
pub mod window;

pub use bands::{Band, SubBandPartitioner};
pub use transform::{SpectrumTransform, TransformExecution};
pub use window::{WindowFunction, WindowKind};
