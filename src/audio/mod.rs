#[cfg(feature = "capture")]
pub mod devices;
pub mod processor;

pub use processor::{AudioChunk, Downmix, SegmentFramer, StreamFormat};
