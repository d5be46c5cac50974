//! # beatlane
//!
//! Turns a stream of audio samples into lane-assigned note events for a
//! rhythm-game note field.
//!
//! Audio arrives as complete clips or as irregular chunks from a live source.
//! Each hop is windowed and transformed into a power spectrum, split into a
//! few sub-bands, and compared against a rolling per-band baseline. Hops that
//! stand out become [`OnsetEvent`]s on a single-consumer queue.
//!
//! ```text
//! chunks -> SegmentFramer -> WindowFunction x SpectrumTransform -> SubBandPartitioner
//!        -> OnsetDetector -> NoteSender ==> NoteReceiver
//! ```
//!
//! ## Streaming
//!
//! ```no_run
//! use beatlane::{AudioChunk, DetectorConfig, OnsetDetector, StreamFormat};
//!
//! let (mut detector, mut notes) = OnsetDetector::with_queue(DetectorConfig::default())?;
//! let format = StreamFormat::stereo(48_000);
//!
//! let chunk: Vec<f32> = vec![0.0; 4800];
//! detector.generate(&AudioChunk::new(&chunk, format, 0.0), 4)?;
//! for event in notes.drain() {
//!     println!("{:.3}s lane {}", event.time, event.lane);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod onset;
pub mod queue;
pub mod spectrum;

pub use audio::{AudioChunk, Downmix, StreamFormat};
pub use config::{DetectorConfig, EnergyMode};
pub use error::{ConfigError, DetectError};
pub use onset::{BandPolicy, DetectorState, LanePolicy, OnsetDetector};
pub use queue::{note_queue, NoteReceiver, NoteSender, OnsetEvent};
pub use spectrum::{
    SpectrumTransform, SubBandPartitioner, TransformExecution, WindowFunction, WindowKind,
};

/// Analyse a complete clip and return its events in time order.
///
/// The clip is treated as a stream starting at time zero; the tail that does
/// not fill a whole window is analysed zero-padded. Lanes come from
/// `config.num_lanes`.
///
/// # Errors
///
/// Returns [`DetectError`] if `config` is invalid or `format` has a zero
/// sample rate or channel count.
pub fn analyze_clip(
    samples: &[f32],
    format: StreamFormat,
    config: DetectorConfig,
) -> Result<Vec<OnsetEvent>, DetectError> {
    let channels = format.channels.max(1) as usize;
    let stride = (config.hop_length / channels).max(1);
    let hops = samples.len() / channels / stride + 2;
    let capacity = config.queue_capacity.max(hops * config.bands().max(1));

    let num_lanes = config.num_lanes;
    let (sender, mut receiver) = note_queue(capacity);
    let mut detector = OnsetDetector::new(config, sender)?;

    detector.generate(&AudioChunk::new(samples, format, 0.0), num_lanes)?;
    detector.flush(num_lanes)?;

    let events = receiver.drain();
    log::debug!(
        "Analysed {:.2}s clip: {} events",
        samples.len() as f64 / channels as f64 / format.sample_rate.max(1) as f64,
        events.len()
    );
    Ok(events)
}
