//! Turns interleaved chunks into fixed-length mono hop segments.
//!
//! Chunks arrive in irregular bursts. Anything that does not yet make up a
//! full window (including a trailing partial frame) stays buffered until the
//! next chunk, so hop boundaries and timestamps do not depend on how the
//! stream was split.

use serde::{Deserialize, Serialize};

/// How interleaved channels are folded into one analysis channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Downmix {
    #[default]
    Average,
    FirstChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn mono(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1)
    }

    pub fn stereo(sample_rate: u32) -> Self {
        Self::new(sample_rate, 2)
    }
}

/// One delivery of interleaved samples normalized to `[-1, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct AudioChunk<'a> {
    pub samples: &'a [f32],
    pub format: StreamFormat,
    /// Absolute time in seconds of the first sample in `samples`.
    pub time_offset: f64,
}

impl<'a> AudioChunk<'a> {
    pub fn new(samples: &'a [f32], format: StreamFormat, time_offset: f64) -> Self {
        Self {
            samples,
            format,
            time_offset,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.format.sample_rate.max(1) as f64
    }
}

/// Continuous timeline the buffered frames are measured against.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    format: StreamFormat,
    time: f64,
    /// Complete frames received since `time`.
    received: u64,
    /// Frame index (since `time`) of `pending[0]`.
    first_pending: u64,
}

impl Anchor {
    fn frame_time(&self, frame: u64) -> f64 {
        self.time + frame as f64 / self.format.sample_rate as f64
    }
}

#[derive(Debug)]
pub struct SegmentFramer {
    window_size: usize,
    hop_length: usize,
    downmix: Downmix,
    pending: Vec<f32>,
    /// Interleaved samples of a frame that was split across chunks.
    partial_frame: Vec<f32>,
    /// Frames still to discard when the hop is longer than what was buffered.
    skip: usize,
    anchor: Option<Anchor>,
    stream_start: Option<f64>,
}

impl SegmentFramer {
    pub fn new(window_size: usize, hop_length: usize, downmix: Downmix) -> Self {
        Self {
            window_size,
            hop_length,
            downmix,
            pending: Vec::with_capacity(window_size * 2),
            partial_frame: Vec::new(),
            skip: 0,
            anchor: None,
            stream_start: None,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Change framing parameters. Buffered audio is kept.
    pub fn configure(&mut self, window_size: usize, hop_length: usize, downmix: Downmix) {
        self.window_size = window_size;
        self.hop_length = hop_length;
        self.downmix = downmix;
    }

    /// Forget all buffered audio and the stream timeline.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.partial_frame.clear();
        self.skip = 0;
        self.anchor = None;
        self.stream_start = None;
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.anchor.map(|a| a.format)
    }

    /// Absolute time of the first sample seen since the last [`clear`](Self::clear).
    pub fn stream_start(&self) -> Option<f64> {
        self.stream_start
    }

    /// Frames buffered but not yet consumed by a hop.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Hop stride in frames: the hop length counts interleaved samples.
    pub fn stride(&self) -> usize {
        let channels = self.format().map_or(1, |f| f.channels.max(1) as usize);
        (self.hop_length / channels).max(1)
    }

    pub fn push(&mut self, chunk: &AudioChunk<'_>) {
        self.reanchor_if_needed(chunk);

        let channels = chunk.format.channels.max(1) as usize;
        let mut samples = chunk.samples;

        if !self.partial_frame.is_empty() {
            let missing = channels - self.partial_frame.len();
            let take = missing.min(samples.len());
            self.partial_frame.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.partial_frame.len() == channels {
                let frame = std::mem::take(&mut self.partial_frame);
                self.push_frame(&frame);
            }
        }

        let mut frames = samples.chunks_exact(channels);
        for frame in &mut frames {
            self.push_frame(frame);
        }

        let rest = frames.remainder();
        if !rest.is_empty() {
            log::trace!("Buffering {} samples of a split frame", rest.len());
            self.partial_frame.extend_from_slice(rest);
        }
    }

    /// Copy the next hop segment into `segment` and return its start time.
    ///
    /// Without `flush` a hop is produced only when a whole window is
    /// buffered. With `flush` the remaining audio is emitted as truncated,
    /// zero-padded hops until nothing is left.
    pub fn next_hop(&mut self, flush: bool, segment: &mut Vec<f32>) -> Option<f64> {
        let anchor = self.anchor?;
        let available = self.pending.len();
        if available == 0 || (!flush && available < self.window_size) {
            return None;
        }

        let take = available.min(self.window_size);
        segment.clear();
        segment.extend_from_slice(&self.pending[..take]);
        segment.resize(self.window_size, 0.0);

        let start = anchor.frame_time(anchor.first_pending);
        self.advance();
        Some(start)
    }

    fn advance(&mut self) {
        let stride = self.stride();
        if self.pending.len() >= stride {
            self.pending.drain(..stride);
        } else {
            self.skip = stride - self.pending.len();
            self.pending.clear();
        }
        if let Some(anchor) = self.anchor.as_mut() {
            anchor.first_pending += stride as u64;
        }
    }

    fn push_frame(&mut self, frame: &[f32]) {
        if let Some(anchor) = self.anchor.as_mut() {
            anchor.received += 1;
        }
        if self.skip > 0 {
            self.skip -= 1;
            return;
        }

        let value = match self.downmix {
            Downmix::Average => frame.iter().sum::<f32>() / frame.len() as f32,
            Downmix::FirstChannel => frame[0],
        };
        self.pending.push(value);
    }

    fn reanchor_if_needed(&mut self, chunk: &AudioChunk<'_>) {
        let restart = match self.anchor {
            None => true,
            Some(anchor) if anchor.format != chunk.format => {
                log::warn!(
                    "Stream format changed from {:?} to {:?}; dropping {} buffered frames",
                    anchor.format,
                    chunk.format,
                    self.pending.len()
                );
                true
            }
            Some(anchor) => {
                let expected = anchor.frame_time(anchor.received);
                let frame = 1.0 / chunk.format.sample_rate as f64;
                if (chunk.time_offset - expected).abs() > frame {
                    log::warn!(
                        "Chunk starts at {:.6}s but the stream was at {:.6}s; re-anchoring",
                        chunk.time_offset,
                        expected
                    );
                    true
                } else {
                    false
                }
            }
        };

        if restart {
            self.pending.clear();
            self.partial_frame.clear();
            self.skip = 0;
            self.anchor = Some(Anchor {
                format: chunk.format,
                time: chunk.time_offset,
                received: 0,
                first_pending: 0,
            });
            if self.stream_start.is_none() {
                self.stream_start = Some(chunk.time_offset);
            }
        }
    }
}
