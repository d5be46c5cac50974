//! Streaming onset detector.
//!
//! Per hop, every band's energy is compared against a rolling baseline of the
//! last `history_size` hops:
//!
//! ```text
//! C     = max(base_c - variance / average² * variance_correction, floor_c)
//! fires = E > energy_threshold
//!         && E > sensitivity * C * average
//!         && t - last_emitted > min_interval
//!         && variance > sensitivity * variance_floor * average²   (sub-band only)
//! ```
//!
//! Nothing fires until `history_size` hops have been seen or while the hop is
//! within `rest_time` of the stream start. All state survives between
//! [`OnsetDetector::generate`] calls; only [`OnsetDetector::clear`] resets it.

use serde::{Deserialize, Serialize};

use super::energy::{self, EnergyExtractor};
use super::history::{HistoryBuffer, HistoryStats};
use super::lanes::{LaneAssigner, LaneContext};
use crate::audio::processor::{AudioChunk, SegmentFramer};
use crate::config::{DetectorConfig, EnergyMode};
use crate::error::{ConfigError, DetectError};
use crate::queue::{note_queue, NoteReceiver, NoteSender, OnsetEvent};

/// How bands that qualify in the same hop are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandPolicy {
    /// Bands are checked low to high; the first one that fires wins and the
    /// debounce interval is shared by all bands. At most one event per hop.
    #[default]
    FirstQualifying,
    /// Every band is checked and debounced on its own.
    Independent,
}

/// Everything the detector carries from one hop to the next.
#[derive(Debug, Clone)]
pub struct DetectorState {
    histories: Vec<HistoryBuffer>,
    hops: u64,
    last_emitted_time: f64,
    band_last_emitted: Vec<f64>,
    last_lane: Option<usize>,
    last_band: Option<usize>,
    last_energy: f32,
}

impl DetectorState {
    pub fn new(bands: usize, history_size: usize) -> Self {
        Self {
            histories: (0..bands).map(|_| HistoryBuffer::new(history_size)).collect(),
            hops: 0,
            last_emitted_time: f64::NEG_INFINITY,
            band_last_emitted: vec![f64::NEG_INFINITY; bands],
            last_lane: None,
            last_band: None,
            last_energy: 0.0,
        }
    }

    pub fn clear(&mut self) {
        for history in &mut self.histories {
            history.clear();
        }
        self.hops = 0;
        self.last_emitted_time = f64::NEG_INFINITY;
        self.band_last_emitted.fill(f64::NEG_INFINITY);
        self.last_lane = None;
        self.last_band = None;
        self.last_energy = 0.0;
    }

    /// Hops processed since creation or the last clear.
    pub fn hops(&self) -> u64 {
        self.hops
    }

    pub fn is_warm(&self) -> bool {
        self.histories
            .first()
            .is_some_and(|h| self.hops >= h.capacity() as u64)
    }

    pub fn last_emitted_time(&self) -> Option<f64> {
        self.last_emitted_time
            .is_finite()
            .then_some(self.last_emitted_time)
    }

    pub fn last_lane(&self) -> Option<usize> {
        self.last_lane
    }

    pub fn history(&self, band: usize) -> Option<&HistoryBuffer> {
        self.histories.get(band)
    }

    fn last_emission(&self) -> Option<(usize, usize, f32)> {
        match (self.last_lane, self.last_band) {
            (Some(lane), Some(band)) => Some((lane, band, self.last_energy)),
            _ => None,
        }
    }
}

pub struct OnsetDetector {
    config: DetectorConfig,
    framer: SegmentFramer,
    extractor: Box<dyn EnergyExtractor>,
    lanes: LaneAssigner,
    state: DetectorState,
    sender: NoteSender,
    segment: Vec<f32>,
    energies: Vec<f32>,
}

impl OnsetDetector {
    /// Build a detector that emits into `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(config: DetectorConfig, sender: NoteSender) -> Result<Self, ConfigError> {
        config.validate()?;

        let extractor = energy::from_config(&config)?;
        let bands = extractor.bands();

        log::debug!(
            "Onset detector: {} energy over {} band(s), window {}, hop {}, history {}",
            extractor.name(),
            bands,
            config.window_size,
            config.hop_length,
            config.history_size
        );

        Ok(Self {
            framer: SegmentFramer::new(config.window_size, config.hop_length, config.downmix),
            lanes: LaneAssigner::new(config.lane_policy, config.lane_change_factor, config.seed),
            state: DetectorState::new(bands, config.history_size),
            segment: Vec::with_capacity(config.window_size),
            energies: vec![0.0; bands],
            extractor,
            sender,
            config,
        })
    }

    /// Build a detector together with a queue of `config.queue_capacity`.
    pub fn with_queue(config: DetectorConfig) -> Result<(Self, NoteReceiver), ConfigError> {
        let (sender, receiver) = note_queue(config.queue_capacity);
        Ok((Self::new(config, sender)?, receiver))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Events lost because the consumer let the queue fill up.
    pub fn dropped_events(&self) -> u64 {
        self.sender.dropped()
    }

    /// Feed one chunk and emit the onsets of every hop it completes.
    ///
    /// `chunk.time_offset` is the absolute time of its first sample. Audio
    /// that does not complete a window stays buffered for the next call.
    /// Returns the number of events pushed to the queue.
    pub fn generate(
        &mut self,
        chunk: &AudioChunk<'_>,
        num_lanes: usize,
    ) -> Result<usize, DetectError> {
        check_chunk(chunk, num_lanes)?;

        self.framer.push(chunk);
        let emitted = self.drain_hops(false, num_lanes);

        log::debug!(
            "Chunk at {:.3}s ({} frames): {} event(s), {} frames buffered",
            chunk.time_offset,
            chunk.frames(),
            emitted,
            self.framer.pending_frames()
        );
        Ok(emitted)
    }

    /// Process whatever is still buffered as truncated, zero-padded hops.
    /// Call at the end of a finite stream.
    pub fn flush(&mut self, num_lanes: usize) -> Result<usize, DetectError> {
        if num_lanes == 0 {
            return Err(DetectError::ZeroLanes);
        }
        let emitted = self.drain_hops(true, num_lanes);
        log::debug!("Flushed tail: {} event(s)", emitted);
        Ok(emitted)
    }

    /// Reset history, debounce, lane memory and buffered audio. Use when a
    /// session restarts; events already queued are left for the consumer.
    pub fn clear(&mut self) {
        self.framer.clear();
        self.state.clear();
        self.lanes.reset(self.config.seed);
        log::debug!("Onset detector cleared");
    }

    /// Swap in a new configuration. Takes effect from the next hop.
    ///
    /// Changing the window, band layout or energy mode rebuilds the transform
    /// tables. Changing the band count or history size also restarts
    /// warm-up, since the old history no longer fits.
    pub fn reconfigure(&mut self, config: DetectorConfig) -> Result<(), ConfigError> {
        config.validate()?;

        if extractor_changed(&self.config, &config) {
            self.extractor = energy::from_config(&config)?;
        }

        let bands = self.extractor.bands();
        if bands != self.energies.len() || config.history_size != self.config.history_size {
            log::debug!(
                "History reshaped to {} band(s) x {} hops; warming up again",
                bands,
                config.history_size
            );
            self.state = DetectorState::new(bands, config.history_size);
            self.energies = vec![0.0; bands];
        }

        self.framer
            .configure(config.window_size, config.hop_length, config.downmix);
        self.lanes
            .configure(config.lane_policy, config.lane_change_factor);
        if config.seed != self.config.seed {
            self.lanes.reset(config.seed);
        }
        if config.queue_capacity != self.config.queue_capacity {
            log::warn!("queue_capacity only applies to newly created queues");
        }

        self.config = config;
        Ok(())
    }

    fn drain_hops(&mut self, flush: bool, num_lanes: usize) -> usize {
        let Some(format) = self.framer.format() else {
            return 0;
        };

        let mut emitted = 0;
        while let Some(start) = self.framer.next_hop(flush, &mut self.segment) {
            let time = start + self.config.window_size as f64 / 2.0 / format.sample_rate as f64;
            emitted += self.process_hop(time, num_lanes);
        }
        emitted
    }

    fn process_hop(&mut self, time: f64, num_lanes: usize) -> usize {
        self.extractor.extract(&self.segment, &mut self.energies);

        let warm = self.state.hops >= self.config.history_size as u64;
        let stream_start = self.framer.stream_start().unwrap_or(time);
        let resting = time - stream_start < self.config.rest_time;

        let mut emitted = 0;
        if warm && !resting {
            for band in 0..self.energies.len() {
                let energy = self.energies[band];
                let stats = self.state.histories[band].stats();
                if !self.fires(band, energy, stats, time) {
                    continue;
                }

                let ctx = LaneContext {
                    band,
                    energy,
                    average: stats.average,
                    variance: stats.variance,
                };
                let lane = self
                    .lanes
                    .assign(&ctx, self.state.last_emission(), num_lanes);

                log::trace!(
                    "Onset at {:.4}s: band {} E={:.3e} avg={:.3e} var={:.3e} -> lane {}",
                    time,
                    band,
                    energy,
                    stats.average,
                    stats.variance,
                    lane
                );

                self.sender.push(OnsetEvent { time, lane });
                self.state.last_emitted_time = time;
                self.state.band_last_emitted[band] = time;
                self.state.last_lane = Some(lane);
                self.state.last_band = Some(band);
                self.state.last_energy = energy;
                emitted += 1;

                if self.config.band_policy == BandPolicy::FirstQualifying {
                    break;
                }
            }
        }

        for (history, &energy) in self.state.histories.iter_mut().zip(self.energies.iter()) {
            history.push(if energy.is_finite() { energy } else { 0.0 });
        }
        self.state.hops += 1;

        emitted
    }

    fn fires(&self, band: usize, energy: f32, stats: HistoryStats, time: f64) -> bool {
        let HistoryStats { average, variance } = stats;
        if !energy.is_finite() || !variance.is_finite() || !average.is_finite() || average <= 0.0 {
            return false;
        }

        let average_sq = average * average;
        let spread = variance / average_sq;
        if !spread.is_finite() {
            return false;
        }

        let c = (self.config.base_c - spread * self.config.variance_correction)
            .max(self.config.floor_c);

        let last = match self.config.band_policy {
            BandPolicy::FirstQualifying => self.state.last_emitted_time,
            BandPolicy::Independent => self.state.band_last_emitted[band],
        };

        let varied = match self.config.energy_mode {
            EnergyMode::TimeDomain => true,
            EnergyMode::SubBand => {
                variance > self.config.sensitivity * self.config.variance_floor * average_sq
            }
        };

        energy > self.config.energy_threshold
            && energy > self.config.sensitivity * c * average
            && time - last > self.config.min_interval
            && varied
    }
}

fn check_chunk(chunk: &AudioChunk<'_>, num_lanes: usize) -> Result<(), DetectError> {
    if chunk.format.sample_rate == 0 {
        return Err(DetectError::ZeroSampleRate);
    }
    if chunk.format.channels == 0 {
        return Err(DetectError::ZeroChannels);
    }
    if num_lanes == 0 {
        return Err(DetectError::ZeroLanes);
    }
    Ok(())
}

fn extractor_changed(old: &DetectorConfig, new: &DetectorConfig) -> bool {
    old.energy_mode != new.energy_mode
        || old.window_size != new.window_size
        || old.window_kind != new.window_kind
        || old.execution != new.execution
        || old.num_bands != new.num_bands
        || old.first_band_width != new.first_band_width
        || old.total_band_width != new.total_band_width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::processor::StreamFormat;
    use crate::onset::lanes::LanePolicy;

    const RATE: u32 = 1000;

    /// Mono time-domain detector where window == hop == 16 frames (16 ms).
    fn config() -> DetectorConfig {
        DetectorConfig {
            window_size: 16,
            hop_length: 16,
            energy_mode: EnergyMode::TimeDomain,
            history_size: 4,
            sensitivity: 1.5,
            min_interval: 0.0,
            energy_threshold: 1e-3,
            rest_time: 0.0,
            seed: Some(5),
            ..Default::default()
        }
    }

    /// One hop of silence or a full-scale constant per entry.
    fn pattern(hops: &[bool]) -> Vec<f32> {
        hops.iter()
            .flat_map(|&loud| std::iter::repeat(if loud { 0.9 } else { 0.0 }).take(16))
            .collect()
    }

    fn run(config: DetectorConfig, samples: &[f32]) -> Vec<OnsetEvent> {
        let (mut detector, mut rx) = OnsetDetector::with_queue(config).unwrap();
        detector
            .generate(&AudioChunk::new(samples, StreamFormat::mono(RATE), 0.0), 4)
            .unwrap();
        rx.drain()
    }

    #[test]
    fn silence_never_fires() {
        let events = run(config(), &vec![0.0; 16 * 40]);
        assert!(events.is_empty());
    }

    #[test]
    fn spike_after_baseline_fires_once() {
        let mut hops = vec![false; 12];
        hops[5] = true; // gives the baseline something to average
        hops[8] = true;
        let events = run(config(), &pattern(&hops));

        assert_eq!(events.len(), 1);
        let expected = (8.0 * 16.0 + 8.0) / RATE as f64;
        assert!((events[0].time - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_baseline_is_degenerate() {
        // The first loud hop after pure silence has average == 0: no event.
        let mut hops = vec![false; 8];
        hops[6] = true;
        assert!(run(config(), &pattern(&hops)).is_empty());
    }

    #[test]
    fn history_survives_between_chunks() {
        let mut hops = vec![false; 12];
        hops[5] = true;
        hops[8] = true;
        let samples = pattern(&hops);

        let (mut detector, mut rx) = OnsetDetector::with_queue(config()).unwrap();
        let format = StreamFormat::mono(RATE);
        let (a, b) = samples.split_at(16 * 5 + 3);
        detector.generate(&AudioChunk::new(a, format, 0.0), 4).unwrap();
        detector
            .generate(&AudioChunk::new(b, format, a.len() as f64 / RATE as f64), 4)
            .unwrap();

        assert_eq!(rx.drain(), run(config(), &samples));
    }

    #[test]
    fn clear_restarts_warm_up() {
        let mut hops = vec![false; 12];
        hops[5] = true;
        hops[8] = true;
        let samples = pattern(&hops);
        let format = StreamFormat::mono(RATE);

        let (mut detector, mut rx) = OnsetDetector::with_queue(config()).unwrap();
        detector.generate(&AudioChunk::new(&samples, format, 0.0), 4).unwrap();
        assert_eq!(rx.drain().len(), 1);
        assert!(detector.state().is_warm());

        detector.clear();
        assert_eq!(detector.state().hops(), 0);
        assert_eq!(detector.state().last_emitted_time(), None);

        // Only four loud-ish hops: not enough to warm up again.
        detector
            .generate(&AudioChunk::new(&pattern(&[false, true, false, true]), format, 0.0), 4)
            .unwrap();
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn rejects_bad_chunks() {
        let (mut detector, _rx) = OnsetDetector::with_queue(config()).unwrap();
        let samples = [0.0f32; 4];
        assert_eq!(
            detector.generate(&AudioChunk::new(&samples, StreamFormat::new(0, 1), 0.0), 4),
            Err(DetectError::ZeroSampleRate)
        );
        assert_eq!(
            detector.generate(&AudioChunk::new(&samples, StreamFormat::new(RATE, 0), 0.0), 4),
            Err(DetectError::ZeroChannels)
        );
        assert_eq!(
            detector.generate(&AudioChunk::new(&samples, StreamFormat::mono(RATE), 0.0), 0),
            Err(DetectError::ZeroLanes)
        );
    }

    #[test]
    fn nan_input_does_not_fire_or_poison_history() {
        let mut samples = pattern(&[
            false, false, false, false, false, true, false, false, true, false,
        ]);
        samples[6 * 16] = f32::NAN;

        let events = run(config(), &samples);
        assert_eq!(events.len(), 1);
        assert!((events[0].time - 0.136).abs() < 1e-9);
    }

    #[test]
    fn independent_bands_can_share_a_hop() {
        let config = DetectorConfig {
            energy_mode: EnergyMode::SubBand,
            window_size: 64,
            hop_length: 64,
            num_bands: 2,
            first_band_width: 4.0,
            total_band_width: 16.0,
            history_size: 4,
            sensitivity: 1.0,
            energy_threshold: 0.0,
            min_interval: 0.0,
            rest_time: 0.0,
            band_policy: BandPolicy::Independent,
            lane_policy: LanePolicy::Band,
            seed: Some(1),
            ..Default::default()
        };

        // Broadband clicks: one impulse per hop, loud every fourth hop.
        let mut samples = vec![0.0f32; 64 * 12];
        for hop in 0..12 {
            samples[hop * 64 + 32] = if hop % 4 == 1 { 1.0 } else { 0.05 };
        }

        let events = run(config, &samples);
        assert!(!events.is_empty());
        let first = events[0].time;
        let same_hop: Vec<_> = events.iter().filter(|e| e.time == first).collect();
        assert_eq!(same_hop.len(), 2);
        assert_eq!(same_hop[0].lane, 0);
        assert_eq!(same_hop[1].lane, 1);
    }

    /// `hops` blocks of `len` frames; every third block is loud.
    fn every_third(hops: usize, len: usize) -> Vec<f32> {
        (0..hops)
            .flat_map(|k| std::iter::repeat(if k % 3 == 0 { 0.9 } else { 0.0 }).take(len))
            .collect()
    }

    #[test]
    fn reconfigure_applies_from_the_next_hop() {
        let (mut detector, mut rx) = OnsetDetector::with_queue(config()).unwrap();
        let format = StreamFormat::mono(RATE);
        let mut frames = 0;
        let mut feed = |detector: &mut OnsetDetector, samples: &[f32]| {
            let offset = frames as f64 / RATE as f64;
            frames += samples.len();
            detector
                .generate(&AudioChunk::new(samples, format, offset), 4)
                .unwrap();
        };

        feed(&mut detector, &every_third(30, 16));
        assert!(!rx.drain().is_empty());

        let mut deaf = config();
        deaf.sensitivity = 1000.0;
        detector.reconfigure(deaf).unwrap();

        // Leave half a hop buffered across the next reconfiguration.
        let mut quiet_tail = every_third(15, 16);
        quiet_tail.extend([0.0; 8]);
        feed(&mut detector, &quiet_tail);
        assert!(rx.drain().is_empty());
        assert_eq!(detector.state().hops(), 45);

        let mut wider = config();
        wider.window_size = 32;
        wider.hop_length = 32;
        detector.reconfigure(wider).unwrap();
        assert_eq!(detector.state().hops(), 45);

        feed(&mut detector, &every_third(30, 32));
        let resumed = rx.drain();
        assert!(!resumed.is_empty());
        assert!(resumed.iter().all(|e| e.time > 0.728));
        assert_eq!(detector.state().hops(), 75);
    }

    #[test]
    fn reconfigure_rebuilds_history_when_reshaped() {
        let (mut detector, _rx) = OnsetDetector::with_queue(config()).unwrap();
        let format = StreamFormat::mono(RATE);
        detector
            .generate(&AudioChunk::new(&vec![0.1; 16 * 6], format, 0.0), 4)
            .unwrap();
        assert_eq!(detector.state().hops(), 6);

        let mut tuned = config();
        tuned.sensitivity = 2.0;
        detector.reconfigure(tuned).unwrap();
        assert_eq!(detector.state().hops(), 6);

        let mut reshaped = config();
        reshaped.history_size = 8;
        detector.reconfigure(reshaped).unwrap();
        assert_eq!(detector.state().hops(), 0);

        let mut invalid = config();
        invalid.window_size = 12;
        assert!(detector.reconfigure(invalid).is_err());
        assert_eq!(detector.config().history_size, 8);
    }
}
