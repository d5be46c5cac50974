//! Streaming onset detection: rolling history, energy extraction, thresholding
//! and lane assignment.

pub mod detector;
pub mod energy;
pub mod history;
pub mod lanes;

pub use detector::{BandPolicy, DetectorState, OnsetDetector};
pub use energy::{EnergyExtractor, SubBandEnergy, TimeDomainEnergy};
pub use history::{HistoryBuffer, HistoryStats};
pub use lanes::{LaneAssigner, LaneContext, LanePolicy};
