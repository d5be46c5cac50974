//! Error types for configuration and chunk ingestion.
//!
//! Signal-level problems (silent bands, a zero baseline, non-finite energy) are
//! never errors: the detector treats them as "no onset this hop".

use thiserror::Error;

/// Contract violations caught when a component is built or reconfigured.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("transform size {0} must be a power of two and at least 4")]
    InvalidTransformSize(usize),

    #[error("number of bands must be greater than zero")]
    ZeroBands,

    #[error("history size must be greater than zero")]
    ZeroHistory,

    #[error("hop length must be greater than zero")]
    ZeroHop,

    #[error("number of lanes must be greater than zero")]
    ZeroLanes,

    #[error("queue capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("band layout: {0}")]
    BandLayout(String),

    #[error("parameter `{name}` is invalid: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("failed to read configuration: {0}")]
    Io(String),
}

/// Errors returned while feeding audio into a detector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectError {
    #[error("sample rate must be greater than zero")]
    ZeroSampleRate,

    #[error("channel count must be greater than zero")]
    ZeroChannels,

    #[error("number of lanes must be greater than zero")]
    ZeroLanes,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
