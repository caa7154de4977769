//! Error types for rack edits and configuration.

use thiserror::Error;

use crate::topology::LogicalId;

/// Error type for klingt-rack operations.
///
/// Every variant describes a refused edit or a bad configuration. None of them
/// is fatal: the previously published active set keeps rendering.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Unknown module type: {0}")]
    UnknownModuleType(String),

    #[error("Unknown module: {0}")]
    UnknownModule(LogicalId),

    #[error("Channel {channel} out of range for {module} ({available} available)")]
    ChannelOutOfRange {
        module: LogicalId,
        channel: usize,
        available: usize,
    },

    #[error("Connection already exists: {0}")]
    AlreadyConnected(crate::topology::Connection),

    #[error("Cycle without a feedback-tolerant input through modules {members:?}")]
    CycleRejected { members: Vec<LogicalId> },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Queue full: {0}")]
    QueueFull(&'static str),

    #[cfg(feature = "cpal_output")]
    #[error("No audio output device available")]
    NoDevice,

    #[cfg(feature = "cpal_output")]
    #[error("Audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "cpal_output")]
    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "cpal_output")]
    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[cfg(feature = "cpal_output")]
    #[error("Failed to pause audio stream")]
    PauseStream(#[from] cpal::PauseStreamError),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, PatchError>;
