//! Error types for playback management

use cadence_audio::AudioError;
use cadence_loudness::LoudnessError;
use thiserror::Error;

/// Playback errors
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Decoding, engine or device failure
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Loudness analysis failure
    #[error(transparent)]
    Loudness(#[from] LoudnessError),

    /// No track is currently loaded
    #[error("No track loaded")]
    NoTrackLoaded,

    /// Index out of bounds
    #[error("Index out of bounds: {0}")]
    IndexOutOfBounds(usize),

    /// The player task has shut down
    #[error("Player has shut down")]
    PlayerClosed,

    /// A background task failed
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for PlaybackError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
