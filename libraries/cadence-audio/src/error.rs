//! Audio-specific errors
use thiserror::Error;

/// Result type alias using `AudioError`
pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio error types
#[derive(Error, Debug)]
pub enum AudioError {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Unsupported or unrecognised container/codec
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decoding error
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Invalid audio buffer
    #[error("Invalid audio buffer: {0}")]
    InvalidBuffer(String),

    /// Equalizer band index outside the fixed band table
    #[error("Invalid equalizer band index: {0}")]
    InvalidBand(usize),

    /// No output device available
    #[error("No audio output device found")]
    DeviceNotFound,

    /// Output backend failed to start or run
    #[error("Output error: {0}")]
    Output(String),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
