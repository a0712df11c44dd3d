//! Core types for playback management

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing playing (a loaded track may be ready)
    #[default]
    Stopped,

    /// Decoding a track
    Loading,

    /// Currently playing
    Playing,

    /// Paused mid-track
    Paused,
}

/// Repeat mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    /// Stop when queue ends
    #[default]
    Off,

    /// Loop current track only
    One,

    /// Loop entire queue
    All,
}

/// Events broadcast by the player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Transport state changed
    StateChanged(PlaybackState),

    /// A new track became current
    TrackChanged {
        /// Track path
        path: String,
        /// Decoded duration
        duration: Duration,
    },

    /// A track played to its end (or was crossfaded out)
    TrackFinished(String),

    /// The queue ran out; playback stopped
    QueueEnded,

    /// A background operation failed
    Error(String),
}

/// Point-in-time view of the player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    /// Transport state
    pub state: PlaybackState,
    /// Loaded track path, if any
    pub current_track: Option<String>,
    /// Render position in the loaded track
    pub current_time: Duration,
    /// Duration of the loaded track (zero when nothing is loaded)
    pub duration: Duration,
    /// Master volume (0.0 to 1.0)
    pub volume: f32,
    /// Repeat mode of the queue
    pub repeat_mode: RepeatMode,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    /// All tracks in play order
    pub tracks: Vec<String>,
    /// Index of the current track (meaningless when `tracks` is empty)
    pub current_index: usize,
    /// Number of back-navigation steps available
    pub history_len: usize,
    /// Repeat mode
    pub repeat_mode: RepeatMode,
}

impl QueueSnapshot {
    /// Current track
    pub fn current(&self) -> Option<&str> {
        self.tracks.get(self.current_index).map(String::as_str)
    }

    /// Tracks after the current one
    pub fn upcoming(&self) -> &[String] {
        self.tracks.get(self.current_index + 1..).unwrap_or(&[])
    }
}
