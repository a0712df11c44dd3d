//! Loudness analysis and normalization for Cadence Player
//!
//! This crate provides:
//! - Peak/RMS loudness measurement of decoded audio (first 30 seconds)
//! - EBU R128 integrated loudness as an informational extra
//! - A per-track normalization gain cache
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌────────────────┐
//! │ AudioSource  │ ──► │ LoudnessAnalyzer │ ──► │ LoudnessResult │
//! └──────────────┘     └──────────────────┘     └───────┬────────┘
//!                                                       │ store(path)
//!                                                       ▼
//!                                              ┌──────────────────┐
//!                      gain_for(path) ◄─────── │ VolumeNormalizer │
//!                                              └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use cadence_audio::DecodedAudio;
//! use cadence_loudness::{LoudnessAnalyzer, VolumeNormalizer};
//!
//! let quiet = DecodedAudio::new(vec![0.05; 44100 * 2], 44100, 2);
//! let result = LoudnessAnalyzer::new().analyze(&quiet);
//! assert!(result.gain_adjustment > 0.0);
//!
//! let normalizer = VolumeNormalizer::new();
//! normalizer.set_enabled(true);
//! normalizer.store(result, "quiet.flac");
//! assert!(normalizer.gain_for("quiet.flac") > 1.0);
//! ```

mod analyzer;
mod error;
mod normalizer;

pub use analyzer::{LoudnessAnalyzer, LoudnessResult};
pub use error::{LoudnessError, Result};
pub use normalizer::VolumeNormalizer;

use std::time::Duration;

/// Streaming reference level (-14 dB, common for streaming platforms)
pub const DEFAULT_TARGET_LOUDNESS: f64 = -14.0;

/// Only the start of a track is analyzed
pub const ANALYSIS_WINDOW: Duration = Duration::from_secs(30);

/// Level reported for digital silence, in dB
pub const SILENCE_FLOOR_DB: f64 = -96.0;

/// Smallest normalization multiplier handed out
pub const MIN_NORMALIZATION_GAIN: f64 = 0.1;

/// Largest normalization multiplier handed out
pub const MAX_NORMALIZATION_GAIN: f64 = 4.0;

/// Convert a linear amplitude to dB; zero (or less) maps to [`SILENCE_FLOOR_DB`]
pub fn linear_to_db(value: f64) -> f64 {
    if value > 0.0 {
        20.0 * value.log10()
    } else {
        SILENCE_FLOOR_DB
    }
}

/// Convert dB to a linear multiplier
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}
