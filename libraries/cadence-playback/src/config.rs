/// Player configuration
use crate::crossfade::{CrossfadeSettings, FadeCurve, MAX_DURATION};
use crate::types::RepeatMode;
use cadence_audio::effects::{EqPreset, Equalizer};
use cadence_loudness::DEFAULT_TARGET_LOUDNESS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlayerConfig {
    #[serde(default = "default_crossfade")]
    pub crossfade: CrossfadeConfig,

    #[serde(default = "default_equalizer")]
    pub equalizer: EqualizerConfig,

    #[serde(default = "default_normalization")]
    pub normalization: NormalizationConfig,

    /// Master volume (0.0 to 1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,

    #[serde(default)]
    pub repeat: RepeatMode,

    /// How often the actor checks whether the next track is due
    #[serde(default = "default_advance_poll_interval_ms")]
    pub advance_poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CrossfadeConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_crossfade_duration")]
    pub duration_secs: f64,

    #[serde(default)]
    pub curve: FadeCurve,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EqualizerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Preset loaded at start-up; applied before `gains`
    #[serde(default)]
    pub preset: Option<EqPreset>,

    /// Explicit band gains in dB, 32 Hz first
    #[serde(default)]
    pub gains: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NormalizationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_target_loudness")]
    pub target_loudness: f64,

    /// Upcoming tracks analyzed ahead of time
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
}

impl CrossfadeConfig {
    /// Runtime settings
    ///
    /// Negative or non-finite durations become zero; long ones are capped at
    /// [`MAX_DURATION`].
    pub fn settings(&self) -> CrossfadeSettings {
        let secs = if self.duration_secs.is_finite() {
            self.duration_secs.clamp(0.0, MAX_DURATION.as_secs_f64())
        } else {
            0.0
        };
        CrossfadeSettings {
            enabled: self.enabled,
            duration: Duration::from_secs_f64(secs),
            curve: self.curve,
        }
    }
}

impl EqualizerConfig {
    /// Load this configuration into `equalizer`
    pub fn apply(&self, equalizer: &Equalizer) {
        if let Some(preset) = self.preset {
            equalizer.apply_preset(preset);
        }
        if let Some(gains) = &self.gains {
            equalizer.apply_gains(gains);
        }
        equalizer.set_enabled(self.enabled);
    }
}

impl PlayerConfig {
    pub fn advance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.advance_poll_interval_ms.max(1))
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            crossfade: default_crossfade(),
            equalizer: default_equalizer(),
            normalization: default_normalization(),
            volume: default_volume(),
            repeat: RepeatMode::default(),
            advance_poll_interval_ms: default_advance_poll_interval_ms(),
        }
    }
}

// Default values
fn default_crossfade() -> CrossfadeConfig {
    CrossfadeConfig {
        enabled: false,
        duration_secs: default_crossfade_duration(),
        curve: FadeCurve::default(),
    }
}

fn default_crossfade_duration() -> f64 {
    3.0
}

fn default_equalizer() -> EqualizerConfig {
    EqualizerConfig {
        enabled: default_enabled(),
        preset: None,
        gains: None,
    }
}

fn default_enabled() -> bool {
    true
}

fn default_normalization() -> NormalizationConfig {
    NormalizationConfig {
        enabled: false,
        target_loudness: default_target_loudness(),
        lookahead: default_lookahead(),
    }
}

fn default_target_loudness() -> f64 {
    DEFAULT_TARGET_LOUDNESS
}

fn default_lookahead() -> usize {
    3
}

fn default_volume() -> f32 {
    1.0
}

fn default_advance_poll_interval_ms() -> u64 {
    250
}
