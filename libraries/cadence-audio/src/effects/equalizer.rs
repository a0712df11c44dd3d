//! 10-band equalizer model
//!
//! [`Equalizer`] is the thread-safe gain table the rest of the player talks
//! to. It keeps the stored band gains separate from what the bound render
//! node receives: bypassing sends zeros to the node but leaves the model
//! untouched, so re-enabling restores the previous curve exactly.

use crate::error::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Number of bands
pub const BAND_COUNT: usize = 10;

/// Canonical band centre frequencies (Hz), index-aligned with the gain table
pub const BAND_FREQUENCIES: [f32; BAND_COUNT] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Lowest band gain in dB
pub const MIN_GAIN_DB: f32 = -12.0;

/// Highest band gain in dB
pub const MAX_GAIN_DB: f32 = 12.0;

/// One equalizer band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Centre frequency in Hz
    pub frequency: f32,
    /// Gain in dB, within [`MIN_GAIN_DB`, `MAX_GAIN_DB`]
    pub gain: f32,
}

impl Band {
    /// Create a band, clamping the gain
    pub fn new(frequency: f32, gain: f32) -> Self {
        Self {
            frequency,
            gain: clamp_gain(gain),
        }
    }
}

fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    }
}

/// Signal-processing node an [`Equalizer`] drives
pub trait EqNode: Send + Sync {
    /// Replace all band gains (dB, index-aligned with [`BAND_FREQUENCIES`])
    fn set_band_gains(&self, gains: &[f32; BAND_COUNT]);
}

/// Built-in EQ presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqPreset {
    /// All bands at 0 dB
    #[default]
    Flat,
    /// Lifted lows
    BassBoost,
    /// Lifted highs
    TrebleBoost,
    /// Presence boost for voice
    Vocal,
    /// Scooped mids, lifted extremes
    Electronic,
    /// Warm and gently bright
    Acoustic,
    /// Compressed range for low listening levels
    LateNight,
    /// Fletcher-Munson style contour
    Loudness,
}

impl EqPreset {
    /// Every preset, in display order
    pub const ALL: [EqPreset; 8] = [
        EqPreset::Flat,
        EqPreset::BassBoost,
        EqPreset::TrebleBoost,
        EqPreset::Vocal,
        EqPreset::Electronic,
        EqPreset::Acoustic,
        EqPreset::LateNight,
        EqPreset::Loudness,
    ];

    /// Gain table (dB), ordered 32 Hz to 16 kHz
    pub fn gains(&self) -> [f32; BAND_COUNT] {
        match self {
            Self::Flat => [0.0; BAND_COUNT],
            Self::BassBoost => [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            Self::TrebleBoost => [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 4.0, 5.0, 6.0],
            Self::Vocal => [-2.0, -1.0, 0.0, 2.0, 4.0, 4.0, 3.0, 1.0, 0.0, -1.0],
            Self::Electronic => [5.0, 4.0, 1.0, 0.0, -2.0, 1.0, 0.0, 2.0, 4.0, 5.0],
            Self::Acoustic => [3.0, 3.0, 2.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 1.0],
            Self::LateNight => [-3.0, -2.0, -1.0, 0.0, 2.0, 3.0, 2.0, 0.0, -2.0, -3.0],
            Self::Loudness => [6.0, 4.0, 0.0, 0.0, -1.0, 0.0, -1.0, 0.0, 4.0, 6.0],
        }
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flat => "Flat",
            Self::BassBoost => "Bass Boost",
            Self::TrebleBoost => "Treble Boost",
            Self::Vocal => "Vocal",
            Self::Electronic => "Electronic",
            Self::Acoustic => "Acoustic",
            Self::LateNight => "Late Night",
            Self::Loudness => "Loudness",
        }
    }
}

struct EqState {
    bands: [Band; BAND_COUNT],
    enabled: bool,
    node: Option<Arc<dyn EqNode>>,
}

/// Thread-safe 10-band gain table bound to an [`EqNode`]
///
/// All state sits behind one lock. Pushing gains to the node happens after
/// the lock is released, so a slow node never blocks readers.
pub struct Equalizer {
    state: Mutex<EqState>,
}

impl Equalizer {
    /// Flat, enabled, unbound
    pub fn new() -> Self {
        let bands = std::array::from_fn(|i| Band::new(BAND_FREQUENCIES[i], 0.0));
        Self {
            state: Mutex::new(EqState {
                bands,
                enabled: true,
                node: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EqState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind to a node (replacing any previous binding) and push current state
    pub fn bind(&self, node: Arc<dyn EqNode>) {
        self.lock().node = Some(node);
        self.apply_to_node();
    }

    /// Whether a node is bound
    pub fn is_bound(&self) -> bool {
        self.lock().node.is_some()
    }

    /// Snapshot of the bands
    pub fn bands(&self) -> [Band; BAND_COUNT] {
        self.lock().bands
    }

    /// Stored gains in dB (independent of the bypass flag)
    pub fn gains(&self) -> [f32; BAND_COUNT] {
        self.lock().bands.map(|b| b.gain)
    }

    /// Set one band's gain, clamped to ±12 dB
    ///
    /// An out-of-range index is ignored. Use [`Equalizer::try_set_gain`] to
    /// have it rejected instead.
    pub fn set_gain(&self, index: usize, gain: f32) {
        if self.update_band(index, gain) {
            self.apply_to_node();
        }
    }

    /// Like [`Equalizer::set_gain`], but reports an invalid index
    pub fn try_set_gain(&self, index: usize, gain: f32) -> Result<()> {
        if self.update_band(index, gain) {
            self.apply_to_node();
            Ok(())
        } else {
            Err(AudioError::InvalidBand(index))
        }
    }

    fn update_band(&self, index: usize, gain: f32) -> bool {
        let mut state = self.lock();
        match state.bands.get_mut(index) {
            Some(band) => {
                *band = Band::new(band.frequency, gain);
                true
            }
            None => false,
        }
    }

    /// Load a preset's gain table
    pub fn apply_preset(&self, preset: EqPreset) {
        tracing::debug!("Applying EQ preset: {}", preset.name());
        self.apply_gains(&preset.gains());
    }

    /// Apply a gain list starting at band 0
    ///
    /// A shorter list only touches the first N bands; extra values are
    /// ignored.
    pub fn apply_gains(&self, gains: &[f32]) {
        {
            let mut state = self.lock();
            for (band, &gain) in state.bands.iter_mut().zip(gains) {
                *band = Band::new(band.frequency, gain);
            }
        }
        self.apply_to_node();
    }

    /// Replace all bands
    ///
    /// Frequencies stay fixed to the canonical table; only the gains of the
    /// supplied bands are taken.
    pub fn set_bands(&self, bands: [Band; BAND_COUNT]) {
        {
            let mut state = self.lock();
            for (slot, band) in state.bands.iter_mut().zip(bands) {
                *slot = Band::new(slot.frequency, band.gain);
            }
        }
        self.apply_to_node();
    }

    /// Global bypass flag
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Enable or bypass; always re-pushes to the node
    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
        self.apply_to_node();
    }

    /// Push the effective gains to the bound node
    ///
    /// Sends zeros while bypassed. No-op when unbound.
    pub fn apply_to_node(&self) {
        let (node, gains) = {
            let state = self.lock();
            let Some(node) = state.node.clone() else {
                return;
            };
            let gains = if state.enabled {
                state.bands.map(|b| b.gain)
            } else {
                [0.0; BAND_COUNT]
            };
            (node, gains)
        };
        node.set_band_gains(&gains);
    }
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingNode {
        pushed: Mutex<Vec<[f32; BAND_COUNT]>>,
    }

    impl RecordingNode {
        fn last(&self) -> Option<[f32; BAND_COUNT]> {
            self.pushed.lock().unwrap().last().copied()
        }

        fn count(&self) -> usize {
            self.pushed.lock().unwrap().len()
        }
    }

    impl EqNode for RecordingNode {
        fn set_band_gains(&self, gains: &[f32; BAND_COUNT]) {
            self.pushed.lock().unwrap().push(*gains);
        }
    }

    fn bound() -> (Equalizer, Arc<RecordingNode>) {
        let eq = Equalizer::new();
        let node = Arc::new(RecordingNode::default());
        eq.bind(node.clone());
        (eq, node)
    }

    // ===== Gain edits =====

    #[test]
    fn set_gain_clamps_to_range() {
        let eq = Equalizer::new();
        eq.set_gain(0, 100.0);
        assert_eq!(eq.gains()[0], 12.0);
        eq.set_gain(0, -100.0);
        assert_eq!(eq.gains()[0], -12.0);
    }

    #[test]
    fn set_gain_keeps_frequency() {
        let eq = Equalizer::new();
        eq.set_gain(3, 4.5);
        let band = eq.bands()[3];
        assert_eq!(band.frequency, 250.0);
        assert_eq!(band.gain, 4.5);
    }

    #[test]
    fn out_of_range_set_gain_is_silently_ignored() {
        let (eq, node) = bound();
        let pushes = node.count();
        eq.set_gain(BAND_COUNT, 6.0);
        assert_eq!(eq.gains(), [0.0; BAND_COUNT]);
        assert_eq!(node.count(), pushes);
    }

    #[test]
    fn try_set_gain_rejects_out_of_range() {
        let eq = Equalizer::new();
        assert!(matches!(eq.try_set_gain(10, 3.0), Err(AudioError::InvalidBand(10))));
        assert!(eq.try_set_gain(9, 3.0).is_ok());
        assert_eq!(eq.gains()[9], 3.0);
    }

    #[test]
    fn short_gain_list_applies_to_leading_bands() {
        let eq = Equalizer::new();
        eq.apply_preset(EqPreset::Loudness);
        eq.apply_gains(&[1.0, 2.0, 3.0]);
        let gains = eq.gains();
        assert_eq!(&gains[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(&gains[3..], &EqPreset::Loudness.gains()[3..]);
    }

    #[test]
    fn set_bands_keeps_canonical_frequencies() {
        let eq = Equalizer::new();
        eq.set_bands([Band::new(999.0, 20.0); BAND_COUNT]);
        for (band, freq) in eq.bands().iter().zip(BAND_FREQUENCIES) {
            assert_eq!(band.frequency, freq);
            assert_eq!(band.gain, 12.0);
        }
    }

    // ===== Presets =====

    #[test]
    fn preset_tables_are_within_range() {
        for preset in EqPreset::ALL {
            assert!(preset
                .gains()
                .iter()
                .all(|g| (MIN_GAIN_DB..=MAX_GAIN_DB).contains(g)));
        }
        assert_eq!(EqPreset::Flat.gains(), [0.0; BAND_COUNT]);
    }

    #[test]
    fn apply_preset_loads_gains() {
        let eq = Equalizer::new();
        eq.apply_preset(EqPreset::BassBoost);
        assert_eq!(eq.gains(), EqPreset::BassBoost.gains());
    }

    // ===== Node binding =====

    #[test]
    fn bind_pushes_current_state() {
        let eq = Equalizer::new();
        eq.apply_preset(EqPreset::Vocal);
        let node = Arc::new(RecordingNode::default());
        eq.bind(node.clone());
        assert_eq!(node.last(), Some(EqPreset::Vocal.gains()));
    }

    #[test]
    fn rebinding_pushes_to_new_node() {
        let (eq, first) = bound();
        let second = Arc::new(RecordingNode::default());
        eq.bind(second.clone());
        let before = first.count();
        eq.set_gain(0, 5.0);
        assert_eq!(first.count(), before);
        assert_eq!(second.last().map(|g| g[0]), Some(5.0));
    }

    #[test]
    fn bypass_zeroes_node_but_preserves_model() {
        let (eq, node) = bound();
        eq.apply_preset(EqPreset::Electronic);

        eq.set_enabled(false);
        assert_eq!(node.last(), Some([0.0; BAND_COUNT]));
        assert_eq!(eq.gains(), EqPreset::Electronic.gains());

        eq.set_enabled(true);
        assert_eq!(node.last(), Some(EqPreset::Electronic.gains()));
    }

    #[test]
    fn set_enabled_always_reapplies() {
        let (eq, node) = bound();
        let before = node.count();
        eq.set_enabled(true);
        eq.set_enabled(true);
        assert_eq!(node.count(), before + 2);
    }

    #[test]
    fn preset_deserializes_from_snake_case() {
        use serde::de::value::{Error, StrDeserializer};
        use serde::de::IntoDeserializer;

        let de: StrDeserializer<'_, Error> = "late_night".into_deserializer();
        assert_eq!(EqPreset::deserialize(de).unwrap(), EqPreset::LateNight);
    }
}
