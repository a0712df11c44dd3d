//! Per-track normalization gain cache
//!
//! Holds analysis results keyed by track path. Lookups are cheap and happen
//! from the player actor right before a track is scheduled.

use crate::analyzer::LoudnessResult;
use crate::{MAX_NORMALIZATION_GAIN, MIN_NORMALIZATION_GAIN};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

struct NormalizerState {
    cache: HashMap<String, LoudnessResult>,
    enabled: bool,
}

/// Loudness cache gated by an enable flag
///
/// The cache only grows until [`VolumeNormalizer::clear_cache`]; toggling the
/// flag never drops results.
pub struct VolumeNormalizer {
    state: Mutex<NormalizerState>,
}

impl VolumeNormalizer {
    /// Empty, disabled normalizer
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NormalizerState {
                cache: HashMap::new(),
                enabled: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NormalizerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or overwrite the result for `path`
    pub fn store(&self, result: LoudnessResult, path: impl Into<String>) {
        self.lock().cache.insert(path.into(), result);
    }

    /// Linear gain to apply to `path`
    ///
    /// 1.0 when disabled or unknown, otherwise the analyzed gain clamped to
    /// [0.1, 4.0].
    pub fn gain_for(&self, path: &str) -> f64 {
        let state = self.lock();
        if !state.enabled {
            return 1.0;
        }
        match state.cache.get(path) {
            Some(result) => result
                .linear_gain
                .clamp(MIN_NORMALIZATION_GAIN, MAX_NORMALIZATION_GAIN),
            None => 1.0,
        }
    }

    /// Cached result for `path`
    pub fn result_for(&self, path: &str) -> Option<LoudnessResult> {
        self.lock().cache.get(path).copied()
    }

    /// Whether `path` has been analyzed
    pub fn contains(&self, path: &str) -> bool {
        self.lock().cache.contains_key(path)
    }

    /// Number of cached results
    pub fn len(&self) -> usize {
        self.lock().cache.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.lock().cache.is_empty()
    }

    /// Drop every cached result; the enable flag is kept
    pub fn clear_cache(&self) {
        let mut state = self.lock();
        tracing::debug!("Clearing {} cached loudness results", state.cache.len());
        state.cache.clear();
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }
}

impl Default for VolumeNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
