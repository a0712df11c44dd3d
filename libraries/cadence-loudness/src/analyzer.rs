//! Peak / RMS loudness analysis
//!
//! Measures the first [`ANALYSIS_WINDOW`] of a decoded source:
//! - Sample peak: max absolute sample over the first two channels
//! - RMS: per-channel RMS, averaged across those channels
//! - Integrated loudness (LUFS) via EBU R128, reported alongside but not used
//!   for the gain

use crate::error::Result;
use crate::{db_to_linear, linear_to_db, ANALYSIS_WINDOW, DEFAULT_TARGET_LOUDNESS};
use cadence_audio::{AudioSource, SymphoniaDecoder};
use ebur128::{EbuR128, Mode};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Frames read per chunk
const CHUNK_FRAMES: usize = 4096;

/// At most this many channels contribute to peak and RMS
const MAX_ANALYZED_CHANNELS: usize = 2;

/// Loudness of one track relative to a target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessResult {
    /// Sample peak in dB
    pub peak_level: f64,
    /// Mean RMS level in dB
    pub rms_level: f64,
    /// Target the adjustment was computed against, in dB
    pub target_loudness: f64,
    /// `target_loudness - rms_level`, in dB
    pub gain_adjustment: f64,
    /// `gain_adjustment` as a linear multiplier
    pub linear_gain: f64,
    /// EBU R128 integrated loudness, when it could be measured
    pub integrated_lufs: Option<f64>,
}

impl LoudnessResult {
    /// Derive the adjustment for measured levels
    pub fn new(peak_level: f64, rms_level: f64, target_loudness: f64) -> Self {
        let gain_adjustment = target_loudness - rms_level;
        Self {
            peak_level,
            rms_level,
            target_loudness,
            gain_adjustment,
            linear_gain: db_to_linear(gain_adjustment),
            integrated_lufs: None,
        }
    }

    /// Result that asks for no adjustment (used for unreadable or empty audio)
    pub fn neutral(target_loudness: f64) -> Self {
        Self::new(0.0, target_loudness, target_loudness)
    }

    /// Attach an integrated loudness measurement
    pub fn with_integrated_lufs(mut self, lufs: Option<f64>) -> Self {
        self.integrated_lufs = lufs;
        self
    }
}

impl fmt::Display for LoudnessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Peak: {:.1} dB, RMS: {:.1} dB, Adjustment: {:+.1} dB (x{:.3})",
            self.peak_level, self.rms_level, self.gain_adjustment, self.linear_gain
        )?;
        if let Some(lufs) = self.integrated_lufs {
            write!(f, ", Integrated: {:.1} LUFS", lufs)?;
        }
        Ok(())
    }
}

/// Stateless loudness analyzer
///
/// # Example
///
/// ```rust
/// use cadence_audio::DecodedAudio;
/// use cadence_loudness::LoudnessAnalyzer;
///
/// let audio = DecodedAudio::new(vec![0.5; 4410 * 2], 44100, 2);
/// let result = LoudnessAnalyzer::new().analyze(&audio);
/// assert!((result.peak_level + 6.02).abs() < 0.01);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LoudnessAnalyzer {
    target_loudness: f64,
}

impl LoudnessAnalyzer {
    /// Analyzer targeting the streaming reference level
    pub fn new() -> Self {
        Self {
            target_loudness: DEFAULT_TARGET_LOUDNESS,
        }
    }

    /// Analyzer targeting `target_loudness` dB
    pub fn with_target(target_loudness: f64) -> Self {
        Self { target_loudness }
    }

    /// Target level in dB
    pub fn target_loudness(&self) -> f64 {
        self.target_loudness
    }

    /// Analyze a decoded source
    ///
    /// Never fails: a source that cannot be read, or has no audio, yields
    /// [`LoudnessResult::neutral`].
    pub fn analyze(&self, source: &dyn AudioSource) -> LoudnessResult {
        self.measure(source).unwrap_or_else(|e| {
            tracing::warn!("Loudness analysis failed, using neutral gain: {}", e);
            LoudnessResult::neutral(self.target_loudness)
        })
    }

    /// Analyze a decoded source, reporting read failures
    pub fn measure(&self, source: &dyn AudioSource) -> Result<LoudnessResult> {
        let channels = usize::from(source.channels());
        let rate = source.sample_rate();
        let window = (ANALYSIS_WINDOW.as_secs_f64() * f64::from(rate)) as u64;
        let total = source.frame_count().min(window);

        if channels == 0 || total == 0 {
            return Ok(LoudnessResult::neutral(self.target_loudness));
        }

        let analyzed = channels.min(MAX_ANALYZED_CHANNELS);
        let mut peak = 0.0f64;
        let mut sum_squares = [0.0f64; MAX_ANALYZED_CHANNELS];
        let mut frames_seen = 0u64;

        let mut ebu = match EbuR128::new(u32::from(source.channels()), rate, Mode::I) {
            Ok(ebu) => Some(ebu),
            Err(e) => {
                tracing::debug!("Integrated loudness unavailable: {:?}", e);
                None
            }
        };

        let mut chunk = vec![0.0f32; CHUNK_FRAMES * channels];
        while frames_seen < total {
            let wanted = ((total - frames_seen) as usize).min(CHUNK_FRAMES);
            let read = source.read_frames(frames_seen, &mut chunk[..wanted * channels])?;
            if read == 0 {
                break;
            }

            let samples = &chunk[..read * channels];
            for frame in samples.chunks_exact(channels) {
                for (ch, &sample) in frame.iter().take(analyzed).enumerate() {
                    let value = f64::from(sample);
                    peak = peak.max(value.abs());
                    sum_squares[ch] += value * value;
                }
            }

            let meter_failed = match ebu.as_mut().map(|meter| meter.add_frames_f32(samples)) {
                Some(Err(e)) => {
                    tracing::debug!("Dropping integrated loudness: {:?}", e);
                    true
                }
                _ => false,
            };
            if meter_failed {
                ebu = None;
            }

            frames_seen += read as u64;
        }

        if frames_seen == 0 {
            return Ok(LoudnessResult::neutral(self.target_loudness));
        }

        let mean_rms = sum_squares[..analyzed]
            .iter()
            .map(|sum| (sum / frames_seen as f64).sqrt())
            .sum::<f64>()
            / analyzed as f64;

        let integrated = ebu
            .and_then(|meter| meter.loudness_global().ok())
            .filter(|lufs| lufs.is_finite());

        let result =
            LoudnessResult::new(linear_to_db(peak), linear_to_db(mean_rms), self.target_loudness)
                .with_integrated_lufs(integrated);
        tracing::trace!("Analyzed {} frames: {}", frames_seen, result);
        Ok(result)
    }

    /// Analyze several decoded sources in order
    ///
    /// Sources that fail to read are skipped; `progress(completed, total)`
    /// is called after every source, skipped or not.
    pub fn analyze_batch<F>(
        &self,
        sources: &[(String, Arc<dyn AudioSource>)],
        mut progress: F,
    ) -> Vec<(String, LoudnessResult)>
    where
        F: FnMut(usize, usize),
    {
        let total = sources.len();
        let mut results = Vec::with_capacity(total);

        for (i, (path, source)) in sources.iter().enumerate() {
            match self.measure(source.as_ref()) {
                Ok(result) => results.push((path.clone(), result)),
                Err(e) => tracing::warn!("Skipping loudness analysis of {}: {}", path, e),
            }
            progress(i + 1, total);
        }

        results
    }

    /// Decode the analysis window of a file and analyze it
    pub fn analyze_path(&self, path: &Path) -> Result<LoudnessResult> {
        let audio = SymphoniaDecoder::with_max_duration(ANALYSIS_WINDOW).decode(path)?;
        self.measure(&audio)
    }

    /// Decode and analyze several files in order, skipping failures
    pub fn analyze_batch_paths<P, F>(
        &self,
        paths: &[P],
        mut progress: F,
    ) -> Vec<(String, LoudnessResult)>
    where
        P: AsRef<Path>,
        F: FnMut(usize, usize),
    {
        let total = paths.len();
        let mut results = Vec::with_capacity(total);

        for (i, path) in paths.iter().enumerate() {
            let path = path.as_ref();
            match self.analyze_path(path) {
                Ok(result) => results.push((path.to_string_lossy().into_owned(), result)),
                Err(e) => tracing::warn!("Skipping loudness analysis of {}: {}", path.display(), e),
            }
            progress(i + 1, total);
        }

        results
    }
}

impl Default for LoudnessAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_audio::{AudioError, DecodedAudio};

    struct BrokenSource;

    impl AudioSource for BrokenSource {
        fn sample_rate(&self) -> u32 {
            44100
        }
        fn channels(&self) -> u16 {
            2
        }
        fn frame_count(&self) -> u64 {
            44100
        }
        fn read_frames(&self, _start: u64, _out: &mut [f32]) -> cadence_audio::Result<usize> {
            Err(AudioError::DecodeError("broken".to_string()))
        }
    }

    #[test]
    fn test_result_round_trip() {
        let result = LoudnessResult::new(-3.0, -20.0, -14.0);
        assert_eq!(result.gain_adjustment, 6.0);
        assert!((result.linear_gain - 1.995).abs() < 0.01);
    }

    #[test]
    fn test_neutral_result() {
        let result = LoudnessResult::neutral(-14.0);
        assert_eq!(result.peak_level, 0.0);
        assert_eq!(result.rms_level, -14.0);
        assert_eq!(result.gain_adjustment, 0.0);
        assert_eq!(result.linear_gain, 1.0);
    }

    #[test]
    fn test_constant_signal_levels() {
        let audio = DecodedAudio::new(vec![0.5; 44100 * 2], 44100, 2);
        let result = LoudnessAnalyzer::new().analyze(&audio);
        assert!((result.peak_level + 6.0206).abs() < 1e-3);
        assert!((result.rms_level + 6.0206).abs() < 1e-3);
        assert!((result.gain_adjustment + 7.9794).abs() < 1e-3);
    }

    #[test]
    fn test_peak_is_max_and_rms_is_mean_across_channels() {
        // Left at 0.5, right silent
        let samples: Vec<f32> = (0..44100).flat_map(|_| [0.5, 0.0]).collect();
        let audio = DecodedAudio::new(samples, 44100, 2);
        let result = LoudnessAnalyzer::new().analyze(&audio);
        assert!((result.peak_level + 6.0206).abs() < 1e-3);
        // Mean of 0.5 and 0.0 linear RMS
        assert!((result.rms_level + 12.0412).abs() < 1e-3);
    }

    #[test]
    fn test_only_first_two_channels_count() {
        let samples: Vec<f32> = (0..1000).flat_map(|_| [0.25, 0.25, 1.0]).collect();
        let audio = DecodedAudio::new(samples, 8000, 3);
        let result = LoudnessAnalyzer::new().analyze(&audio);
        assert!((result.peak_level + 12.0412).abs() < 1e-3);
    }

    #[test]
    fn test_only_first_thirty_seconds_count() {
        let rate = 1000;
        let mut samples = vec![0.1f32; 30 * rate];
        samples.extend(vec![1.0f32; 10 * rate]);
        let audio = DecodedAudio::new(samples, rate as u32, 1);
        let result = LoudnessAnalyzer::new().analyze(&audio);
        assert!((result.peak_level + 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_silence_hits_floor() {
        let audio = DecodedAudio::new(vec![0.0; 4410 * 2], 44100, 2);
        let result = LoudnessAnalyzer::new().analyze(&audio);
        assert_eq!(result.peak_level, -96.0);
        assert_eq!(result.rms_level, -96.0);
        assert!(result.integrated_lufs.is_none());
    }

    #[test]
    fn test_empty_source_is_neutral() {
        let audio = DecodedAudio::new(Vec::new(), 44100, 2);
        let result = LoudnessAnalyzer::new().analyze(&audio);
        assert_eq!(result, LoudnessResult::neutral(-14.0));
    }

    #[test]
    fn test_failed_read_is_neutral() {
        let result = LoudnessAnalyzer::new().analyze(&BrokenSource);
        assert_eq!(result, LoudnessResult::neutral(-14.0));
        assert!(LoudnessAnalyzer::new().measure(&BrokenSource).is_err());
    }

    #[test]
    fn test_custom_target() {
        let audio = DecodedAudio::new(vec![0.1; 8000], 8000, 1);
        let result = LoudnessAnalyzer::with_target(-23.0).analyze(&audio);
        assert_eq!(result.target_loudness, -23.0);
        assert!((result.gain_adjustment + 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_integrated_loudness_reported_for_tone() {
        let rate = 48000;
        let samples: Vec<f32> = (0..rate * 3)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / rate as f32).sin() * 0.5;
                [s, s]
            })
            .collect();
        let audio = DecodedAudio::new(samples, rate as u32, 2);
        let result = LoudnessAnalyzer::new().analyze(&audio);
        let lufs = result.integrated_lufs.expect("tone should be measurable");
        assert!(lufs < 0.0 && lufs > -20.0, "lufs {lufs}");
    }

    #[test]
    fn test_batch_skips_failures_and_reports_progress() {
        let good: Arc<dyn AudioSource> = Arc::new(DecodedAudio::new(vec![0.5; 2000], 1000, 2));
        let bad: Arc<dyn AudioSource> = Arc::new(BrokenSource);
        let sources = vec![
            ("a".to_string(), good.clone()),
            ("b".to_string(), bad),
            ("c".to_string(), good),
        ];

        let mut calls = Vec::new();
        let results = LoudnessAnalyzer::new().analyze_batch(&sources, |done, total| {
            calls.push((done, total))
        });

        let names: Vec<&str> = results.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
        assert_eq!(calls, [(1, 3), (2, 3), (3, 3)]);
    }
}
