//! Decoded audio sources
//!
//! Abstracts a decoded, randomly readable PCM stream so render nodes and the
//! loudness analyzer do not care where the samples came from.

use crate::error::{AudioError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decoded audio handle
///
/// Samples are interleaved f32 in [-1.0, 1.0]. Implementors must be cheap to
/// read from any frame offset: nodes re-read after seeks and the analyzer
/// reads in chunks.
pub trait AudioSource: Send + Sync {
    /// Sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Number of interleaved channels
    fn channels(&self) -> u16;

    /// Total number of frames (one frame = one sample per channel)
    fn frame_count(&self) -> u64;

    /// Read interleaved frames starting at `start_frame` into `out`
    ///
    /// `out.len()` should be a multiple of `channels()`. Returns the number of
    /// whole frames copied; 0 means `start_frame` is at or past the end.
    fn read_frames(&self, start_frame: u64, out: &mut [f32]) -> Result<usize>;

    /// Total duration
    fn duration(&self) -> Duration {
        let rate = self.sample_rate();
        if rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / f64::from(rate))
    }
}

/// Fully decoded audio held in memory
///
/// Cloning is cheap: the sample data is shared.
#[derive(Clone)]
pub struct DecodedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedAudio {
    /// Wrap interleaved samples
    ///
    /// A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        if channels > 0 {
            let whole = samples.len() - samples.len() % usize::from(channels);
            samples.truncate(whole);
        } else {
            samples.clear();
        }

        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Silent audio of the given length
    pub fn silence(duration: Duration, sample_rate: u32, channels: u16) -> Self {
        let frames = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
        Self::new(vec![0.0; frames * usize::from(channels)], sample_rate, channels)
    }

    /// Interleaved sample data
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Whether there is no audio at all
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl fmt::Debug for DecodedAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedAudio")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frames", &self.frame_count())
            .finish()
    }
}

impl AudioSource for DecodedAudio {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn frame_count(&self) -> u64 {
        if self.channels == 0 {
            return 0;
        }
        (self.samples.len() / usize::from(self.channels)) as u64
    }

    fn read_frames(&self, start_frame: u64, out: &mut [f32]) -> Result<usize> {
        let channels = usize::from(self.channels);
        if channels == 0 {
            return Err(AudioError::InvalidBuffer("source has no channels".to_string()));
        }

        let total = self.frame_count();
        if start_frame >= total {
            return Ok(0);
        }

        let available = (total - start_frame) as usize;
        let frames = (out.len() / channels).min(available);
        let start = start_frame as usize * channels;
        let len = frames * channels;
        out[..len].copy_from_slice(&self.samples[start..start + len]);

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_frame_is_dropped() {
        let audio = DecodedAudio::new(vec![0.1, 0.2, 0.3, 0.4, 0.5], 44100, 2);
        assert_eq!(audio.frame_count(), 2);
        assert_eq!(audio.samples().len(), 4);
    }

    #[test]
    fn read_frames_clamps_at_end() {
        let audio = DecodedAudio::new((0..10).map(|i| i as f32).collect(), 1000, 2);
        let mut out = vec![0.0; 8];

        let frames = audio.read_frames(3, &mut out).unwrap();
        assert_eq!(frames, 2);
        assert_eq!(&out[..4], &[6.0, 7.0, 8.0, 9.0]);

        assert_eq!(audio.read_frames(5, &mut out).unwrap(), 0);
        assert_eq!(audio.read_frames(500, &mut out).unwrap(), 0);
    }

    #[test]
    fn duration_from_frames() {
        let audio = DecodedAudio::silence(Duration::from_millis(1500), 48000, 2);
        assert_eq!(audio.frame_count(), 72000);
        assert!((audio.duration().as_secs_f64() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn zero_sample_rate_has_zero_duration() {
        let audio = DecodedAudio::new(vec![0.0; 8], 0, 2);
        assert_eq!(audio.duration(), Duration::ZERO);
    }

    #[test]
    fn zero_channels_rejects_reads() {
        let audio = DecodedAudio::new(vec![0.0; 8], 44100, 0);
        assert!(audio.is_empty());
        let mut out = vec![0.0; 4];
        assert!(audio.read_frames(0, &mut out).is_err());
    }
}
