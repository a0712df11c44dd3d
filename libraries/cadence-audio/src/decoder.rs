/// Audio decoder implementation using Symphonia
use crate::error::{AudioError, Result};
use crate::source::DecodedAudio;
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Audio decoder using Symphonia
///
/// Supports: MP3, FLAC, OGG, WAV, AAC
///
/// Decodes the whole file (or the first `max_duration` of it) into a
/// [`DecodedAudio`], keeping the file's native sample rate and channel
/// layout. Render nodes adapt rate and channels at render time.
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    /// Stop decoding after this much audio
    max_duration: Option<Duration>,
}

impl SymphoniaDecoder {
    /// Create a decoder that reads entire files
    pub fn new() -> Self {
        Self { max_duration: None }
    }

    /// Create a decoder that stops after `max_duration` of audio
    pub fn with_max_duration(max_duration: Duration) -> Self {
        Self {
            max_duration: Some(max_duration),
        }
    }

    /// Check whether the extension is one we expect Symphonia to handle
    pub fn supports_format(path: &Path) -> bool {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            matches!(
                ext.to_lowercase().as_str(),
                "mp3" | "flac" | "ogg" | "wav" | "m4a" | "aac"
            )
        } else {
            false
        }
    }

    /// Decode a file into memory
    pub fn decode(&self, path: &Path) -> Result<DecodedAudio> {
        if !path.exists() {
            return Err(AudioError::FileNotFound(path.display().to_string()));
        }

        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create a hint to help the format registry guess the format
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                AudioError::UnsupportedFormat(format!("{}: {}", path.display(), e))
            })?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::DecodeError("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                AudioError::UnsupportedFormat(format!("Failed to create decoder: {}", e))
            })?;

        let max_frames = self
            .max_duration
            .map(|d| (d.as_secs_f64() * f64::from(sample_rate)).ceil() as usize);

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(AudioError::DecodeError(format!(
                        "Error reading packet: {}",
                        e
                    )));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet: skip it rather than failing the whole file
                    tracing::warn!("Skipping undecodable packet in {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(AudioError::DecodeError(e.to_string())),
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count() as u16;

            let duration = decoded.capacity() as u64;
            let buf = match &mut sample_buf {
                Some(buf) if buf.capacity() >= decoded.capacity() * spec.channels.count() => buf,
                slot => slot.insert(SampleBuffer::<f32>::new(duration, spec)),
            };
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());

            if let Some(max_frames) = max_frames {
                let limit = max_frames * usize::from(channels.max(1));
                if samples.len() >= limit {
                    samples.truncate(limit);
                    break;
                }
            }
        }

        if samples.is_empty() {
            return Err(AudioError::DecodeError(format!(
                "{} contains no audio frames",
                path.display()
            )));
        }

        tracing::debug!(
            "Decoded {} ({} Hz, {} ch, {} samples)",
            path.display(),
            sample_rate,
            channels,
            samples.len()
        );

        Ok(DecodedAudio::new(samples, sample_rate, channels))
    }
}
