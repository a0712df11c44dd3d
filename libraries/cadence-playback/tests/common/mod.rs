/// Common test utilities and fixtures
use cadence_audio::NullOutput;
use cadence_playback::{AudioPlayer, PlayerConfig, PlayerEvent};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

/// Sample rate used by every fixture and the headless output
pub const RATE: u32 = 8000;

/// Route library logs through the test harness; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write a stereo 16-bit WAV holding a 220 Hz tone
pub fn write_tone(dir: &Path, name: &str, seconds: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels: 2,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    let frames = (RATE as f32 * seconds) as usize;
    for i in 0..frames {
        let t = i as f32 / RATE as f32;
        let sample =
            ((2.0 * std::f32::consts::PI * 220.0 * t).sin() * 0.25 * i16::MAX as f32) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Player on a headless output with fast advance polling
pub fn test_player(mut config: PlayerConfig) -> AudioPlayer {
    init_tracing();
    config.advance_poll_interval_ms = 20;
    let output = NullOutput::new(RATE, 2).with_block_frames(80);
    AudioPlayer::new(Box::new(output), config).unwrap()
}

/// Wait for the first event matching `predicate`, skipping the rest
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<PlayerEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Option<PlayerEvent>
where
    F: FnMut(&PlayerEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
