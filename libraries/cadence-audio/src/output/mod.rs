//! Output backends
//!
//! A backend owns the device side of the pull model: once started it
//! repeatedly asks the [`RenderEngine`] for interleaved f32 blocks. Backends
//! hold only a [`Weak`] reference to the engine so dropping the engine ends
//! any render thread on its own.

use crate::engine::RenderEngine;
use crate::error::Result;
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::Duration;

#[cfg(feature = "desktop")]
mod cpal_output;

#[cfg(feature = "desktop")]
pub use cpal_output::CpalOutput;

/// Format negotiated by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// Device sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// Device side of the render engine
pub trait OutputBackend: Send {
    /// Begin pulling audio from `engine`
    ///
    /// Returns the format the engine must render in. Failing here is how a
    /// missing or busy device surfaces to `play()`.
    fn start(&mut self, engine: Weak<RenderEngine>) -> Result<OutputFormat>;

    /// Stop pulling audio; safe to call when not started
    fn stop(&mut self);

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Backend without a device: the caller drives [`RenderEngine::render`]
///
/// Used for offline rendering and tests.
#[derive(Debug, Clone, Copy)]
pub struct ManualOutput {
    format: OutputFormat,
}

impl ManualOutput {
    /// Create a manual backend reporting the given format
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: OutputFormat {
                sample_rate,
                channels,
            },
        }
    }
}

impl OutputBackend for ManualOutput {
    fn start(&mut self, _engine: Weak<RenderEngine>) -> Result<OutputFormat> {
        Ok(self.format)
    }

    fn stop(&mut self) {}

    fn name(&self) -> &str {
        "manual"
    }
}

/// Headless backend that renders in real time and discards the audio
///
/// A background thread pulls one block per block period, so node positions
/// advance exactly as they would on a device.
pub struct NullOutput {
    format: OutputFormat,
    block_frames: usize,
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl NullOutput {
    /// Frames rendered per pull
    pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

    /// Create a headless backend
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: OutputFormat {
                sample_rate,
                channels,
            },
            block_frames: Self::DEFAULT_BLOCK_FRAMES,
            worker: None,
        }
    }

    /// Use a different block size
    pub fn with_block_frames(mut self, frames: usize) -> Self {
        self.block_frames = frames.max(1);
        self
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        let format = OutputFormat::default();
        Self::new(format.sample_rate, format.channels)
    }
}

impl OutputBackend for NullOutput {
    fn start(&mut self, engine: Weak<RenderEngine>) -> Result<OutputFormat> {
        if self.worker.is_some() {
            return Ok(self.format);
        }

        let format = self.format;
        let block_len = self.block_frames * usize::from(format.channels.max(1));
        let period = Duration::from_secs_f64(
            self.block_frames as f64 / f64::from(format.sample_rate.max(1)),
        );
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("cadence-null-output".to_string())
            .spawn(move || {
                let ticker = tick(period);
                let mut block = vec![0.0f32; block_len];
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(engine) = engine.upgrade() else { break };
                            engine.render(&mut block);
                        }
                    }
                }
                tracing::trace!("Null output thread exited");
            })?;

        self.worker = Some((stop_tx, handle));
        tracing::debug!(
            "Null output started ({} Hz, {} ch, {} frames/block)",
            format.sample_rate,
            format.channels,
            self.block_frames
        );
        Ok(format)
    }

    fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            // The render thread can hold the last engine reference; never join itself
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("Null output thread panicked");
            }
        }
    }

    fn name(&self) -> &str {
        "null"
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
