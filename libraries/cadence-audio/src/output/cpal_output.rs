//! CPAL output for desktop platforms
//!
//! `cpal::Stream` is not `Send` on every host, so the stream is built, played
//! and dropped on a dedicated thread. The caller only holds channels to it.

use super::{OutputBackend, OutputFormat};
use crate::engine::RenderEngine;
use crate::error::{AudioError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use std::sync::Weak;
use std::thread::JoinHandle;

/// Default output device via CPAL
#[derive(Default)]
pub struct CpalOutput {
    worker: Option<(Sender<()>, JoinHandle<()>)>,
    format: Option<OutputFormat>,
}

impl CpalOutput {
    /// Create a backend for the host's default output device
    pub fn new() -> Self {
        Self::default()
    }

    fn open_stream(engine: Weak<RenderEngine>) -> Result<(cpal::Stream, OutputFormat)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::DeviceNotFound)?;

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Output(e.to_string()))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::Output(format!(
                "Unsupported device sample format: {:?}",
                supported.sample_format()
            )));
        }

        let config: cpal::StreamConfig = supported.into();
        let format = OutputFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    match engine.upgrade() {
                        Some(engine) => engine.render(data),
                        None => data.fill(0.0),
                    }
                },
                |err| tracing::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::Output(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::Output(e.to_string()))?;

        Ok((stream, format))
    }
}

impl OutputBackend for CpalOutput {
    fn start(&mut self, engine: Weak<RenderEngine>) -> Result<OutputFormat> {
        if let (Some(_), Some(format)) = (&self.worker, self.format) {
            return Ok(format);
        }

        let (ready_tx, ready_rx) = bounded::<Result<OutputFormat>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("cadence-cpal-output".to_string())
            .spawn(move || match Self::open_stream(engine) {
                Ok((stream, format)) => {
                    let _ = ready_tx.send(Ok(format));
                    // Keep the stream alive until asked to stop
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let format = ready_rx
            .recv()
            .map_err(|_| AudioError::Output("output thread exited during setup".to_string()))??;

        tracing::info!(
            "CPAL output started ({} Hz, {} ch)",
            format.sample_rate,
            format.channels
        );
        self.worker = Some((stop_tx, handle));
        self.format = Some(format);
        Ok(format)
    }

    fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::warn!("CPAL output thread panicked");
            }
        }
        self.format = None;
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
