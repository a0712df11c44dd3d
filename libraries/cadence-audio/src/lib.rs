//! Cadence Player Audio
//!
//! The render-side half of the Cadence playback core.
//!
//! This crate provides:
//! - Decoded audio sources ([`AudioSource`], [`DecodedAudio`])
//! - Audio decoding via Symphonia (MP3, FLAC, OGG, WAV, AAC)
//! - Render nodes that play a scheduled source with their own volume
//! - A pull-model render engine that mixes nodes, runs the EQ and applies
//!   the master gain
//! - Output backends (headless, manual, and CPAL behind the `desktop` feature)
//! - A 10-band graphic equalizer: the lock-protected gain model
//!   ([`Equalizer`](effects::Equalizer)) and the biquad node it drives
//!
//! # Signal path
//!
//! ```text
//! ┌────────────┐   ┌────────────┐
//! │ PlayerNode │   │ PlayerNode │   (volume × track gain per node)
//! └─────┬──────┘   └─────┬──────┘
//!       └───────┬────────┘
//!               ▼
//!        ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//!        │     mix      │ ──► │ GraphicEqNode│ ──► │ master volume│ ──► output
//!        └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Example: rendering offline
//!
//! ```rust
//! use cadence_audio::{DecodedAudio, ManualOutput, PlayerNode, RenderEngine, RenderNode};
//! use std::sync::Arc;
//!
//! # fn example() -> cadence_audio::Result<()> {
//! let engine = RenderEngine::new(Box::new(ManualOutput::new(48_000, 2)));
//! let node = Arc::new(PlayerNode::new("main"));
//! engine.attach(node.clone());
//!
//! let tone = DecodedAudio::new(vec![0.25; 48_000 * 2], 48_000, 2);
//! node.schedule(Arc::new(tone), 0);
//! node.play();
//!
//! engine.start()?;
//! let mut block = vec![0.0f32; 1024];
//! engine.render(&mut block);
//! assert!(block.iter().all(|s| (*s - 0.25).abs() < 1e-6));
//! # Ok(())
//! # }
//! ```

mod decoder;
pub mod effects;
mod engine;
mod error;
mod node;
pub mod output;
mod source;

pub use decoder::SymphoniaDecoder;
pub use engine::RenderEngine;
pub use error::{AudioError, Result};
pub use node::{PlayerNode, RenderNode, RenderOutcome};
pub use output::{ManualOutput, NullOutput, OutputBackend, OutputFormat};
pub use source::{AudioSource, DecodedAudio};

#[cfg(feature = "desktop")]
pub use output::CpalOutput;
