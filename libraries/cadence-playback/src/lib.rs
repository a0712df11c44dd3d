//! Cadence Player Playback
//!
//! Queue management, transitions and the player actor.
//!
//! # Features
//!
//! - **Queue**: ordered track paths with back-navigation history, shuffle of
//!   the upcoming tracks and repeat modes (off, one, all)
//! - **Crossfade**: timed volume ramps between two render nodes on a
//!   dedicated timer thread (equal power by default)
//! - **Gapless**: a fixed pair of nodes; the next track is pre-loaded on the
//!   idle node and started on the exact frame the current one ends
//! - **Player**: a tokio actor owning transport state, with auto-advance,
//!   loudness normalization and an event stream
//!
//! # Example
//!
//! ```rust,no_run
//! use cadence_audio::NullOutput;
//! use cadence_playback::{AudioPlayer, PlayerConfig, PlayerEvent};
//!
//! # async fn example() -> cadence_playback::Result<()> {
//! let player = AudioPlayer::new(Box::new(NullOutput::default()), PlayerConfig::default())?;
//! let mut events = player.subscribe();
//!
//! player
//!     .play_queue(vec!["one.flac".into(), "two.flac".into()], 0)
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if event == PlayerEvent::QueueEnded {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crossfade;
mod error;
pub mod gapless;
mod player;
pub mod queue;
mod types;

pub use config::PlayerConfig;
pub use crossfade::{CrossfadeManager, CrossfadeSettings, FadeCurve};
pub use error::{PlaybackError, Result};
pub use gapless::GaplessScheduler;
pub use player::AudioPlayer;
pub use queue::PlaybackQueue;
pub use types::{PlaybackState, PlayerEvent, PlayerSnapshot, QueueSnapshot, RepeatMode};
