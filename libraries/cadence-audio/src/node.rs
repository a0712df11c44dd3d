//! Render nodes
//!
//! A [`PlayerNode`] plays one scheduled [`AudioSource`] into the engine's mix
//! bus. Nodes are long-lived: they are attached once and re-used for every
//! track, only the scheduled source changes.

use crate::source::AudioSource;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Transport and gain surface of a node
///
/// This is the part of a node the crossfade logic needs; it lets fades be
/// driven against test doubles as well as real [`PlayerNode`]s.
pub trait RenderNode: Send + Sync {
    /// Start (or resume) rendering
    fn play(&self);

    /// Stop rendering but keep the scheduled source and position
    fn pause(&self);

    /// Stop rendering and drop the scheduled source
    fn stop(&self);

    /// Whether the node is currently rendering
    fn is_playing(&self) -> bool;

    /// Set node volume (0.0 to 1.0)
    fn set_volume(&self, volume: f32);

    /// Current node volume
    fn volume(&self) -> f32;
}

/// Result of one render call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOutcome {
    /// Output frames written into the block
    pub frames: usize,
    /// The source ran out during this block
    pub finished: bool,
}

struct NodeState {
    source: Option<Arc<dyn AudioSource>>,
    /// Read position in source frames (fractional while resampling)
    position: f64,
    playing: bool,
    /// Waiting to be started by the engine when the other node runs out
    armed: bool,
    volume: f32,
    track_gain: f32,
    scratch: Vec<f32>,
}

/// Node that renders a scheduled, decoded source
pub struct PlayerNode {
    label: String,
    state: Mutex<NodeState>,
}

impl PlayerNode {
    /// Create an idle node
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(NodeState {
                source: None,
                position: 0.0,
                playing: false,
                armed: false,
                volume: 1.0,
                track_gain: 1.0,
                scratch: Vec::new(),
            }),
        }
    }

    /// Node label used in logs
    pub fn label(&self) -> &str {
        &self.label
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        // A panic while holding the lock only leaves plain data behind
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Schedule `source` to play from `start_frame`
    ///
    /// Replaces whatever was scheduled before. The node does not start
    /// rendering until [`RenderNode::play`] (or the engine, when armed).
    pub fn schedule(&self, source: Arc<dyn AudioSource>, start_frame: u64) {
        let mut state = self.lock();
        let start = start_frame.min(source.frame_count());
        tracing::trace!("{}: scheduled source at frame {}", self.label, start);
        state.source = Some(source);
        state.position = start as f64;
        state.playing = false;
        state.armed = false;
    }

    /// Ask the engine to start this node at the exact frame its partner ends
    pub fn arm(&self) {
        let mut state = self.lock();
        if state.source.is_some() && !state.playing {
            state.armed = true;
        }
    }

    /// Whether the node is waiting for its partner to finish
    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    /// Clear the armed flag without starting the node
    pub fn disarm(&self) {
        self.lock().armed = false;
    }

    /// Per-track gain (normalization) applied on top of the node volume
    pub fn set_track_gain(&self, gain: f32) {
        self.lock().track_gain = gain.max(0.0);
    }

    /// Current per-track gain
    pub fn track_gain(&self) -> f32 {
        self.lock().track_gain
    }

    /// Currently scheduled source
    pub fn source(&self) -> Option<Arc<dyn AudioSource>> {
        self.lock().source.clone()
    }

    /// Render position within the scheduled source
    ///
    /// `None` when nothing is scheduled or the source has no timeline.
    pub fn position(&self) -> Option<Duration> {
        let state = self.lock();
        let source = state.source.as_ref()?;
        let rate = source.sample_rate();
        if rate == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(state.position.max(0.0) / f64::from(rate)))
    }

    /// Time left until the scheduled source runs out
    pub fn remaining(&self) -> Option<Duration> {
        let state = self.lock();
        let source = state.source.as_ref()?;
        let rate = source.sample_rate();
        if rate == 0 {
            return None;
        }
        let left = (source.frame_count() as f64 - state.position).max(0.0);
        Some(Duration::from_secs_f64(left / f64::from(rate)))
    }

    /// Whether the scheduled source has been rendered to its end
    pub fn is_finished(&self) -> bool {
        let state = self.lock();
        match state.source.as_ref() {
            Some(source) => state.position >= source.frame_count() as f64,
            None => false,
        }
    }

    /// Start playing if armed; used by the engine at the partner's end frame
    pub(crate) fn start_armed(&self) -> bool {
        let mut state = self.lock();
        if state.armed {
            state.armed = false;
            state.playing = true;
            true
        } else {
            false
        }
    }

    /// Mix this node into `out` (interleaved, `channels` wide)
    ///
    /// Adds into the buffer rather than overwriting. Source material is
    /// resampled to `output_rate` with linear interpolation and mapped onto
    /// the output channels. A node that reaches the end of its source stops
    /// playing and reports `finished`.
    pub fn render_into(&self, out: &mut [f32], channels: u16, output_rate: u32) -> RenderOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.playing || channels == 0 || output_rate == 0 {
            return RenderOutcome::default();
        }
        let Some(source) = state.source.clone() else {
            state.playing = false;
            return RenderOutcome::default();
        };

        let src_rate = source.sample_rate();
        let src_channels = usize::from(source.channels());
        let total = source.frame_count();
        if src_rate == 0 || src_channels == 0 || state.position >= total as f64 {
            state.playing = false;
            return RenderOutcome {
                frames: 0,
                finished: true,
            };
        }

        let out_channels = usize::from(channels);
        let out_frames = out.len() / out_channels;
        let step = f64::from(src_rate) / f64::from(output_rate);

        // Source span needed for this block, plus one frame for interpolation
        let first = state.position.floor() as u64;
        let span = ((out_frames as f64 * step).ceil() as usize) + 2;
        state.scratch.resize(span * src_channels, 0.0);
        let read = match source.read_frames(first, &mut state.scratch) {
            Ok(read) => read,
            Err(e) => {
                tracing::warn!("{}: source read failed, stopping node: {}", self.label, e);
                state.playing = false;
                state.source = None;
                return RenderOutcome {
                    frames: 0,
                    finished: true,
                };
            }
        };

        let gain = state.volume * state.track_gain;
        let mut written = 0;
        let mut finished = false;

        for frame in 0..out_frames {
            let pos = state.position + frame as f64 * step;
            if pos >= total as f64 {
                finished = true;
                break;
            }
            let offset = pos - first as f64;
            let idx = offset.floor() as usize;
            if idx >= read {
                finished = pos >= total as f64;
                break;
            }
            let frac = (offset - idx as f64) as f32;
            let next = if idx + 1 < read { idx + 1 } else { idx };

            let sample = |ch: usize| -> f32 {
                let a = state.scratch[idx * src_channels + ch];
                let b = state.scratch[next * src_channels + ch];
                a + (b - a) * frac
            };

            let (left, right) = if src_channels == 1 {
                let s = sample(0);
                (s, s)
            } else {
                (sample(0), sample(1))
            };

            let base = frame * out_channels;
            if out_channels == 1 {
                out[base] += (left + right) * 0.5 * gain;
            } else {
                out[base] += left * gain;
                out[base + 1] += right * gain;
            }
            written += 1;
        }

        state.position += written as f64 * step;
        if state.position >= total as f64 {
            state.position = total as f64;
            finished = true;
        }
        if finished {
            state.playing = false;
            tracing::trace!("{}: source finished", self.label);
        }

        RenderOutcome {
            frames: written,
            finished,
        }
    }
}

impl RenderNode for PlayerNode {
    fn play(&self) {
        let mut state = self.lock();
        state.armed = false;
        if state.source.is_some() {
            state.playing = true;
        }
    }

    fn pause(&self) {
        self.lock().playing = false;
    }

    fn stop(&self) {
        let mut state = self.lock();
        state.playing = false;
        state.armed = false;
        state.source = None;
        state.position = 0.0;
    }

    fn is_playing(&self) -> bool {
        self.lock().playing
    }

    fn set_volume(&self, volume: f32) {
        self.lock().volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.lock().volume
    }
}

impl fmt::Debug for PlayerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("PlayerNode")
            .field("label", &self.label)
            .field("scheduled", &state.source.is_some())
            .field("position", &state.position)
            .field("playing", &state.playing)
            .field("armed", &state.armed)
            .field("volume", &state.volume)
            .finish()
    }
}
