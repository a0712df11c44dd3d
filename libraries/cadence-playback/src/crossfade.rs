//! Timed crossfades between two render nodes
//!
//! A fade runs on its own timer thread, stepping node volumes 30 times per
//! second. The manager's lock is the only synchronization point between that
//! thread and the controller: every tick re-checks under the lock that its
//! fade is still the active one, so cancelling is immediate.
//!
//! Provides multiple fade curve types:
//! - Equal Power: constant perceived loudness (default)
//! - Linear: simple, but dips about 3 dB at the midpoint
//! - S-Curve: slow start and end

use cadence_audio::RenderNode;
use crossbeam_channel::{bounded, select, tick, Sender};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Timer resolution of a fade
pub const STEPS_PER_SECOND: u32 = 30;

/// Longest crossfade accepted; longer requests are capped
pub const MAX_DURATION: Duration = Duration::from_secs(10);

/// Crossfade curve type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear fade: amplitudes sum to 1, power dips mid-fade
    Linear,

    /// S-Curve fade: slow start, fast middle, slow end
    SCurve,

    /// Equal power fade: `cos`/`sin` quarter waves, constant power
    #[default]
    EqualPower,
}

impl FadeCurve {
    /// Volumes `(outgoing, incoming)` at `progress` in [0, 1]
    #[inline]
    pub fn gains(&self, progress: f32) -> (f32, f32) {
        let p = progress.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => (1.0 - p, p),
            FadeCurve::SCurve => {
                let s = (1.0 - (PI * p).cos()) * 0.5;
                (1.0 - s, s)
            }
            FadeCurve::EqualPower => ((p * PI * 0.5).cos(), (p * PI * 0.5).sin()),
        }
    }

    /// Get a human-readable name for the curve
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::SCurve => "S-Curve",
            FadeCurve::EqualPower => "Equal Power",
        }
    }
}

/// Crossfade settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeSettings {
    /// Whether transitions overlap; when false they are hard (gapless) cuts
    pub enabled: bool,

    /// Length of the overlap
    pub duration: Duration,

    /// Fade curve type
    pub curve: FadeCurve,
}

impl Default for CrossfadeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: Duration::from_secs(3),
            curve: FadeCurve::EqualPower,
        }
    }
}

impl CrossfadeSettings {
    /// Enabled settings with the given duration
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            enabled: true,
            duration: duration.min(MAX_DURATION),
            ..Self::default()
        }
    }

    /// Whether a transition would overlap the two tracks
    pub fn overlaps(&self) -> bool {
        self.enabled && !self.duration.is_zero()
    }
}

struct ActiveFade {
    id: u64,
    /// Dropping this wakes the timer thread and ends it
    _cancel: Sender<()>,
}

struct FadeState {
    settings: CrossfadeSettings,
    active: Option<ActiveFade>,
    next_id: u64,
}

type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Drives volume ramps between an outgoing and an incoming node
pub struct CrossfadeManager {
    state: Arc<Mutex<FadeState>>,
}

fn lock(state: &Mutex<FadeState>) -> MutexGuard<'_, FadeState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl CrossfadeManager {
    pub fn new(settings: CrossfadeSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(FadeState {
                settings: capped(settings),
                active: None,
                next_id: 0,
            })),
        }
    }

    pub fn settings(&self) -> CrossfadeSettings {
        lock(&self.state).settings
    }

    /// Replace the settings; a running fade keeps its original timing
    pub fn set_settings(&self, settings: CrossfadeSettings) {
        lock(&self.state).settings = capped(settings);
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).settings.enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.state).settings.enabled = enabled;
    }

    pub fn duration(&self) -> Duration {
        lock(&self.state).settings.duration
    }

    pub fn set_duration(&self, duration: Duration) {
        lock(&self.state).settings.duration = duration.min(MAX_DURATION);
    }

    /// Whether a fade timer is running
    pub fn is_fading(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    /// Hand playback from `outgoing` to `incoming`
    ///
    /// Cancels any fade still in flight first. When crossfading is disabled
    /// (or the duration is zero) this is a synchronous hard cutover: the
    /// outgoing node stops, the incoming one plays at full volume and
    /// `on_complete` runs before returning. Otherwise the incoming node
    /// starts silent and a timer thread ramps both volumes; on the last step
    /// the outgoing node is stopped, both volumes go back to 1.0 and
    /// `on_complete` runs on the timer thread.
    pub fn crossfade<F>(
        &self,
        outgoing: Arc<dyn RenderNode>,
        incoming: Arc<dyn RenderNode>,
        on_complete: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        self.cancel_fade();

        let settings = self.settings();
        if !settings.overlaps() {
            hard_cutover(outgoing.as_ref(), incoming.as_ref());
            on_complete();
            return;
        }

        let steps =
            ((settings.duration.as_secs_f64() * f64::from(STEPS_PER_SECOND)).round() as u32).max(1);
        let interval = settings.duration / steps;
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.active = Some(ActiveFade {
                id,
                _cancel: cancel_tx,
            });
            id
        };

        incoming.set_volume(0.0);
        incoming.play();

        tracing::debug!(
            "Starting {} crossfade over {:?} ({} steps)",
            settings.curve.display_name(),
            settings.duration,
            steps
        );

        let state = Arc::clone(&self.state);
        let fade_out = Arc::clone(&outgoing);
        let fade_in = Arc::clone(&incoming);
        let on_complete: Completion = Box::new(on_complete);

        let spawned = std::thread::Builder::new()
            .name("cadence-crossfade".to_string())
            .spawn(move || {
                run_fade(
                    &state,
                    id,
                    steps,
                    interval,
                    settings.curve,
                    fade_out.as_ref(),
                    fade_in.as_ref(),
                    cancel_rx,
                    on_complete,
                );
            });

        if let Err(e) = spawned {
            // The closure (and its completion) was dropped with the failed spawn
            tracing::error!("Failed to start crossfade timer, cutting over: {}", e);
            lock(&self.state).active = None;
            hard_cutover(outgoing.as_ref(), incoming.as_ref());
        }
    }

    /// Stop any running fade immediately
    ///
    /// Node volumes are left where the fade put them and the completion is
    /// never invoked. Returns whether a fade was running.
    pub fn cancel_fade(&self) -> bool {
        let cancelled = lock(&self.state).active.take().is_some();
        if cancelled {
            tracing::debug!("Crossfade cancelled");
        }
        cancelled
    }
}

impl Default for CrossfadeManager {
    fn default() -> Self {
        Self::new(CrossfadeSettings::default())
    }
}

fn hard_cutover(outgoing: &dyn RenderNode, incoming: &dyn RenderNode) {
    outgoing.stop();
    incoming.set_volume(1.0);
    incoming.play();
}

fn capped(settings: CrossfadeSettings) -> CrossfadeSettings {
    CrossfadeSettings {
        duration: settings.duration.min(MAX_DURATION),
        ..settings
    }
}

#[allow(clippy::too_many_arguments)]
fn run_fade(
    state: &Mutex<FadeState>,
    id: u64,
    steps: u32,
    interval: Duration,
    curve: FadeCurve,
    outgoing: &dyn RenderNode,
    incoming: &dyn RenderNode,
    cancel: crossbeam_channel::Receiver<()>,
    on_complete: Completion,
) {
    let ticker = tick(interval);
    let mut step = 0u32;

    loop {
        select! {
            recv(cancel) -> _ => return,
            recv(ticker) -> _ => {
                step += 1;
                let mut guard = lock(state);
                if guard.active.as_ref().map(|fade| fade.id) != Some(id) {
                    return;
                }

                let (out_gain, in_gain) = curve.gains(step as f32 / steps as f32);
                outgoing.set_volume(out_gain);
                incoming.set_volume(in_gain);

                if step >= steps {
                    guard.active = None;
                    outgoing.stop();
                    outgoing.set_volume(1.0);
                    incoming.set_volume(1.0);
                    drop(guard);

                    tracing::debug!("Crossfade complete");
                    on_complete();
                    return;
                }
            }
        }
    }
}
