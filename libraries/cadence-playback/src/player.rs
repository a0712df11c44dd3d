//! The player actor
//!
//! [`AudioPlayer`] is a cheap, cloneable handle. Every transport and queue
//! operation is sent as a command to one task that owns the queue, the
//! transport state and the scheduler, so operations on a player are totally
//! ordered. Replies come back over oneshot channels; observers subscribe to
//! a broadcast stream of [`PlayerEvent`]s.
//!
//! Shared, lock-protected pieces (master volume, [`Equalizer`],
//! [`VolumeNormalizer`], crossfade settings) are reachable directly from the
//! handle without a round trip.
//!
//! ```text
//!  AudioPlayer ──Command──► PlayerCore ──► GaplessScheduler ──► PlayerNode ×2
//!       ▲                      │  ▲                                  │
//!       └──── PlayerEvent ─────┘  └── AdvanceTick / NextPrepared ◄── poller,
//!                                     TransitionFinished             decoder,
//!                                                                    crossfade
//! ```

use crate::config::PlayerConfig;
use crate::crossfade::{CrossfadeManager, CrossfadeSettings};
use crate::error::{PlaybackError, Result};
use crate::gapless::GaplessScheduler;
use crate::queue::PlaybackQueue;
use crate::types::{PlaybackState, PlayerEvent, PlayerSnapshot, QueueSnapshot, RepeatMode};
use cadence_audio::effects::{Equalizer, GraphicEqNode};
use cadence_audio::{AudioSource, OutputBackend, RenderEngine, RenderNode, SymphoniaDecoder};
use cadence_loudness::{LoudnessAnalyzer, LoudnessResult, VolumeNormalizer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Capacity of the event stream; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 64;

/// `previous()` restarts the current track past this point
const RESTART_THRESHOLD: Duration = Duration::from_secs(3);

/// How far ahead of a transition the next track gets decoded
const PREPARE_LEAD: Duration = Duration::from_secs(10);

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Load {
        path: String,
        reply: Reply<Result<()>>,
    },
    Play { reply: Reply<Result<()>> },
    Pause { reply: Reply<()> },
    Stop { reply: Reply<()> },
    Seek {
        position: Duration,
        reply: Reply<Result<()>>,
    },
    Next { reply: Reply<Result<()>> },
    Previous { reply: Reply<Result<()>> },
    PlayQueue {
        tracks: Vec<String>,
        start: usize,
        reply: Reply<Result<()>>,
    },
    Add {
        tracks: Vec<String>,
        reply: Reply<()>,
    },
    PlayNext { track: String, reply: Reply<()> },
    PlayLater { track: String, reply: Reply<()> },
    Shuffle { reply: Reply<()> },
    MoveTrack {
        from: usize,
        to: usize,
        strict: bool,
        reply: Reply<Result<()>>,
    },
    ClearQueue { reply: Reply<()> },
    SetRepeatMode { mode: RepeatMode, reply: Reply<()> },
    QueueSnapshot { reply: Reply<QueueSnapshot> },
    Snapshot { reply: Reply<PlayerSnapshot> },
    SetNormalization { enabled: bool, reply: Reply<()> },
    SetCrossfade {
        settings: CrossfadeSettings,
        reply: Reply<()>,
    },
    Shutdown { reply: Reply<()> },

    // Internal
    AdvanceTick { generation: u64 },
    NextPrepared {
        generation: u64,
        result: Result<DecodedTrack>,
    },
    TransitionFinished { token: u64 },
    RefreshGains,
}

#[derive(Clone)]
struct LoadedTrack {
    path: String,
    source: Arc<dyn AudioSource>,
    duration: Duration,
}

struct DecodedTrack {
    track: LoadedTrack,
    loudness: Option<LoudnessResult>,
}

fn decode_track(path: &str, analyzer: Option<LoudnessAnalyzer>) -> Result<DecodedTrack> {
    let audio = SymphoniaDecoder::new().decode(Path::new(path))?;
    let loudness = analyzer.map(|analyzer| analyzer.analyze(&audio));
    let source: Arc<dyn AudioSource> = Arc::new(audio);
    Ok(DecodedTrack {
        track: LoadedTrack {
            path: path.to_string(),
            duration: source.duration(),
            source,
        },
        loudness,
    })
}

/// Handle to a running player
///
/// Must be created inside a tokio runtime. The player task ends when every
/// handle is dropped or [`AudioPlayer::shutdown`] is called.
#[derive(Clone)]
pub struct AudioPlayer {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PlayerEvent>,
    engine: Arc<RenderEngine>,
    equalizer: Arc<Equalizer>,
    normalizer: Arc<VolumeNormalizer>,
    crossfade: Arc<CrossfadeManager>,
}

impl AudioPlayer {
    /// Build the render graph on `backend` and spawn the player task
    ///
    /// The backend is not started until the first `play()`.
    pub fn new(backend: Box<dyn OutputBackend>, config: PlayerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PlaybackError::Task(e.to_string()))?;

        let engine = RenderEngine::new(backend);
        engine.set_volume(config.volume);

        let eq_node = Arc::new(GraphicEqNode::new());
        engine.set_eq_node(Arc::clone(&eq_node));
        let equalizer = Arc::new(Equalizer::new());
        equalizer.bind(eq_node);
        config.equalizer.apply(&equalizer);

        let normalizer = Arc::new(VolumeNormalizer::new());
        normalizer.set_enabled(config.normalization.enabled);

        let crossfade = Arc::new(CrossfadeManager::new(config.crossfade.settings()));
        let scheduler = GaplessScheduler::new(Arc::clone(&crossfade));
        scheduler.attach_to(&engine);

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut queue = PlaybackQueue::default();
        queue.set_repeat_mode(config.repeat);

        let core = PlayerCore {
            engine: Arc::clone(&engine),
            scheduler,
            normalizer: Arc::clone(&normalizer),
            analyzer: LoudnessAnalyzer::with_target(config.normalization.target_loudness),
            events: events.clone(),
            commands: tx.downgrade(),
            queue,
            state: PlaybackState::Stopped,
            current: None,
            prepared: None,
            preparing: false,
            next_unavailable: false,
            transition: None,
            next_token: 0,
            poll_generation: 0,
            prepare_generation: 0,
            poller: None,
            poll_interval: config.advance_poll_interval(),
            lookahead: config.normalization.lookahead,
        };
        runtime.spawn(core.run(rx));

        tracing::info!("Audio player started");

        Ok(Self {
            commands: tx,
            events,
            engine,
            equalizer,
            normalizer,
            crossfade,
        })
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| PlaybackError::PlayerClosed)?;
        response.await.map_err(|_| PlaybackError::PlayerClosed)
    }

    // ===== Transport =====

    /// Replace the queue with `path` and decode it
    ///
    /// Stops current playback first. On failure the player is left Stopped
    /// with nothing loaded and the error is returned.
    pub async fn load(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        self.request(|reply| Command::Load { path, reply }).await?
    }

    /// Start or resume the loaded track
    pub async fn play(&self) -> Result<()> {
        self.request(|reply| Command::Play { reply }).await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// Stop output; the loaded track stays loaded and restarts from 0
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Jump within the loaded track, keeping the transport state
    pub async fn seek(&self, position: Duration) -> Result<()> {
        self.request(|reply| Command::Seek { position, reply }).await?
    }

    /// Skip to the next queued track
    pub async fn next(&self) -> Result<()> {
        self.request(|reply| Command::Next { reply }).await?
    }

    /// Restart the track, or go back in history near its start
    pub async fn previous(&self) -> Result<()> {
        self.request(|reply| Command::Previous { reply }).await?
    }

    /// Replace the queue and start playing `tracks[start]`
    pub async fn play_queue(&self, tracks: Vec<String>, start: usize) -> Result<()> {
        self.request(|reply| Command::PlayQueue {
            tracks,
            start,
            reply,
        })
        .await?
    }

    // ===== Queue =====

    pub async fn add<I>(&self, tracks: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let tracks = tracks.into_iter().map(Into::into).collect();
        self.request(|reply| Command::Add { tracks, reply }).await
    }

    pub async fn play_next(&self, track: impl Into<String>) -> Result<()> {
        let track = track.into();
        self.request(|reply| Command::PlayNext { track, reply }).await
    }

    pub async fn play_later(&self, track: impl Into<String>) -> Result<()> {
        let track = track.into();
        self.request(|reply| Command::PlayLater { track, reply }).await
    }

    pub async fn shuffle(&self) -> Result<()> {
        self.request(|reply| Command::Shuffle { reply }).await
    }

    /// Move an upcoming track; out-of-range indices are ignored
    pub async fn move_track(&self, from: usize, to: usize) -> Result<()> {
        self.request(|reply| Command::MoveTrack {
            from,
            to,
            strict: false,
            reply,
        })
        .await?
    }

    /// Move an upcoming track, reporting out-of-range indices
    pub async fn try_move_track(&self, from: usize, to: usize) -> Result<()> {
        self.request(|reply| Command::MoveTrack {
            from,
            to,
            strict: true,
            reply,
        })
        .await?
    }

    /// Drop everything but the current track
    pub async fn clear_queue(&self) -> Result<()> {
        self.request(|reply| Command::ClearQueue { reply }).await
    }

    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        self.request(|reply| Command::SetRepeatMode { mode, reply }).await
    }

    pub async fn queue_snapshot(&self) -> Result<QueueSnapshot> {
        self.request(|reply| Command::QueueSnapshot { reply }).await
    }

    // ===== Observation =====

    pub async fn snapshot(&self) -> Result<PlayerSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn state(&self) -> Result<PlaybackState> {
        Ok(self.snapshot().await?.state)
    }

    /// Render position in the loaded track; zero when nothing is loaded
    pub async fn current_time(&self) -> Result<Duration> {
        Ok(self.snapshot().await?.current_time)
    }

    /// Length of the loaded track; zero when nothing is loaded
    pub async fn duration(&self) -> Result<Duration> {
        Ok(self.snapshot().await?.duration)
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    // ===== Shared settings =====

    /// Master output gain (0.0 to 1.0), independent of EQ and normalization
    pub fn set_volume(&self, volume: f32) {
        self.engine.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.engine.volume()
    }

    pub fn equalizer(&self) -> &Arc<Equalizer> {
        &self.equalizer
    }

    pub fn normalizer(&self) -> &Arc<VolumeNormalizer> {
        &self.normalizer
    }

    pub fn crossfade_settings(&self) -> CrossfadeSettings {
        self.crossfade.settings()
    }

    /// Change crossfade settings; takes effect from the next transition
    pub async fn set_crossfade_settings(&self, settings: CrossfadeSettings) -> Result<()> {
        self.request(|reply| Command::SetCrossfade { settings, reply })
            .await
    }

    /// Toggle normalization; enabling analyzes the current and upcoming
    /// tracks in the background
    pub async fn set_normalization_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetNormalization { enabled, reply })
            .await
    }

    /// Stop playback and end the player task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

struct PlayerCore {
    engine: Arc<RenderEngine>,
    scheduler: GaplessScheduler,
    normalizer: Arc<VolumeNormalizer>,
    analyzer: LoudnessAnalyzer,
    events: broadcast::Sender<PlayerEvent>,
    /// Weak so background tasks never keep the player alive
    commands: mpsc::WeakUnboundedSender<Command>,

    queue: PlaybackQueue,
    state: PlaybackState,
    current: Option<LoadedTrack>,
    /// Next track, scheduled on the scheduler's next node
    prepared: Option<LoadedTrack>,
    preparing: bool,
    /// Nothing to prepare (queue end or decode failure)
    next_unavailable: bool,
    /// Token of the transition whose completion is outstanding
    transition: Option<u64>,
    next_token: u64,

    poll_generation: u64,
    prepare_generation: u64,
    poller: Option<JoinHandle<()>>,
    poll_interval: Duration,
    lookahead: usize,
}

impl PlayerCore {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            if !self.handle(command).await {
                break;
            }
        }
        self.stop();
        tracing::info!("Audio player stopped");
    }

    /// Returns `false` once the player should shut down
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Load { path, reply } => {
                self.halt();
                let repeat = self.queue.repeat_mode();
                self.queue = PlaybackQueue::new(vec![path.clone()], 0);
                self.queue.set_repeat_mode(repeat);
                let _ = reply.send(self.load_track(path).await);
            }
            Command::Play { reply } => {
                let _ = reply.send(self.play());
            }
            Command::Pause { reply } => {
                self.pause();
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::Seek { position, reply } => {
                let _ = reply.send(self.seek(position));
            }
            Command::Next { reply } => {
                let _ = reply.send(self.next().await);
            }
            Command::Previous { reply } => {
                let _ = reply.send(self.previous().await);
            }
            Command::PlayQueue {
                tracks,
                start,
                reply,
            } => {
                let _ = reply.send(self.play_queue(tracks, start).await);
            }
            Command::Add { tracks, reply } => {
                self.edit_queue(|queue| queue.add(tracks));
                let _ = reply.send(());
            }
            Command::PlayNext { track, reply } => {
                self.edit_queue(|queue| queue.play_next(track));
                let _ = reply.send(());
            }
            Command::PlayLater { track, reply } => {
                self.edit_queue(|queue| queue.play_later(track));
                let _ = reply.send(());
            }
            Command::Shuffle { reply } => {
                self.edit_queue(PlaybackQueue::shuffle);
                let _ = reply.send(());
            }
            Command::MoveTrack {
                from,
                to,
                strict,
                reply,
            } => {
                let result = self.edit_queue(|queue| {
                    if strict {
                        queue.try_move_track(from, to)
                    } else {
                        queue.move_track(from, to);
                        Ok(())
                    }
                });
                let _ = reply.send(result);
            }
            Command::ClearQueue { reply } => {
                self.edit_queue(PlaybackQueue::clear);
                let _ = reply.send(());
            }
            Command::SetRepeatMode { mode, reply } => {
                self.edit_queue(|queue| queue.set_repeat_mode(mode));
                let _ = reply.send(());
            }
            Command::QueueSnapshot { reply } => {
                let _ = reply.send(self.queue.snapshot());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::SetNormalization { enabled, reply } => {
                self.set_normalization(enabled);
                let _ = reply.send(());
            }
            Command::SetCrossfade { settings, reply } => {
                self.settle_transition();
                self.scheduler.crossfade().set_settings(settings);
                self.invalidate_prepared();
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
                return false;
            }
            Command::AdvanceTick { generation } => self.on_advance_tick(generation).await,
            Command::NextPrepared { generation, result } => {
                self.on_next_prepared(generation, result);
            }
            Command::TransitionFinished { token } => {
                if self.transition == Some(token) {
                    self.commit_transition();
                }
            }
            Command::RefreshGains => self.refresh_gains(),
        }
        true
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            tracing::debug!("Playback state: {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(PlayerEvent::StateChanged(state));
        }
    }

    fn track_gain(&self, path: &str) -> f32 {
        self.normalizer.gain_for(path) as f32
    }

    fn analyzer_for(&self, path: &str) -> Option<LoudnessAnalyzer> {
        (self.normalizer.is_enabled() && !self.normalizer.contains(path)).then_some(self.analyzer)
    }

    // ===== Transport =====

    /// Silence both nodes and drop any prepared track; the engine keeps running
    fn halt(&mut self) {
        self.settle_transition();
        self.stop_poller();
        self.scheduler.stop_all();
        self.prepared = None;
        self.prepare_generation += 1;
        self.preparing = false;
        self.next_unavailable = false;
    }

    async fn load_track(&mut self, path: String) -> Result<()> {
        self.halt();
        self.current = None;
        self.set_state(PlaybackState::Loading);

        let analyzer = self.analyzer_for(&path);
        let decode_path = path.clone();
        let decoded = match tokio::task::spawn_blocking(move || {
            decode_track(&decode_path, analyzer)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };

        match decoded {
            Ok(DecodedTrack { track, loudness }) => {
                if let Some(result) = loudness {
                    self.normalizer.store(result, track.path.clone());
                }

                let node = self.scheduler.active_node();
                node.schedule(Arc::clone(&track.source), 0);
                node.set_track_gain(self.track_gain(&track.path));

                tracing::info!("Loaded {} ({:.1}s)", track.path, track.duration.as_secs_f64());
                let event = PlayerEvent::TrackChanged {
                    path: track.path.clone(),
                    duration: track.duration,
                };
                self.current = Some(track);
                self.set_state(PlaybackState::Stopped);
                self.emit(event);
                self.precompute_upcoming();
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to load {}: {}", path, e);
                self.set_state(PlaybackState::Stopped);
                self.emit(PlayerEvent::Error(format!("Failed to load {}: {}", path, e)));
                Err(e)
            }
        }
    }

    fn play(&mut self) -> Result<()> {
        let Some(track) = self.current.clone() else {
            return Err(PlaybackError::NoTrackLoaded);
        };
        if self.state == PlaybackState::Playing {
            return Ok(());
        }

        self.engine.start()?;

        let node = self.scheduler.active_node();
        if node.source().is_none() || node.is_finished() {
            node.schedule(track.source, 0);
            node.set_track_gain(self.track_gain(&track.path));
        }
        node.play();

        self.set_state(PlaybackState::Playing);
        self.start_poller();
        Ok(())
    }

    fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.settle_transition();
        self.stop_poller();
        self.scheduler.active_node().pause();
        self.set_state(PlaybackState::Paused);
    }

    fn stop(&mut self) {
        self.halt();
        self.engine.stop();
        self.set_state(PlaybackState::Stopped);
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.settle_transition();
        let Some(track) = self.current.clone() else {
            return Err(PlaybackError::NoTrackLoaded);
        };

        let position = position.min(track.duration);
        let frame = (position.as_secs_f64() * f64::from(track.source.sample_rate())) as u64;
        let was_playing = self.state == PlaybackState::Playing;

        self.stop_poller();
        let node = self.scheduler.active_node();
        node.stop();
        node.schedule(track.source, frame);
        node.set_track_gain(self.track_gain(&track.path));

        if was_playing {
            node.play();
            self.start_poller();
        }
        tracing::debug!("Seeked to {:.2}s", position.as_secs_f64());
        Ok(())
    }

    async fn next(&mut self) -> Result<()> {
        self.settle_transition();
        self.invalidate_prepared();
        let was_playing = self.state == PlaybackState::Playing;

        match self.queue.advance().map(str::to_string) {
            Some(path) => self.load_and_resume(path, was_playing).await,
            None => {
                self.stop();
                self.emit(PlayerEvent::QueueEnded);
                Ok(())
            }
        }
    }

    async fn previous(&mut self) -> Result<()> {
        self.settle_transition();
        if self.current.is_some() && self.current_time() > RESTART_THRESHOLD {
            return self.seek(Duration::ZERO);
        }

        self.invalidate_prepared();
        let was_playing = self.state == PlaybackState::Playing;
        match self.queue.go_back().map(str::to_string) {
            Some(path) => self.load_and_resume(path, was_playing).await,
            None if self.current.is_some() => self.seek(Duration::ZERO),
            None => Ok(()),
        }
    }

    async fn play_queue(&mut self, tracks: Vec<String>, start: usize) -> Result<()> {
        self.halt();
        let repeat = self.queue.repeat_mode();
        self.queue = PlaybackQueue::new(tracks, start);
        self.queue.set_repeat_mode(repeat);

        match self.queue.current().map(str::to_string) {
            Some(path) => self.load_and_resume(path, true).await,
            None => {
                self.stop();
                self.current = None;
                Ok(())
            }
        }
    }

    async fn load_and_resume(&mut self, path: String, resume: bool) -> Result<()> {
        self.load_track(path).await?;
        if resume {
            self.play()?;
        }
        Ok(())
    }

    fn current_time(&self) -> Duration {
        if self.current.is_none() {
            return Duration::ZERO;
        }
        self.scheduler.active_node().position().unwrap_or_default()
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.state,
            current_track: self.current.as_ref().map(|t| t.path.clone()),
            current_time: self.current_time(),
            duration: self.current.as_ref().map_or(Duration::ZERO, |t| t.duration),
            volume: self.engine.volume(),
            repeat_mode: self.queue.repeat_mode(),
        }
    }

    fn edit_queue<R>(&mut self, edit: impl FnOnce(&mut PlaybackQueue) -> R) -> R {
        let before = self.queue.peek_next().map(str::to_string);
        let output = edit(&mut self.queue);
        if self.queue.peek_next() != before.as_deref() {
            self.invalidate_prepared();
        }
        self.precompute_upcoming();
        output
    }

    // ===== Track advance =====

    fn start_poller(&mut self) {
        self.stop_poller();
        let generation = self.poll_generation;
        let commands = self.commands.clone();
        let period = self.poll_interval;

        self.poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tx) = commands.upgrade() else {
                    break;
                };
                if tx.send(Command::AdvanceTick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_poller(&mut self) {
        self.poll_generation += 1;
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }

    async fn on_advance_tick(&mut self, generation: u64) {
        if generation != self.poll_generation
            || self.state != PlaybackState::Playing
            || self.transition.is_some()
        {
            return;
        }

        let active = self.scheduler.active_node();
        let remaining = active.remaining().unwrap_or_default();
        let finished = active.is_finished();
        let settings = self.scheduler.crossfade().settings();

        if self.prepared.is_some() {
            let due = if settings.overlaps() {
                remaining <= settings.duration
            } else {
                finished
            };
            if due {
                self.begin_transition();
            }
            return;
        }

        let window = if settings.overlaps() {
            settings.duration
        } else {
            Duration::ZERO
        };
        if !self.preparing && !self.next_unavailable && remaining <= window + PREPARE_LEAD {
            self.prepare_next();
        }

        if finished && !self.preparing && self.prepared.is_none() {
            self.finish_without_transition().await;
        }
    }

    fn prepare_next(&mut self) {
        let Some(path) = self.queue.peek_next().map(str::to_string) else {
            self.next_unavailable = true;
            return;
        };

        self.preparing = true;
        let generation = self.prepare_generation;

        // Repeat One (or a one-track Repeat All queue) replays the same audio
        if let Some(track) = self.current.clone().filter(|t| t.path == path) {
            self.on_next_prepared(
                generation,
                Ok(DecodedTrack {
                    track,
                    loudness: None,
                }),
            );
            return;
        }

        tracing::debug!("Preparing next track {}", path);
        let analyzer = self.analyzer_for(&path);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || decode_track(&path, analyzer))
                .await
            {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::NextPrepared { generation, result });
            }
        });
    }

    fn on_next_prepared(&mut self, generation: u64, result: Result<DecodedTrack>) {
        if generation != self.prepare_generation {
            return;
        }
        self.preparing = false;

        match result {
            Ok(DecodedTrack { track, loudness }) => {
                if let Some(result) = loudness {
                    self.normalizer.store(result, track.path.clone());
                }
                self.scheduler
                    .schedule_next(Arc::clone(&track.source), Duration::ZERO);
                self.scheduler
                    .next_node()
                    .set_track_gain(self.track_gain(&track.path));
                if !self.scheduler.crossfade().settings().overlaps() {
                    self.scheduler.arm_next();
                }
                self.prepared = Some(track);
            }
            Err(e) => {
                tracing::warn!("Failed to prepare next track: {}", e);
                self.next_unavailable = true;
                self.emit(PlayerEvent::Error(format!("Failed to prepare next track: {}", e)));
            }
        }
    }

    fn begin_transition(&mut self) {
        let token = self.next_token;
        self.next_token += 1;
        self.transition = Some(token);

        let commands = self.commands.clone();
        self.scheduler.transition_to_next(move || {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::TransitionFinished { token });
            }
        });
    }

    fn commit_transition(&mut self) {
        self.transition = None;
        let Some(track) = self.prepared.take() else {
            return;
        };

        // Edits during the handoff may have moved the track; the queue follows what plays
        if self.queue.peek_next() != Some(track.path.as_str()) {
            tracing::debug!("Queue changed under transition to {}", track.path);
        }
        self.queue.advance_onto(&track.path);

        self.prepare_generation += 1;
        self.preparing = false;
        self.next_unavailable = false;

        if let Some(finished) = self.current.take() {
            self.emit(PlayerEvent::TrackFinished(finished.path));
        }
        tracing::info!("Now playing {}", track.path);
        self.emit(PlayerEvent::TrackChanged {
            path: track.path.clone(),
            duration: track.duration,
        });
        self.current = Some(track);
        self.precompute_upcoming();
    }

    /// Finish or roll back any transition so the active node is current
    fn settle_transition(&mut self) {
        if self.transition.is_none()
            && self.prepared.is_some()
            && self.scheduler.next_node().is_playing()
        {
            // The engine already started the armed node
            self.begin_transition();
        }
        if self.transition.is_none() {
            return;
        }

        if self.scheduler.cancel_transition() {
            self.transition = None;
            self.prepared = None;
            self.prepare_generation += 1;
            self.preparing = false;
        } else {
            self.commit_transition();
        }
    }

    fn invalidate_prepared(&mut self) {
        if self.transition.is_some() || self.scheduler.next_node().is_playing() {
            return;
        }
        self.prepare_generation += 1;
        self.preparing = false;
        self.next_unavailable = false;
        if self.prepared.take().is_some() {
            let next = self.scheduler.next_node();
            next.disarm();
            next.stop();
        }
    }

    /// The current track ended with nothing scheduled behind it
    async fn finish_without_transition(&mut self) {
        if let Some(finished) = self.current.as_ref().map(|t| t.path.clone()) {
            self.emit(PlayerEvent::TrackFinished(finished));
        }

        for _ in 0..self.queue.len().max(1) {
            let Some(path) = self.queue.advance().map(str::to_string) else {
                break;
            };
            if self.load_and_resume(path, true).await.is_ok() {
                return;
            }
        }

        tracing::info!("Queue ended");
        self.stop();
        self.emit(PlayerEvent::QueueEnded);
    }

    // ===== Normalization =====

    fn set_normalization(&mut self, enabled: bool) {
        self.normalizer.set_enabled(enabled);
        tracing::debug!("Volume normalization {}", if enabled { "enabled" } else { "disabled" });
        self.refresh_gains();

        if enabled {
            let paths: Vec<String> = self
                .current
                .iter()
                .map(|t| t.path.clone())
                .filter(|path| !self.normalizer.contains(path))
                .collect();
            self.analyze_in_background(paths);
            self.precompute_upcoming();
        }
    }

    fn precompute_upcoming(&self) {
        if !self.normalizer.is_enabled() || self.lookahead == 0 {
            return;
        }
        let paths: Vec<String> = self
            .queue
            .upcoming()
            .iter()
            .filter(|path| !self.normalizer.contains(path))
            .take(self.lookahead)
            .cloned()
            .collect();
        self.analyze_in_background(paths);
    }

    fn analyze_in_background(&self, paths: Vec<String>) {
        if paths.is_empty() {
            return;
        }
        let normalizer = Arc::clone(&self.normalizer);
        let analyzer = self.analyzer;
        let commands = self.commands.clone();

        tokio::task::spawn_blocking(move || {
            let results = analyzer.analyze_batch_paths(&paths, |done, total| {
                tracing::trace!("Loudness analysis {}/{}", done, total);
            });
            for (path, result) in results {
                normalizer.store(result, path);
            }
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::RefreshGains);
            }
        });
    }

    fn refresh_gains(&self) {
        if self.transition.is_some() {
            return;
        }
        if let Some(track) = &self.current {
            self.scheduler
                .active_node()
                .set_track_gain(self.track_gain(&track.path));
        }
        if let Some(track) = &self.prepared {
            self.scheduler
                .next_node()
                .set_track_gain(self.track_gain(&track.path));
        }
    }
}
