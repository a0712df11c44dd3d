//! Player actor integration tests
//!
//! Every test drives a real player on the headless output with WAV fixtures
//! written by hound, so timings are real time but short.

mod common;

use cadence_audio::{AudioError, OutputBackend, OutputFormat, RenderEngine};
use cadence_playback::{
    AudioPlayer, CrossfadeSettings, PlaybackError, PlaybackState, PlayerConfig, PlayerEvent,
    RepeatMode,
};
use common::{path_string, test_player, wait_for_event, write_tone};
use std::sync::Weak;
use std::time::Duration;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

// ===== Loading =====

#[tokio::test]
async fn test_load_missing_file_leaves_player_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let player = test_player(PlayerConfig::default());
    let mut events = player.subscribe();

    let result = player.load(path_string(&dir.path().join("missing.wav"))).await;
    assert!(matches!(
        result,
        Err(PlaybackError::Audio(AudioError::FileNotFound(_)))
    ));

    let snapshot = player.snapshot().await.unwrap();
    assert_eq!(snapshot.state, PlaybackState::Stopped);
    assert_eq!(snapshot.duration, Duration::ZERO);
    assert_eq!(snapshot.current_track, None);

    let error =
        wait_for_event(&mut events, EVENT_TIMEOUT, |e| matches!(e, PlayerEvent::Error(_))).await;
    assert!(error.is_some());
}

#[tokio::test]
async fn test_load_reports_duration_and_track_changed() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_string(&write_tone(dir.path(), "tone.wav", 1.5));
    let player = test_player(PlayerConfig::default());
    let mut events = player.subscribe();

    player.load(path.clone()).await.unwrap();

    assert_eq!(player.state().await.unwrap(), PlaybackState::Stopped);
    assert!((secs(player.duration().await.unwrap()) - 1.5).abs() < 0.01);

    let changed = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, PlayerEvent::TrackChanged { .. })
    })
    .await;
    assert!(matches!(changed, Some(PlayerEvent::TrackChanged { path: p, .. }) if p == path));
}

#[tokio::test]
async fn test_play_without_track_is_error() {
    let player = test_player(PlayerConfig::default());
    assert!(matches!(player.play().await, Err(PlaybackError::NoTrackLoaded)));
    assert!(matches!(
        player.seek(Duration::from_secs(1)).await,
        Err(PlaybackError::NoTrackLoaded)
    ));
}

// ===== Transport =====

#[tokio::test]
async fn test_seek_preserves_playing_and_paused_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_string(&write_tone(dir.path(), "three.wav", 3.0));
    let player = test_player(PlayerConfig::default());

    player.load(path).await.unwrap();
    player.play().await.unwrap();
    player.seek(Duration::from_secs_f64(1.5)).await.unwrap();

    assert_eq!(player.state().await.unwrap(), PlaybackState::Playing);
    let time = secs(player.current_time().await.unwrap());
    assert!((1.45..1.9).contains(&time), "time {time}");

    player.pause().await.unwrap();
    player.seek(Duration::from_secs_f64(1.0)).await.unwrap();
    assert_eq!(player.state().await.unwrap(), PlaybackState::Paused);
    let time = secs(player.current_time().await.unwrap());
    assert!((time - 1.0).abs() < 0.01, "time {time}");

    // Paused position does not move
    tokio::time::sleep(Duration::from_millis(100)).await;
    let later = secs(player.current_time().await.unwrap());
    assert!((later - time).abs() < 1e-6);
}

#[tokio::test]
async fn test_seek_is_clamped_to_duration() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_string(&write_tone(dir.path(), "short.wav", 1.0));
    let player = test_player(PlayerConfig::default());

    player.load(path).await.unwrap();
    player.seek(Duration::from_secs(60)).await.unwrap();
    let time = secs(player.current_time().await.unwrap());
    assert!((time - 1.0).abs() < 0.01);
}

#[tokio::test]
async fn test_position_advances_while_playing() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_string(&write_tone(dir.path(), "tone.wav", 3.0));
    let player = test_player(PlayerConfig::default());

    player.load(path).await.unwrap();
    player.play().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let time = secs(player.current_time().await.unwrap());
    assert!(time > 0.1, "time {time}");
}

#[tokio::test]
async fn test_stop_keeps_track_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_string(&write_tone(dir.path(), "tone.wav", 2.0));
    let player = test_player(PlayerConfig::default());

    player.load(path.clone()).await.unwrap();
    player.play().await.unwrap();
    player.stop().await.unwrap();

    let snapshot = player.snapshot().await.unwrap();
    assert_eq!(snapshot.state, PlaybackState::Stopped);
    assert_eq!(snapshot.current_track.as_deref(), Some(path.as_str()));
    assert_eq!(snapshot.current_time, Duration::ZERO);

    player.play().await.unwrap();
    assert_eq!(player.state().await.unwrap(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_state_events_follow_transport() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_string(&write_tone(dir.path(), "tone.wav", 2.0));
    let player = test_player(PlayerConfig::default());
    let mut events = player.subscribe();

    player.load(path).await.unwrap();
    player.play().await.unwrap();
    player.pause().await.unwrap();
    player.stop().await.unwrap();

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::StateChanged(state) = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        [
            PlaybackState::Loading,
            PlaybackState::Stopped,
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Stopped,
        ]
    );
}

#[tokio::test]
async fn test_volume_is_clamped() {
    let player = test_player(PlayerConfig::default());
    player.set_volume(0.5);
    assert_eq!(player.volume(), 0.5);
    player.set_volume(2.0);
    assert_eq!(player.volume(), 1.0);
    player.set_volume(-1.0);
    assert_eq!(player.volume(), 0.0);
}

struct FailingOutput;

impl OutputBackend for FailingOutput {
    fn start(&mut self, _engine: Weak<RenderEngine>) -> cadence_audio::Result<OutputFormat> {
        Err(AudioError::DeviceNotFound)
    }

    fn stop(&mut self) {}

    fn name(&self) -> &str {
        "failing"
    }
}

#[tokio::test]
async fn test_engine_start_failure_propagates_from_play() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_string(&write_tone(dir.path(), "tone.wav", 1.0));
    let player = AudioPlayer::new(Box::new(FailingOutput), PlayerConfig::default()).unwrap();

    player.load(path).await.unwrap();
    assert!(matches!(
        player.play().await,
        Err(PlaybackError::Audio(AudioError::DeviceNotFound))
    ));
    assert_eq!(player.state().await.unwrap(), PlaybackState::Stopped);
}

// ===== Queue navigation =====

#[tokio::test]
async fn test_next_and_previous_walk_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let tracks: Vec<String> = ["a.wav", "b.wav", "c.wav"]
        .iter()
        .map(|name| path_string(&write_tone(dir.path(), name, 2.0)))
        .collect();
    let player = test_player(PlayerConfig::default());

    player.play_queue(tracks.clone(), 0).await.unwrap();
    assert_eq!(player.state().await.unwrap(), PlaybackState::Playing);

    player.next().await.unwrap();
    let snapshot = player.snapshot().await.unwrap();
    assert_eq!(snapshot.current_track.as_deref(), Some(tracks[1].as_str()));
    assert_eq!(snapshot.state, PlaybackState::Playing);

    player.previous().await.unwrap();
    let queue = player.queue_snapshot().await.unwrap();
    assert_eq!(queue.current(), Some(tracks[0].as_str()));
    assert_eq!(queue.history_len, 0);
}

#[tokio::test]
async fn test_next_past_end_stops_with_queue_ended() {
    let dir = tempfile::tempdir().unwrap();
    let track = path_string(&write_tone(dir.path(), "only.wav", 2.0));
    let player = test_player(PlayerConfig::default());
    let mut events = player.subscribe();

    player.play_queue(vec![track], 0).await.unwrap();
    player.next().await.unwrap();

    assert_eq!(player.state().await.unwrap(), PlaybackState::Stopped);
    assert!(wait_for_event(&mut events, EVENT_TIMEOUT, |e| *e == PlayerEvent::QueueEnded)
        .await
        .is_some());
}

#[tokio::test]
async fn test_queue_edits_through_player() {
    let player = test_player(PlayerConfig::default());

    player.add(["a", "b", "c"]).await.unwrap();
    player.play_next("x").await.unwrap();
    player.play_later("z").await.unwrap();
    player.move_track(9, 0).await.unwrap();
    assert!(matches!(
        player.try_move_track(9, 0).await,
        Err(PlaybackError::IndexOutOfBounds(9))
    ));
    player.try_move_track(0, 1).await.unwrap();
    player.set_repeat_mode(RepeatMode::All).await.unwrap();

    let queue = player.queue_snapshot().await.unwrap();
    assert_eq!(queue.tracks, ["a", "b", "x", "c", "z"]);
    assert_eq!(queue.repeat_mode, RepeatMode::All);

    player.clear_queue().await.unwrap();
    assert_eq!(player.queue_snapshot().await.unwrap().tracks, ["a"]);
}

// ===== Auto-advance =====

async fn assert_auto_advance(config: PlayerConfig) {
    let dir = tempfile::tempdir().unwrap();
    let first = path_string(&write_tone(dir.path(), "first.wav", 0.3));
    let second = path_string(&write_tone(dir.path(), "second.wav", 0.3));
    let player = test_player(config);
    let mut events = player.subscribe();

    player
        .play_queue(vec![first.clone(), second.clone()], 0)
        .await
        .unwrap();

    let finished = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, PlayerEvent::TrackFinished(_))
    })
    .await;
    assert_eq!(finished, Some(PlayerEvent::TrackFinished(first)));

    let changed = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, PlayerEvent::TrackChanged { .. })
    })
    .await;
    assert!(matches!(changed, Some(PlayerEvent::TrackChanged { path, .. }) if path == second));

    assert!(wait_for_event(&mut events, EVENT_TIMEOUT, |e| *e == PlayerEvent::QueueEnded)
        .await
        .is_some());
    assert_eq!(player.state().await.unwrap(), PlaybackState::Stopped);
}

#[tokio::test]
async fn test_gapless_auto_advance() {
    assert_auto_advance(PlayerConfig::default()).await;
}

#[tokio::test]
async fn test_crossfade_auto_advance() {
    let mut config = PlayerConfig::default();
    config.crossfade.enabled = true;
    config.crossfade.duration_secs = 0.1;
    assert_auto_advance(config).await;
}

#[tokio::test]
async fn test_repeat_one_replays_track() {
    let dir = tempfile::tempdir().unwrap();
    let track = path_string(&write_tone(dir.path(), "loop.wav", 0.2));
    let mut config = PlayerConfig::default();
    config.repeat = RepeatMode::One;
    let player = test_player(config);
    let mut events = player.subscribe();

    player.play_queue(vec![track.clone()], 0).await.unwrap();

    for _ in 0..2 {
        let finished = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
            matches!(e, PlayerEvent::TrackFinished(_))
        })
        .await;
        assert_eq!(finished, Some(PlayerEvent::TrackFinished(track.clone())));
    }
    assert_eq!(player.state().await.unwrap(), PlaybackState::Playing);
    player.stop().await.unwrap();
}

#[tokio::test]
async fn test_skip_during_crossfade_settles_transition() {
    let dir = tempfile::tempdir().unwrap();
    let tracks: Vec<String> = ["a.wav", "b.wav", "c.wav"]
        .iter()
        .map(|name| path_string(&write_tone(dir.path(), name, 0.6)))
        .collect();
    let mut config = PlayerConfig::default();
    config.crossfade.enabled = true;
    config.crossfade.duration_secs = 0.5;
    let player = test_player(config);

    player.play_queue(tracks.clone(), 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    player.next().await.unwrap();

    let queue = player.queue_snapshot().await.unwrap();
    let current = player.snapshot().await.unwrap().current_track;
    assert_eq!(current.as_deref(), queue.current());
    assert_eq!(player.state().await.unwrap(), PlaybackState::Playing);
    player.stop().await.unwrap();
}

#[tokio::test]
async fn test_play_next_during_crossfade_keeps_queue_on_playing_track() {
    let dir = tempfile::tempdir().unwrap();
    let tracks: Vec<String> = ["a.wav", "b.wav", "c.wav"]
        .iter()
        .map(|name| path_string(&write_tone(dir.path(), name, 0.6)))
        .collect();
    let inserted = path_string(&write_tone(dir.path(), "x.wav", 0.6));
    let mut config = PlayerConfig::default();
    config.crossfade.enabled = true;
    config.crossfade.duration_secs = 0.4;
    let player = test_player(config);
    let mut events = player.subscribe();

    player.play_queue(tracks.clone(), 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    player.play_next(inserted.clone()).await.unwrap();

    let mut played = Vec::new();
    loop {
        let event = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
            matches!(e, PlayerEvent::TrackChanged { .. } | PlayerEvent::QueueEnded)
        })
        .await;
        match event {
            Some(PlayerEvent::TrackChanged { path, .. }) => {
                let snapshot = player.snapshot().await.unwrap();
                let queue = player.queue_snapshot().await.unwrap();
                assert_eq!(snapshot.current_track.as_deref(), queue.current());
                played.push(path);
            }
            Some(_) => break,
            None => panic!("playback stalled after {played:?}"),
        }
    }

    // Whether the edit landed before or during the fade, every track plays once
    let position = |path: &String| played.iter().position(|p| p == path).unwrap();
    assert_eq!(played.len(), 3, "{played:?}");
    assert!(played.contains(&tracks[1]), "{played:?}");
    assert!(position(&inserted) < position(&tracks[2]), "{played:?}");
}

// ===== Normalization and settings =====

#[tokio::test]
async fn test_normalization_analyzes_upcoming_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let tracks: Vec<String> = ["a.wav", "b.wav", "c.wav"]
        .iter()
        .map(|name| path_string(&write_tone(dir.path(), name, 1.0)))
        .collect();
    let player = test_player(PlayerConfig::default());

    player.set_normalization_enabled(true).await.unwrap();
    player.play_queue(tracks.clone(), 0).await.unwrap();

    let normalizer = player.normalizer().clone();
    let analyzed = tokio::time::timeout(EVENT_TIMEOUT, async {
        while !tracks.iter().all(|t| normalizer.contains(t)) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(analyzed.is_ok());

    // A quarter-scale tone is quieter than -14 dB RMS, so it gets boosted
    assert!(normalizer.gain_for(&tracks[1]) > 1.0);
    player.stop().await.unwrap();
}

#[tokio::test]
async fn test_crossfade_settings_round_trip() {
    let player = test_player(PlayerConfig::default());
    assert!(!player.crossfade_settings().enabled);

    let settings = CrossfadeSettings::with_duration(Duration::from_secs(5));
    player.set_crossfade_settings(settings).await.unwrap();
    assert_eq!(player.crossfade_settings(), settings);
}

#[tokio::test]
async fn test_equalizer_is_bound_and_configured() {
    let mut config = PlayerConfig::default();
    config.equalizer.gains = Some(vec![3.0, 20.0]);
    let player = test_player(config);

    let equalizer = player.equalizer();
    assert!(equalizer.is_bound());
    assert_eq!(equalizer.gains()[0], 3.0);
    assert_eq!(equalizer.gains()[1], 12.0);
}

#[tokio::test]
async fn test_shutdown_closes_player() {
    let player = test_player(PlayerConfig::default());
    player.shutdown().await.unwrap();
    // Give the task a moment to drop its receiver
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(player.state().await, Err(PlaybackError::PlayerClosed)));
}
