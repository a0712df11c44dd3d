//! Property-based tests for the playback queue
//!
//! Random operation sequences must never move the cursor out of range or
//! lose tracks.

use cadence_playback::{PlaybackQueue, RepeatMode};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Advance,
    GoBack,
    Add(u8),
    PlayNext(u8),
    PlayLater(u8),
    Shuffle,
    Move(usize, usize),
    Clear,
    Repeat(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Advance),
        2 => Just(Op::GoBack),
        1 => any::<u8>().prop_map(Op::Add),
        1 => any::<u8>().prop_map(Op::PlayNext),
        1 => any::<u8>().prop_map(Op::PlayLater),
        1 => Just(Op::Shuffle),
        1 => (0usize..12, 0usize..12).prop_map(|(a, b)| Op::Move(a, b)),
        1 => Just(Op::Clear),
        1 => (0u8..3).prop_map(Op::Repeat),
    ]
}

fn repeat(mode: u8) -> RepeatMode {
    match mode {
        0 => RepeatMode::Off,
        1 => RepeatMode::One,
        _ => RepeatMode::All,
    }
}

fn apply(queue: &mut PlaybackQueue, op: &Op) {
    match op {
        Op::Advance => {
            queue.advance();
        }
        Op::GoBack => {
            queue.go_back();
        }
        Op::Add(n) => queue.add([format!("t{n}")]),
        Op::PlayNext(n) => queue.play_next(format!("n{n}")),
        Op::PlayLater(n) => queue.play_later(format!("l{n}")),
        Op::Shuffle => queue.shuffle(),
        Op::Move(from, to) => queue.move_track(*from, *to),
        Op::Clear => queue.clear(),
        Op::Repeat(mode) => queue.set_repeat_mode(repeat(*mode)),
    }
}

proptest! {
    /// The cursor always points at a track unless the queue is empty
    #[test]
    fn prop_cursor_stays_in_bounds(
        initial in 0usize..8,
        start in 0usize..10,
        ops in prop::collection::vec(op(), 0..64),
    ) {
        let tracks = (0..initial).map(|i| format!("track{i}")).collect();
        let mut queue = PlaybackQueue::new(tracks, start);

        for op in &ops {
            apply(&mut queue, op);
            if queue.is_empty() {
                prop_assert!(queue.current().is_none());
            } else {
                prop_assert!(queue.current_index() < queue.len());
                prop_assert!(queue.current().is_some());
            }
        }
    }

    /// Edits that do not remove tracks keep the queue's contents
    #[test]
    fn prop_shuffle_and_move_keep_tracks(
        len in 1usize..12,
        advances in 0usize..6,
        moves in prop::collection::vec((0usize..12, 0usize..12), 0..16),
    ) {
        let tracks: Vec<String> = (0..len).map(|i| format!("track{i}")).collect();
        let mut queue = PlaybackQueue::new(tracks.clone(), 0);
        for _ in 0..advances {
            queue.advance();
        }
        let current = queue.current().map(str::to_string);

        queue.shuffle();
        for (from, to) in moves {
            queue.move_track(from, to);
        }

        prop_assert_eq!(queue.current().map(str::to_string), current);
        let mut after = queue.tracks().to_vec();
        after.sort();
        let mut before = tracks;
        before.sort();
        prop_assert_eq!(after, before);
    }

    /// Advancing then going back returns to where we started
    #[test]
    fn prop_history_round_trip(len in 2usize..10, steps in 1usize..9) {
        let tracks: Vec<String> = (0..len).map(|i| format!("track{i}")).collect();
        let mut queue = PlaybackQueue::new(tracks, 0);
        let steps = steps.min(len - 1);

        for _ in 0..steps {
            prop_assert!(queue.advance().is_some());
        }
        for _ in 0..steps {
            prop_assert!(queue.go_back().is_some());
        }
        prop_assert_eq!(queue.current_index(), 0);
        prop_assert_eq!(queue.history_len(), 0);
    }

    /// Repeat All never runs out
    #[test]
    fn prop_repeat_all_never_exhausts(len in 1usize..6, steps in 0usize..30) {
        let tracks: Vec<String> = (0..len).map(|i| format!("track{i}")).collect();
        let mut queue = PlaybackQueue::new(tracks, 0);
        queue.set_repeat_mode(RepeatMode::All);
        for i in 1..=steps {
            prop_assert!(queue.advance().is_some());
            prop_assert_eq!(queue.current_index(), i % len);
        }
    }
}
