//! Playback queue
//!
//! An ordered list of track paths with a cursor, a back-navigation history
//! and repeat handling:
//!
//! ```text
//!   history ◄── advance() pushes the index it leaves
//!
//!   [ a ][ b ][ c ][ d ][ e ]
//!          ▲    └── upcoming ──┘
//!          current_index
//! ```
//!
//! Invalid requests (moving out of range, going back with no history) are
//! ignored rather than reported. `try_*` variants exist where a caller needs
//! to tell the difference.

use crate::error::{PlaybackError, Result};
use crate::types::{QueueSnapshot, RepeatMode};
use rand::seq::SliceRandom;

/// Track queue with history and repeat semantics
#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    tracks: Vec<String>,
    current_index: usize,
    history: Vec<usize>,
    repeat_mode: RepeatMode,
}

impl PlaybackQueue {
    /// Queue for "play this list starting here"
    ///
    /// `start_index` is clamped into range.
    pub fn new(tracks: Vec<String>, start_index: usize) -> Self {
        let current_index = start_index.min(tracks.len().saturating_sub(1));
        Self {
            tracks,
            current_index,
            history: Vec::new(),
            repeat_mode: RepeatMode::Off,
        }
    }

    // ===== Accessors =====

    /// Track under the cursor
    pub fn current(&self) -> Option<&str> {
        self.tracks.get(self.current_index).map(String::as_str)
    }

    /// Cursor position (0 when empty)
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// All tracks in play order
    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }

    /// Tracks strictly after the cursor
    pub fn upcoming(&self) -> &[String] {
        self.tracks.get(self.current_index + 1..).unwrap_or(&[])
    }

    /// What [`PlaybackQueue::advance`] would return, without moving
    pub fn peek_next(&self) -> Option<&str> {
        if self.tracks.is_empty() {
            return None;
        }
        match self.repeat_mode {
            RepeatMode::One => self.current(),
            _ if self.current_index + 1 < self.tracks.len() => {
                Some(self.tracks[self.current_index + 1].as_str())
            }
            RepeatMode::All => self.tracks.first().map(String::as_str),
            RepeatMode::Off => None,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Back-navigation steps available
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    /// Copy of the queue for observers
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            tracks: self.tracks.clone(),
            current_index: self.current_index,
            history_len: self.history.len(),
            repeat_mode: self.repeat_mode,
        }
    }

    // ===== Navigation =====

    /// Move to the next track
    ///
    /// Repeat One returns the current track without touching the cursor or
    /// history. Otherwise the current index is pushed onto the history and
    /// the cursor moves forward, wrapping to the start on Repeat All.
    /// Returns `None` once the queue is exhausted.
    pub fn advance(&mut self) -> Option<&str> {
        if self.tracks.is_empty() {
            return None;
        }
        if self.repeat_mode == RepeatMode::One {
            return self.current();
        }

        self.history.push(self.current_index);

        if self.current_index + 1 < self.tracks.len() {
            self.current_index += 1;
        } else if self.repeat_mode == RepeatMode::All {
            self.current_index = 0;
        } else {
            return None;
        }

        self.current()
    }

    /// Advance onto `track`, which is already playing
    ///
    /// Edits made after `track` was picked may have moved it out of the next
    /// slot. It is then brought forward from the upcoming list, or inserted
    /// when no longer queued, so the cursor lands on what is audible and the
    /// edits stay relative to it.
    pub fn advance_onto(&mut self, track: &str) -> Option<&str> {
        if self.peek_next() == Some(track) {
            return self.advance();
        }
        if self.tracks.is_empty() {
            self.tracks.push(track.to_string());
            return self.current();
        }

        match self.upcoming().iter().position(|t| t == track) {
            Some(from) => self.move_track(from, 0),
            None => self.play_next(track),
        }
        self.history.push(self.current_index);
        self.current_index += 1;
        self.current()
    }

    /// Undo the last advance
    ///
    /// Returns `None` and stays put when there is no history.
    pub fn go_back(&mut self) -> Option<&str> {
        let index = self.history.pop()?;
        if index < self.tracks.len() {
            self.current_index = index;
        }
        self.current()
    }

    // ===== Editing =====

    /// Append tracks; the cursor does not move
    pub fn add<I>(&mut self, tracks: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.tracks.extend(tracks.into_iter().map(Into::into));
    }

    /// Insert a track right after the current one
    pub fn play_next(&mut self, track: impl Into<String>) {
        if self.tracks.is_empty() {
            self.tracks.push(track.into());
        } else {
            self.tracks.insert(self.current_index + 1, track.into());
        }
    }

    /// Append a track to the end
    pub fn play_later(&mut self, track: impl Into<String>) {
        self.tracks.push(track.into());
    }

    /// Shuffle the tracks after the cursor; history and current stay put
    pub fn shuffle(&mut self) {
        let start = (self.current_index + 1).min(self.tracks.len());
        self.tracks[start..].shuffle(&mut rand::thread_rng());
    }

    /// Move an upcoming track
    ///
    /// `from` and `to` index the upcoming list (0 is the next track).
    /// Out-of-range requests are ignored.
    pub fn move_track(&mut self, from: usize, to: usize) {
        if let Err(e) = self.try_move_track(from, to) {
            tracing::trace!("Ignoring queue move: {}", e);
        }
    }

    /// Like [`PlaybackQueue::move_track`], but reports out-of-range indices
    pub fn try_move_track(&mut self, from: usize, to: usize) -> Result<()> {
        let upcoming = self.upcoming().len();
        if from >= upcoming {
            return Err(PlaybackError::IndexOutOfBounds(from));
        }
        if to >= upcoming {
            return Err(PlaybackError::IndexOutOfBounds(to));
        }

        let base = self.current_index + 1;
        let track = self.tracks.remove(base + from);
        self.tracks.insert(base + to, track);
        Ok(())
    }

    /// Collapse to just the current track and forget history
    pub fn clear(&mut self) {
        let current = self.tracks.get(self.current_index).cloned();
        self.tracks.clear();
        self.tracks.extend(current);
        self.current_index = 0;
        self.history.clear();
    }
}
