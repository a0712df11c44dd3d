//! Two-node scheduling for gapless and crossfaded transitions
//!
//! The scheduler owns a fixed pair of [`PlayerNode`]s. One is active, the
//! other is where the upcoming track gets pre-loaded. A transition hands
//! playback over (hard cut or crossfade) and then swaps the roles by flipping
//! an index, so nodes are never reallocated.

use crate::crossfade::CrossfadeManager;
use cadence_audio::{AudioSource, PlayerNode, RenderEngine, RenderNode};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct Roles {
    active: usize,
    /// Transition id whose completion has not flipped the roles yet
    pending: Option<u64>,
    next_id: u64,
}

/// Owns the active/next node pair
pub struct GaplessScheduler {
    nodes: [Arc<PlayerNode>; 2],
    roles: Arc<Mutex<Roles>>,
    crossfade: Arc<CrossfadeManager>,
}

fn lock(roles: &Mutex<Roles>) -> MutexGuard<'_, Roles> {
    roles.lock().unwrap_or_else(|e| e.into_inner())
}

impl GaplessScheduler {
    pub fn new(crossfade: Arc<CrossfadeManager>) -> Self {
        Self {
            nodes: [
                Arc::new(PlayerNode::new("deck-a")),
                Arc::new(PlayerNode::new("deck-b")),
            ],
            roles: Arc::new(Mutex::new(Roles {
                active: 0,
                pending: None,
                next_id: 0,
            })),
            crossfade,
        }
    }

    /// Node currently playing (or ready to play) the current track
    pub fn active_node(&self) -> Arc<PlayerNode> {
        let active = lock(&self.roles).active;
        Arc::clone(&self.nodes[active])
    }

    /// Node holding (or about to hold) the upcoming track
    pub fn next_node(&self) -> Arc<PlayerNode> {
        let active = lock(&self.roles).active;
        Arc::clone(&self.nodes[1 - active])
    }

    /// Connect both nodes to the engine's mix bus
    pub fn attach_to(&self, engine: &RenderEngine) {
        for node in &self.nodes {
            engine.attach(Arc::clone(node));
        }
    }

    /// Fade manager shared with the transitions
    pub fn crossfade(&self) -> &Arc<CrossfadeManager> {
        &self.crossfade
    }

    /// Pre-load `source` onto the inactive node
    ///
    /// `at` is the offset into `source` where playback will begin.
    pub fn schedule_next(&self, source: Arc<dyn AudioSource>, at: Duration) {
        let node = self.next_node();
        let start_frame = (at.as_secs_f64() * f64::from(source.sample_rate())) as u64;
        node.stop();
        node.set_volume(1.0);
        node.schedule(source, start_frame);
    }

    /// Let the engine start the next node the moment the active one ends
    pub fn arm_next(&self) {
        self.next_node().arm();
    }

    /// Whether a transition has started but not completed
    pub fn is_transitioning(&self) -> bool {
        lock(&self.roles).pending.is_some()
    }

    /// Hand playback from the active node to the next one
    ///
    /// The roles flip before `completion` runs, so inside it
    /// [`GaplessScheduler::active_node`] already returns the new track's node.
    /// With crossfading disabled this completes synchronously.
    pub fn transition_to_next<F>(&self, completion: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (outgoing, incoming, id) = {
            let mut roles = lock(&self.roles);
            let id = roles.next_id;
            roles.next_id += 1;
            roles.pending = Some(id);
            let active = roles.active;
            (
                Arc::clone(&self.nodes[active]),
                Arc::clone(&self.nodes[1 - active]),
                id,
            )
        };

        tracing::debug!(
            "Transition {} from '{}' to '{}'",
            id,
            outgoing.label(),
            incoming.label()
        );

        let roles = Arc::clone(&self.roles);
        self.crossfade.crossfade(outgoing, incoming, move || {
            flip_if_pending(&roles, id);
            completion();
        });
    }

    /// Settle an in-flight transition right away
    ///
    /// If a fade was still running it is cancelled and rolled back: the
    /// active node keeps playing at full volume and the next node is
    /// stopped. Returns `true` in that case. Returns `false` when there was
    /// nothing to roll back, after making sure any finished transition has
    /// flipped the roles.
    pub fn cancel_transition(&self) -> bool {
        if self.crossfade.cancel_fade() {
            let active = {
                let mut roles = lock(&self.roles);
                roles.pending = None;
                roles.active
            };
            self.nodes[active].set_volume(1.0);
            let next = &self.nodes[1 - active];
            next.stop();
            next.set_volume(1.0);
            tracing::debug!("Transition rolled back to '{}'", self.nodes[active].label());
            return true;
        }

        let pending = lock(&self.roles).pending;
        if let Some(id) = pending {
            flip_if_pending(&self.roles, id);
        }
        false
    }

    /// Stop both nodes and forget any transition
    pub fn stop_all(&self) {
        self.crossfade.cancel_fade();
        lock(&self.roles).pending = None;
        for node in &self.nodes {
            node.stop();
            node.set_volume(1.0);
        }
    }
}

fn flip_if_pending(roles: &Mutex<Roles>, id: u64) {
    let mut roles = lock(roles);
    if roles.pending == Some(id) {
        roles.pending = None;
        roles.active = 1 - roles.active;
    }
}
