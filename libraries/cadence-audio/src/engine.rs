//! Pull-model render engine
//!
//! The engine is the mixing graph shared between the control side and the
//! output thread. Output backends call [`RenderEngine::render`] for every
//! block; everything else is control.

use crate::effects::GraphicEqNode;
use crate::error::Result;
use crate::node::PlayerNode;
use crate::output::{OutputBackend, OutputFormat};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct RenderGraph {
    nodes: Vec<Arc<PlayerNode>>,
    eq: Option<Arc<GraphicEqNode>>,
    master_volume: f32,
    format: OutputFormat,
}

/// Mixes attached nodes, runs the EQ and applies master volume
pub struct RenderEngine {
    graph: Mutex<RenderGraph>,
    backend: Mutex<Box<dyn OutputBackend>>,
    running: AtomicBool,
}

impl RenderEngine {
    /// Create a stopped engine driving `backend`
    pub fn new(backend: Box<dyn OutputBackend>) -> Arc<Self> {
        Arc::new(Self {
            graph: Mutex::new(RenderGraph {
                nodes: Vec::new(),
                eq: None,
                master_volume: 1.0,
                format: OutputFormat::default(),
            }),
            backend: Mutex::new(backend),
            running: AtomicBool::new(false),
        })
    }

    fn graph(&self) -> MutexGuard<'_, RenderGraph> {
        self.graph.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a node to the mix bus
    pub fn attach(&self, node: Arc<PlayerNode>) {
        let mut graph = self.graph();
        if !graph.nodes.iter().any(|n| Arc::ptr_eq(n, &node)) {
            tracing::debug!("Attaching node '{}'", node.label());
            graph.nodes.push(node);
        }
    }

    /// Insert (or replace) the EQ after the mix bus
    pub fn set_eq_node(&self, eq: Arc<GraphicEqNode>) {
        self.graph().eq = Some(eq);
    }

    /// Start the output backend if it is not already running
    ///
    /// Device failures propagate to the caller and leave the engine stopped.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let mut backend = self.backend.lock().unwrap_or_else(|e| e.into_inner());
        let format = backend.start(Arc::downgrade(self))?;
        self.graph().format = format;
        self.running.store(true, Ordering::Release);

        tracing::info!(
            "Render engine started on '{}' ({} Hz, {} ch)",
            backend.name(),
            format.sample_rate,
            format.channels
        );
        Ok(())
    }

    /// Stop the output backend
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.backend
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stop();
        tracing::debug!("Render engine stopped");
    }

    /// Whether the backend is pulling audio
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set master output gain (0.0 to 1.0)
    pub fn set_volume(&self, volume: f32) {
        self.graph().master_volume = volume.clamp(0.0, 1.0);
    }

    /// Master output gain
    pub fn volume(&self) -> f32 {
        self.graph().master_volume
    }

    /// Format negotiated with the backend on the last start
    pub fn format(&self) -> OutputFormat {
        self.graph().format
    }

    /// Render one interleaved block
    ///
    /// Writes silence while stopped. An armed node starts on the exact frame
    /// where another node ran out, so back-to-back tracks join without a gap.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        if !self.is_running() {
            return;
        }

        let graph = self.graph();
        let OutputFormat {
            sample_rate,
            channels,
        } = graph.format;
        if channels == 0 {
            return;
        }
        let ch = usize::from(channels);

        let mut handoff: Option<usize> = None;
        for node in &graph.nodes {
            let outcome = node.render_into(out, channels, sample_rate);
            if outcome.finished {
                handoff = Some(handoff.map_or(outcome.frames, |f| f.min(outcome.frames)));
            }
        }

        if let Some(frame) = handoff {
            for node in &graph.nodes {
                if node.start_armed() {
                    tracing::debug!("Gapless handoff to '{}' at frame {}", node.label(), frame);
                    node.render_into(&mut out[frame * ch..], channels, sample_rate);
                }
            }
        }

        if let Some(eq) = &graph.eq {
            eq.process(out, channels, sample_rate);
        }

        let master = graph.master_volume;
        for sample in out.iter_mut() {
            *sample = (*sample * master).clamp(-1.0, 1.0);
        }
    }
}

impl fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.graph();
        f.debug_struct("RenderEngine")
            .field("nodes", &graph.nodes.len())
            .field("eq", &graph.eq.is_some())
            .field("master_volume", &graph.master_volume)
            .field("format", &graph.format)
            .field("running", &self.is_running())
            .finish()
    }
}
