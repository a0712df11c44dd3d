//! Graphic EQ render node
//!
//! Ten RBJ peaking biquads, one per canonical band, run in series on the
//! mixed signal. The node holds no policy: it renders whatever gains the
//! [`Equalizer`](super::Equalizer) pushed last.

use super::equalizer::{EqNode, BAND_COUNT, BAND_FREQUENCIES, MAX_GAIN_DB, MIN_GAIN_DB};
use std::f32::consts::PI;
use std::sync::Mutex;

/// Octave bandwidth
const BAND_Q: f32 = 1.41;

/// Gains below this are treated as flat
const FLAT_THRESHOLD_DB: f32 = 0.01;

#[derive(Debug, Clone, Copy, Default)]
struct FilterState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

#[derive(Debug, Clone)]
struct Biquad {
    frequency: f32,
    gain_db: f32,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    /// Left and right history
    state: [FilterState; 2],
}

impl Biquad {
    fn new(frequency: f32) -> Self {
        Self {
            frequency,
            gain_db: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            state: [FilterState::default(); 2],
        }
    }

    fn is_flat(&self) -> bool {
        self.gain_db.abs() < FLAT_THRESHOLD_DB
    }

    fn design(&mut self, sample_rate: f32) {
        if sample_rate < 1.0 || self.is_flat() {
            self.b0 = 1.0;
            self.b1 = 0.0;
            self.b2 = 0.0;
            self.a1 = 0.0;
            self.a2 = 0.0;
            return;
        }

        let a = 10.0_f32.powf(self.gain_db / 40.0);
        // Keep the 16 kHz band stable at 32/44.1 kHz device rates
        let freq = self.frequency.min(sample_rate * 0.45);
        let omega = 2.0 * PI * freq / sample_rate;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * BAND_Q);

        let a0 = 1.0 + alpha / a;
        self.b0 = (1.0 + alpha * a) / a0;
        self.b1 = (-2.0 * cos_omega) / a0;
        self.b2 = (1.0 - alpha * a) / a0;
        self.a1 = (-2.0 * cos_omega) / a0;
        self.a2 = (1.0 - alpha / a) / a0;
    }

    #[inline]
    fn tick(&mut self, channel: usize, input: f32) -> f32 {
        let s = &mut self.state[channel];
        let mut out =
            self.b0 * input + self.b1 * s.x1 + self.b2 * s.x2 - self.a1 * s.y1 - self.a2 * s.y2;
        // Flush denormals
        if out.abs() < 1e-15 {
            out = 0.0;
        }
        s.x2 = s.x1;
        s.x1 = input;
        s.y2 = s.y1;
        s.y1 = out;
        out
    }

    fn reset(&mut self) {
        self.state = [FilterState::default(); 2];
    }
}

struct EqBank {
    bands: Vec<Biquad>,
    sample_rate: u32,
    needs_design: bool,
}

impl EqBank {
    fn is_flat(&self) -> bool {
        self.bands.iter().all(Biquad::is_flat)
    }
}

/// Ten-band peaking EQ applied to the engine's mix bus
pub struct GraphicEqNode {
    bank: Mutex<EqBank>,
}

impl GraphicEqNode {
    /// Create a flat EQ node
    pub fn new() -> Self {
        Self {
            bank: Mutex::new(EqBank {
                bands: BAND_FREQUENCIES.iter().map(|&f| Biquad::new(f)).collect(),
                sample_rate: 0,
                needs_design: true,
            }),
        }
    }

    /// Gains currently rendered, in dB
    pub fn gains(&self) -> [f32; BAND_COUNT] {
        let bank = self.bank.lock().unwrap_or_else(|e| e.into_inner());
        let mut gains = [0.0; BAND_COUNT];
        for (slot, band) in gains.iter_mut().zip(&bank.bands) {
            *slot = band.gain_db;
        }
        gains
    }

    /// Whether every band is at 0 dB (the node is a pass-through)
    pub fn is_flat(&self) -> bool {
        self.bank.lock().unwrap_or_else(|e| e.into_inner()).is_flat()
    }

    /// Clear filter history
    pub fn reset(&self) {
        let mut bank = self.bank.lock().unwrap_or_else(|e| e.into_inner());
        for band in &mut bank.bands {
            band.reset();
        }
    }

    /// Filter an interleaved block in place
    ///
    /// Only the first two channels are filtered; mono runs through the left
    /// filter state.
    pub fn process(&self, buffer: &mut [f32], channels: u16, sample_rate: u32) {
        let mut bank = self.bank.lock().unwrap_or_else(|e| e.into_inner());
        if bank.is_flat() || channels == 0 {
            return;
        }

        if bank.needs_design || bank.sample_rate != sample_rate {
            let rate = sample_rate as f32;
            for band in &mut bank.bands {
                band.design(rate);
            }
            bank.sample_rate = sample_rate;
            bank.needs_design = false;
        }

        let channels = usize::from(channels);
        let filtered = channels.min(2);
        for frame in buffer.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().take(filtered).enumerate() {
                let mut value = *sample;
                for band in bank.bands.iter_mut().filter(|b| !b.is_flat()) {
                    value = band.tick(ch, value);
                }
                *sample = value;
            }
        }
    }
}

impl Default for GraphicEqNode {
    fn default() -> Self {
        Self::new()
    }
}

impl EqNode for GraphicEqNode {
    fn set_band_gains(&self, gains: &[f32; BAND_COUNT]) {
        let mut bank = self.bank.lock().unwrap_or_else(|e| e.into_inner());
        for (band, &gain) in bank.bands.iter_mut().zip(gains) {
            let gain = gain.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
            if (band.gain_db - gain).abs() > f32::EPSILON {
                band.gain_db = gain;
                // Stale history after a coefficient jump clicks
                band.reset();
            }
        }
        bank.needs_design = true;
    }
}
