//! Equalizer model and the DSP node it drives

mod equalizer;
mod graphic_eq;

pub use equalizer::{
    Band, EqNode, EqPreset, Equalizer, BAND_COUNT, BAND_FREQUENCIES, MAX_GAIN_DB, MIN_GAIN_DB,
};
pub use graphic_eq::GraphicEqNode;
