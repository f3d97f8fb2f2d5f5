//! LeCroy oscilloscopes.
//!
//! | driver | instruments | identity pattern |
//! |--------|-------------|------------------|
//! | [`LecroyScope`] | HDO6000 series | `\*IDN LECROY,HDO6...` |
//! | [`LecroyScope`] | WaveSurfer 104 | `\*IDN LECROY,WS104` |
//!
//! Waveforms are decoded with [`wavetemplate`].

pub mod oscilloscope;
pub mod wavetemplate;

pub use oscilloscope::{
    Hdo6xxxFactory, LecroyScope, ScopeModel, TriggerCoupling, TriggerMode, TriggerSettings,
    TriggerSlope, Ws104Factory,
};
pub use wavetemplate::{Wave, WaveTemplate};
