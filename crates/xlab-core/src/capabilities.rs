//! Instrument Capabilities
//!
//! Fine-grained capability traits that drivers implement. A driver exposes
//! only what the instrument actually supports:
//!
//! - A bench multimeter implements `Multimeter + Readable`
//! - A DC power supply implements `PowerSupply`
//! - A relay card implements `RelayCard`
//!
//! Generic code (the CLI, experiment measure steps) works against these
//! traits; instrument-specific extras stay on the concrete driver types.
//!
//! Each capability trait is async (`#[async_trait]`), `Send + Sync`, and
//! returns [`crate::Result`].
//!
//! # Example
//!
//! ```rust,ignore
//! async fn sweep(supply: &dyn PowerSupply, dmm: &dyn Multimeter) -> Result<Vec<f64>> {
//!     let mut readings = Vec::new();
//!     for v in [1.0, 2.0, 3.0] {
//!         supply.set_voltage(1, v).await?;
//!         readings.push(dmm.measure(&MeasureFunction::VoltageDc, Param::Auto, Param::Def, 1).await?);
//!     }
//!     Ok(readings)
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, XlabError};
use crate::scpi::Param;

// =============================================================================
// Device Category
// =============================================================================

/// Instrument category for listing and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    /// Bench multimeters
    Multimeter,
    /// Data acquisition / switch units
    DataAcquisition,
    /// Function / arbitrary waveform generators
    FunctionGenerator,
    /// RF signal generators
    SignalGenerator,
    /// Oscilloscopes
    Oscilloscope,
    /// DC power supplies
    PowerSupply,
    /// Electronic loads
    ElectronicLoad,
    /// Relay cards
    Relay,
    /// Dimensional gauges (calipers, indicators)
    Gauge,
    /// Anything else
    #[default]
    Other,
}

impl DeviceCategory {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Multimeter => "Multimeters",
            Self::DataAcquisition => "Data Acquisition",
            Self::FunctionGenerator => "Function Generators",
            Self::SignalGenerator => "Signal Generators",
            Self::Oscilloscope => "Oscilloscopes",
            Self::PowerSupply => "Power Supplies",
            Self::ElectronicLoad => "Electronic Loads",
            Self::Relay => "Relay Cards",
            Self::Gauge => "Gauges",
            Self::Other => "Other",
        }
    }
}

// =============================================================================
// Shared parameter types
// =============================================================================

/// Multimeter measurement function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasureFunction {
    VoltageDc,
    VoltageAc,
    CurrentDc,
    CurrentAc,
    /// 2-wire resistance
    Resistance,
    /// 4-wire resistance
    FourWireResistance,
    /// Temperature with a probe type (`TC`, `RTD`, `FRTD`, `THER`, `DEF`) and
    /// a sensor type (`K`, `85`, `5000`, ...).
    Temperature { probe: String, sensor: String },
}

impl MeasureFunction {
    /// SCPI function keyword.
    pub fn scpi(&self) -> &'static str {
        match self {
            Self::VoltageDc => "VOLTAGE:DC",
            Self::VoltageAc => "VOLTAGE:AC",
            Self::CurrentDc => "CURRENT:DC",
            Self::CurrentAc => "CURRENT:AC",
            Self::Resistance => "RESISTANCE",
            Self::FourWireResistance => "FRESISTANCE",
            Self::Temperature { .. } => "TEMPERATURE",
        }
    }
}

impl FromStr for MeasureFunction {
    type Err = XlabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vdc" | "voltage:dc" => Ok(Self::VoltageDc),
            "vac" | "voltage:ac" => Ok(Self::VoltageAc),
            "idc" | "current:dc" => Ok(Self::CurrentDc),
            "iac" | "current:ac" => Ok(Self::CurrentAc),
            "r" | "res" | "resistance" => Ok(Self::Resistance),
            "r4" | "fres" | "fresistance" => Ok(Self::FourWireResistance),
            other => Err(XlabError::invalid(format!(
                "unknown measurement function '{}'",
                other
            ))),
        }
    }
}

/// Function generator output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveShape {
    Sine,
    Square,
    Ramp,
    Pulse,
    Noise,
    Dc,
    User,
}

impl WaveShape {
    /// SCPI keyword.
    pub fn scpi(&self) -> &'static str {
        match self {
            Self::Sine => "SINUSOID",
            Self::Square => "SQUARE",
            Self::Ramp => "RAMP",
            Self::Pulse => "PULSE",
            Self::Noise => "NOISE",
            Self::Dc => "DC",
            Self::User => "USER",
        }
    }
}

impl FromStr for WaveShape {
    type Err = XlabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SIN" | "SINUSOID" => Ok(Self::Sine),
            "SQU" | "SQUARE" => Ok(Self::Square),
            "RAMP" => Ok(Self::Ramp),
            "PULS" | "PULSE" => Ok(Self::Pulse),
            "NOIS" | "NOISE" => Ok(Self::Noise),
            "DC" => Ok(Self::Dc),
            "USER" => Ok(Self::User),
            other => Err(XlabError::invalid(format!("unknown waveform '{}'", other))),
        }
    }
}

/// Electronic load regulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Constant current
    Current,
    /// Constant voltage
    Voltage,
    /// Constant resistance
    Resistance,
    /// Constant power
    Power,
    /// Constant conductance
    Conductance,
}

impl LoadMode {
    /// Single-letter mode code.
    pub fn code(&self) -> char {
        match self {
            Self::Current => 'C',
            Self::Voltage => 'V',
            Self::Resistance => 'R',
            Self::Power => 'P',
            Self::Conductance => 'G',
        }
    }
}

/// Electronic load level register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    A,
    B,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Sampled oscilloscope trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    /// Time of each sample in seconds, relative to the trigger
    pub time: Vec<f64>,
    /// Sample values in vertical units
    pub values: Vec<f64>,
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: Scalar Readout
///
/// Instruments that produce one value per reading (gauges, a multimeter in
/// its default function).
#[async_trait]
pub trait Readable: Send + Sync {
    /// Take one reading.
    async fn read(&self) -> Result<f64>;
}

/// Capability: Multimeter
#[async_trait]
pub trait Multimeter: Send + Sync {
    /// Measure with the given function, range and resolution.
    ///
    /// `channel` 2 selects the secondary display on meters that have one.
    async fn measure(
        &self,
        function: &MeasureFunction,
        range: Param,
        resolution: Param,
        channel: u8,
    ) -> Result<f64>;

    /// Continuity test reading.
    async fn measure_continuity(&self) -> Result<f64>;
}

/// Capability: Multiplexed data acquisition
#[async_trait]
pub trait DataAcquisition: Send + Sync {
    /// Measure a list of channels; one value per channel.
    async fn measure_channels(
        &self,
        function: &MeasureFunction,
        range: Param,
        resolution: Param,
        channels: &[u32],
    ) -> Result<Vec<f64>>;
}

/// Capability: Function Generator
#[async_trait]
pub trait FunctionGenerator: Send + Sync {
    /// Set shape, frequency (Hz), amplitude (Vpp) and offset (V) in one go.
    async fn apply(&self, shape: WaveShape, frequency: f64, amplitude: f64, offset: f64)
        -> Result<()>;

    async fn set_frequency(&self, frequency: Param) -> Result<()>;

    async fn set_amplitude_vpp(&self, amplitude: Param) -> Result<()>;

    async fn set_offset(&self, offset: Param) -> Result<()>;

    async fn enable_output(&self, enabled: bool) -> Result<()>;
}

/// Capability: RF Signal Generator
#[async_trait]
pub trait SignalGenerator: Send + Sync {
    /// Carrier frequency in Hz
    async fn set_frequency(&self, frequency: f64) -> Result<()>;

    /// Output level in dBm
    async fn set_power(&self, power: f64) -> Result<()>;

    async fn enable_output(&self, enabled: bool) -> Result<()>;
}

/// Capability: Oscilloscope
#[async_trait]
pub trait Oscilloscope: Send + Sync {
    /// Run the automatic setup, optionally for one channel only.
    async fn auto_setup(&self, channel: Option<&str>) -> Result<()>;

    /// Trigger once regardless of the trigger condition.
    async fn force_trigger(&self) -> Result<()>;

    /// Horizontal scale in seconds per division.
    async fn set_time_div(&self, seconds: f64) -> Result<()>;

    /// Vertical scale of a channel in volts per division.
    async fn set_voltage_div(&self, channel: &str, volts: f64) -> Result<()>;

    /// Transfer a trace (`C1`, `F2`, `M1`, ...).
    async fn read_trace(&self, trace: &str) -> Result<Trace>;
}

/// Capability: DC Power Supply
///
/// Channels are numbered from 1.
#[async_trait]
pub trait PowerSupply: Send + Sync {
    async fn set_voltage(&self, channel: u8, volts: f64) -> Result<()>;

    async fn set_current(&self, channel: u8, amps: f64) -> Result<()>;

    /// Measured output voltage
    async fn read_voltage(&self, channel: u8) -> Result<f64>;

    /// Measured output current
    async fn read_current(&self, channel: u8) -> Result<f64>;

    async fn enable_output(&self, channel: u8, enabled: bool) -> Result<()>;
}

/// Capability: Electronic Load
#[async_trait]
pub trait ElectronicLoad: Send + Sync {
    async fn set_mode(&self, mode: LoadMode) -> Result<()>;

    async fn set_level(&self, level: Level, value: f64) -> Result<()>;

    async fn select_level(&self, level: Level) -> Result<()>;

    async fn enable_input(&self, enabled: bool) -> Result<()>;

    async fn read_voltage(&self) -> Result<f64>;

    async fn read_current(&self) -> Result<f64>;
}

/// Capability: Relay Card
///
/// Relays are numbered from 1.
#[async_trait]
pub trait RelayCard: Send + Sync {
    async fn switch_on(&self, relays: &[u8]) -> Result<()>;

    async fn switch_off(&self, relays: &[u8]) -> Result<()>;

    async fn toggle(&self, relays: &[u8]) -> Result<()>;

    /// Bitmask of the relays that are on (bit 0 is relay 1).
    async fn relay_status(&self) -> Result<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_function_keywords() {
        assert_eq!(MeasureFunction::FourWireResistance.scpi(), "FRESISTANCE");
        let t = MeasureFunction::Temperature {
            probe: "TC".into(),
            sensor: "K".into(),
        };
        assert_eq!(t.scpi(), "TEMPERATURE");
        assert_eq!("vdc".parse::<MeasureFunction>().unwrap(), MeasureFunction::VoltageDc);
        assert!("ohms".parse::<MeasureFunction>().is_err());
    }

    #[test]
    fn wave_shape_parses_short_forms() {
        assert_eq!("squ".parse::<WaveShape>().unwrap(), WaveShape::Square);
        assert_eq!(WaveShape::Sine.scpi(), "SINUSOID");
        assert!("triangle".parse::<WaveShape>().is_err());
    }

    #[test]
    fn load_mode_codes() {
        assert_eq!(LoadMode::Conductance.code(), 'G');
        assert_eq!(Level::B.to_string(), "B");
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&DeviceCategory::PowerSupply).unwrap();
        assert_eq!(json, "\"power_supply\"");
        assert_eq!(DeviceCategory::default(), DeviceCategory::Other);
    }
}
