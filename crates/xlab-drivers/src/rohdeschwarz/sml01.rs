//! Rohde & Schwarz SML01 RF signal generator.
//!
//! Covers the RF output, user level-correction tables `UCOR0`..`UCOR9` and
//! amplitude modulation. The LF output is not driven.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::instrument;
use xlab_core::capabilities::{DeviceCategory, SignalGenerator};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::scpi::parse_float_list;
use xlab_core::{Interface, Result, XlabError};

pub struct Sml01Factory;

impl DriverFactory for Sml01Factory {
    fn driver_type(&self) -> &'static str {
        "sml01"
    }

    fn name(&self) -> &'static str {
        "Rohde & Schwarz SML01 Signal Generator"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::RohdeSchwarz
    }

    fn id_pattern(&self) -> &'static str {
        r"ROHDE&SCHWARZ,SML01,"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::SignalGenerator]
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::SignalGenerator)
                .with_signal_generator(Arc::new(Sml01::new(interface))))
        })
    }
}

/// AM modulation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmSource {
    Internal,
    External,
    TwoTone,
}

impl fmt::Display for AmSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "INT"),
            Self::External => write!(f, "EXT"),
            Self::TwoTone => write!(f, "TTONE"),
        }
    }
}

impl FromStr for AmSource {
    type Err = XlabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INT" => Ok(Self::Internal),
            "EXT" => Ok(Self::External),
            "TTONE" => Ok(Self::TwoTone),
            _ => Err(XlabError::invalid(
                "AM source must be any of INT, EXT, TTONE",
            )),
        }
    }
}

#[derive(Debug)]
pub struct Sml01 {
    interface: Arc<dyn Interface>,
}

impl Sml01 {
    pub fn new(interface: Arc<dyn Interface>) -> Self {
        Self { interface }
    }

    /// Select correction table `id` (0..9) and check the generator accepted
    /// it, so a failed selection never overwrites another table.
    async fn select_correction_table(&self, id: u8) -> Result<()> {
        if id > 9 {
            return Err(XlabError::invalid(format!(
                "Invalid correction table id {}",
                id
            )));
        }
        let name = format!("\"UCOR{}\"", id);
        self.interface
            .command(&format!(":SOURCE:CORRECTION:CSET:SELECT {}", name))
            .await?;

        let selected = self
            .interface
            .query(":SOURCE:CORRECTION:CSET:SELECT?")
            .await?;
        if selected.trim() != name {
            return Err(XlabError::protocol(format!(
                "correction table {} not selected, generator reports {}",
                name,
                selected.trim()
            )));
        }
        Ok(())
    }

    /// Program correction table `id` with frequency (Hz) / power (dB) points.
    #[instrument(skip(self, frequency, power), fields(points = frequency.len()), err)]
    pub async fn set_correction_table(&self, id: u8, frequency: &[f64], power: &[f64]) -> Result<()> {
        if frequency.len() != power.len() {
            return Err(XlabError::invalid(
                "Frequency list and power list must have the same length",
            ));
        }
        let frequency_list = frequency
            .iter()
            .map(|f| format!("{:.2} Hz", f))
            .collect::<Vec<_>>()
            .join(",");
        let power_list = power
            .iter()
            .map(|p| format!("{:.2} dB", p))
            .collect::<Vec<_>>()
            .join(",");

        self.select_correction_table(id).await?;
        self.interface
            .command(&format!(
                ":SOURCE:CORRECTION:CSET:DATA:FREQUENCY {}",
                frequency_list
            ))
            .await?;
        self.interface
            .command(&format!(":SOURCE:CORRECTION:CSET:DATA:POWER {}", power_list))
            .await
    }

    /// Read correction table `id` as (frequencies, powers).
    pub async fn get_correction_table(&self, id: u8) -> Result<(Vec<f64>, Vec<f64>)> {
        self.select_correction_table(id).await?;
        let frequency = self
            .interface
            .query(":SOURCE:CORRECTION:CSET:DATA:FREQUENCY?")
            .await?;
        let power = self
            .interface
            .query(":SOURCE:CORRECTION:CSET:DATA:POWER?")
            .await?;
        Ok((parse_float_list(&frequency)?, parse_float_list(&power)?))
    }

    pub async fn enable_correction(&self, id: u8) -> Result<()> {
        self.select_correction_table(id).await?;
        self.interface.command(":SOURCE:CORRECTION:STATE ON").await
    }

    pub async fn disable_correction(&self) -> Result<()> {
        self.interface.command(":SOURCE:CORRECTION:STATE OFF").await
    }

    pub async fn enable_am_modulation(&self, enabled: bool) -> Result<()> {
        self.interface
            .command(&format!(":SOURCE:AM:STATE {}", on_off(enabled)))
            .await
    }

    pub async fn set_am_source(&self, source: AmSource) -> Result<()> {
        self.interface
            .command(&format!(":SOURCE:AM:SOURCE {}", source))
            .await
    }

    /// Modulation depth as a fraction, 0..1.
    pub async fn set_am_depth(&self, depth: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&depth) {
            return Err(XlabError::invalid(
                "AM modulation depth must be between [0..1]",
            ));
        }
        self.interface
            .command(&format!(":SOURCE:AM:DEPTH {:.3} PCT", depth * 100.0))
            .await
    }

    /// Internal modulation frequency in Hz.
    pub async fn set_am_frequency(&self, frequency: f64) -> Result<()> {
        self.interface
            .command(&format!(":SOURCE:AM:INTERNAL:FREQUENCY {:.3} Hz", frequency))
            .await
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

#[async_trait]
impl SignalGenerator for Sml01 {
    async fn set_frequency(&self, frequency: f64) -> Result<()> {
        self.interface
            .command(&format!(":SOURCE:FREQUENCY {:.2} Hz", frequency))
            .await
    }

    async fn set_power(&self, power: f64) -> Result<()> {
        self.interface
            .command(&format!(":SOURCE:POWER {:.2} dBm", power))
            .await
    }

    async fn enable_output(&self, enabled: bool) -> Result<()> {
        self.interface
            .command(&format!(":OUTPUT1:STATE {}", on_off(enabled)))
            .await
    }
}
