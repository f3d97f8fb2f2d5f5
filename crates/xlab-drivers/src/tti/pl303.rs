//! TTi PL303 (and other New PL series) DC power supplies.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::instrument;
use xlab_core::capabilities::{DeviceCategory, PowerSupply};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::serial::{port_from_resource, SharedPort};
use xlab_core::{Interface, Result};

use super::TtiLink;

/// Factory for New PL series supplies.
pub struct Pl303Factory;

impl DriverFactory for Pl303Factory {
    fn driver_type(&self) -> &'static str {
        "pl303"
    }

    fn name(&self) -> &'static str {
        "TTi PL303 DC Power Supply"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Tti
    }

    fn id_pattern(&self) -> &'static str {
        r".*DC Power Supply$"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::PowerSupply]
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let link = TtiLink::open(port_from_resource(interface.resource()), "PL303").await?;
            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::PowerSupply)
                .with_power_supply(Arc::new(Pl303 { link })))
        })
    }
}

/// Driver for a New PL series supply. Channels are numbered from 1.
#[derive(Debug, Clone)]
pub struct Pl303 {
    link: TtiLink,
}

impl Pl303 {
    /// Use an already opened port.
    pub fn with_port(port: SharedPort) -> Self {
        Self {
            link: TtiLink::new(port, "PL303"),
        }
    }

    /// Over voltage protection trip point in volts.
    pub async fn set_overvoltage(&self, channel: u8, volts: f64) -> Result<()> {
        self.link
            .command(&format!("OVP{} {:.6}", channel, volts))
            .await
    }

    /// Over current protection trip point in amps.
    pub async fn set_overcurrent(&self, channel: u8, amps: f64) -> Result<()> {
        self.link
            .command(&format!("OCP{} {:.6}", channel, amps))
            .await
    }

    /// Clear over voltage / over current trips.
    pub async fn trip_reset(&self) -> Result<()> {
        self.link.command("TRIPRST").await
    }
}

#[async_trait]
impl PowerSupply for Pl303 {
    #[instrument(skip(self), err)]
    async fn set_voltage(&self, channel: u8, volts: f64) -> Result<()> {
        self.link
            .command(&format!("V{} {:.6}", channel, volts))
            .await
    }

    #[instrument(skip(self), err)]
    async fn set_current(&self, channel: u8, amps: f64) -> Result<()> {
        self.link
            .command(&format!("I{} {:.6}", channel, amps))
            .await
    }

    async fn read_voltage(&self, channel: u8) -> Result<f64> {
        self.link.query_reading(&format!("V{}O?", channel)).await
    }

    async fn read_current(&self, channel: u8) -> Result<f64> {
        self.link.query_reading(&format!("I{}O?", channel)).await
    }

    async fn enable_output(&self, channel: u8, enabled: bool) -> Result<()> {
        self.link
            .command(&format!("OP{} {}", channel, u8::from(enabled)))
            .await
    }
}
