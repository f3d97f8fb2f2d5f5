//! TTi LD400 DC electronic load.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::instrument;
use xlab_core::capabilities::{DeviceCategory, ElectronicLoad, Level, LoadMode};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::serial::{port_from_resource, SharedPort};
use xlab_core::{Interface, Result};

use super::TtiLink;

pub struct Ld400Factory;

impl DriverFactory for Ld400Factory {
    fn driver_type(&self) -> &'static str {
        "ld400"
    }

    fn name(&self) -> &'static str {
        "TTi LD400 Electronic Load"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Tti
    }

    fn id_pattern(&self) -> &'static str {
        r"LD400 Electronic Load$"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::ElectronicLoad]
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let link = TtiLink::open(port_from_resource(interface.resource()), "LD400").await?;
            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::ElectronicLoad)
                .with_electronic_load(Arc::new(Ld400 { link })))
        })
    }
}

/// Driver for the LD400.
///
/// Levels A and B are interpreted in the unit of the active [`LoadMode`].
#[derive(Debug, Clone)]
pub struct Ld400 {
    link: TtiLink,
}

impl Ld400 {
    pub fn with_port(port: SharedPort) -> Self {
        Self {
            link: TtiLink::new(port, "LD400"),
        }
    }
}

#[async_trait]
impl ElectronicLoad for Ld400 {
    #[instrument(skip(self), err)]
    async fn set_mode(&self, mode: LoadMode) -> Result<()> {
        self.link.command(&format!("MODE {}", mode.code())).await
    }

    #[instrument(skip(self), err)]
    async fn set_level(&self, level: Level, value: f64) -> Result<()> {
        self.link.command(&format!("{} {:.6}", level, value)).await
    }

    async fn select_level(&self, level: Level) -> Result<()> {
        self.link.command(&format!("LVLSEL {}", level)).await
    }

    async fn enable_input(&self, enabled: bool) -> Result<()> {
        self.link
            .command(&format!("INP {}", u8::from(enabled)))
            .await
    }

    async fn read_voltage(&self) -> Result<f64> {
        self.link.query_reading("V?").await
    }

    async fn read_current(&self) -> Result<f64> {
        self.link.query_reading("I?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use xlab_core::serial::wrap_shared;

    #[tokio::test]
    async fn mode_level_and_reading() {
        let (host, device) = tokio::io::duplex(256);
        let load = Ld400::with_port(wrap_shared(Box::new(device)));
        let mut host = BufReader::new(host);

        load.set_mode(LoadMode::Resistance).await.unwrap();
        load.set_level(Level::B, 4.7).await.unwrap();
        load.select_level(Level::B).await.unwrap();
        load.enable_input(false).await.unwrap();

        let mut sent = Vec::new();
        for _ in 0..4 {
            let mut line = String::new();
            host.read_line(&mut line).await.unwrap();
            sent.push(line);
        }
        assert_eq!(sent, vec!["MODE R\n", "B 4.700000\n", "LVLSEL B\n", "INP 0\n"]);

        let (reading, _) = tokio::join!(load.read_current(), async {
            let mut line = String::new();
            host.read_line(&mut line).await.unwrap();
            assert_eq!(line, "I?\n");
            host.write_all(b"1.250A\r\n").await.unwrap();
        });
        assert_eq!(reading.unwrap(), 1.25);
    }
}
