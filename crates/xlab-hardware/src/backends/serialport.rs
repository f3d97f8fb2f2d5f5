//! Serial port backend.
//!
//! Ports are listed as `<port>:<description>`, where the description is the
//! USB product string when there is one and the port type otherwise. Drivers
//! match on the description (`K8090 8-Channel Relay Card`, `USB-ITN`) and
//! open the port themselves with the line settings they need.

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use xlab_core::interface::DEFAULT_TIMEOUT;
use xlab_core::{Interface, Result, XlabError};

use super::Backend;

static COM_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(COM\d+\)$").expect("Invalid COM suffix regex"));

/// Drop the ` (COMn)` suffix Windows appends to USB product strings.
pub fn clean_description(description: &str) -> String {
    COM_SUFFIX.replace(description.trim(), "").into_owned()
}

/// Enumerates local serial ports.
#[derive(Debug, Default)]
pub struct SerialPortBackend;

impl SerialPortBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "serial")]
fn enumerate() -> Result<Vec<String>> {
    use ::serialport::SerialPortType;

    let ports = ::serialport::available_ports()
        .map_err(|e| XlabError::NotAvailable(format!("cannot enumerate serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match &port.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .clone()
                    .unwrap_or_else(|| "USB serial port".to_string()),
                SerialPortType::PciPort => "PCI serial port".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
                SerialPortType::Unknown => "Serial port".to_string(),
            };
            format!("{}:{}", port.port_name, clean_description(&description))
        })
        .collect())
}

#[cfg(not(feature = "serial"))]
fn enumerate() -> Result<Vec<String>> {
    Ok(Vec::new())
}

#[async_trait]
impl Backend for SerialPortBackend {
    fn name(&self) -> &'static str {
        "serialport"
    }

    async fn list(&self) -> Result<Vec<String>> {
        let ports = tokio::task::spawn_blocking(enumerate)
            .await
            .map_err(|e| XlabError::Io(std::io::Error::other(e)))??;
        debug!(count = ports.len(), "serial ports enumerated");
        Ok(ports)
    }

    async fn open(&self, resource: &str) -> Result<Arc<dyn Interface>> {
        Ok(Arc::new(SerialPortInterface::parse(resource)?))
    }
}

/// Description of one serial port.
///
/// Identifies by its description and carries no messages: the driver bound
/// to it opens the port.
pub struct SerialPortInterface {
    resource: String,
    port: String,
    description: String,
}

impl SerialPortInterface {
    /// Parse `<port>:<description>`. Does not touch the port.
    pub fn parse(resource: &str) -> Result<Self> {
        let (port, description) = resource
            .split_once(':')
            .filter(|(port, _)| !port.is_empty())
            .ok_or_else(|| {
                XlabError::InvalidInterfaceId(format!(
                    "serialport:{} (expected <port>:<description>)",
                    resource
                ))
            })?;
        Ok(Self {
            resource: resource.to_string(),
            port: port.to_string(),
            description: description.to_string(),
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn unsupported(&self) -> XlabError {
        XlabError::Unsupported(format!(
            "serial port {} carries no messages; use its driver",
            self.port
        ))
    }
}

impl fmt::Debug for SerialPortInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPortInterface")
            .field("port", &self.port)
            .field("description", &self.description)
            .finish()
    }
}

#[async_trait]
impl Interface for SerialPortInterface {
    fn backend(&self) -> &str {
        "serialport"
    }

    fn resource(&self) -> &str {
        &self.resource
    }

    async fn identify(&self) -> Result<String> {
        Ok(self.description.clone())
    }

    async fn command(&self, _data: &str) -> Result<()> {
        Err(self.unsupported())
    }

    async fn query(&self, _query: &str) -> Result<String> {
        Err(self.unsupported())
    }

    async fn query_raw(&self, _query: &str) -> Result<Vec<u8>> {
        Err(self.unsupported())
    }

    fn set_timeout(&self, _timeout: Duration) {}

    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_com_suffix() {
        assert_eq!(
            clean_description("K8090 8-Channel Relay Card (COM5)"),
            "K8090 8-Channel Relay Card"
        );
        assert_eq!(clean_description("USB-ITN"), "USB-ITN");
    }

    #[tokio::test]
    async fn open_splits_port_and_description() {
        let backend = SerialPortBackend::new();
        let iface = backend
            .open("COM5:K8090 8-Channel Relay Card")
            .await
            .unwrap();
        assert_eq!(iface.identify().await.unwrap(), "K8090 8-Channel Relay Card");
        assert_eq!(
            iface.interface_id(),
            "serialport:COM5:K8090 8-Channel Relay Card"
        );
        assert!(matches!(
            iface.query("*IDN?").await,
            Err(XlabError::Unsupported(_))
        ));

        let unix = SerialPortInterface::parse("/dev/ttyUSB0:New PL DC Power Supply").unwrap();
        assert_eq!(unix.port(), "/dev/ttyUSB0");
        assert!(SerialPortInterface::parse("COM5").is_err());
    }
}
