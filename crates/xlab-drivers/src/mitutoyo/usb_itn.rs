//! Mitutoyo USB-ITN USB-to-Digimatic cable.
//!
//! The cable enumerates as a serial port (115200 baud). A reading is
//! requested with `1\r` and answered with `01A<value>\r`, or with a `91x`
//! error code.
//!
//! | code | meaning |
//! |------|---------|
//! | `911` | gauge did not answer (cable not connected) |
//! | `918` | gauge busy, retried after 50 ms |
//! | other `91x` | gauge error |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use xlab_core::capabilities::{DeviceCategory, Readable};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::serial::{
    discard_input, open_shared, port_from_resource, read_until_timeout, SharedPort,
};
use xlab_core::{Interface, Result, XlabError};

const BAUD_RATE: u32 = 115_200;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_RETRIES: u32 = 5;
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// Factory for the USB-ITN cable.
pub struct UsbItnFactory;

impl DriverFactory for UsbItnFactory {
    fn driver_type(&self) -> &'static str {
        "usb_itn"
    }

    fn name(&self) -> &'static str {
        "Mitutoyo USB-ITN Digimatic Interface"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Mitutoyo
    }

    fn id_pattern(&self) -> &'static str {
        r"USB-ITN$"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Readable]
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let driver = UsbItn::open(port_from_resource(interface.resource())).await?;
            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Gauge)
                .with_readable(Arc::new(driver)))
        })
    }
}

/// What a single read request returned.
#[derive(Debug, PartialEq)]
enum Reply {
    Value(f64),
    Busy,
}

fn parse_reply(reply: &[u8]) -> Result<Reply> {
    let text = String::from_utf8_lossy(reply);
    if let Some(value) = text.strip_prefix("01A") {
        let value = value.trim().parse::<f64>().map_err(|_| {
            XlabError::protocol(format!("Invalid value from USB-ITN: {:?}", text))
        })?;
        return Ok(Reply::Value(value));
    }

    match text.as_ref() {
        "911" => Err(XlabError::Timeout(
            "Timeout reading from digimatic device".into(),
        )),
        "918" => Ok(Reply::Busy),
        code if code.starts_with("91") => Err(XlabError::protocol(format!(
            "Error when reading from digimatic device: received {:?}",
            code
        ))),
        other => Err(XlabError::protocol(format!(
            "Unexpected reply from USB-ITN: {:?}",
            other
        ))),
    }
}

/// Driver for the USB-ITN cable.
pub struct UsbItn {
    port: SharedPort,
}

impl fmt::Debug for UsbItn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbItn").finish_non_exhaustive()
    }
}

impl UsbItn {
    /// Open the cable on a serial port.
    pub async fn open(port_path: &str) -> Result<Self> {
        Ok(Self::with_port(
            open_shared(port_path, BAUD_RATE, "USB-ITN").await?,
        ))
    }

    /// Use an already opened port.
    pub fn with_port(port: SharedPort) -> Self {
        Self { port }
    }

    async fn request(&self) -> Result<Reply> {
        let mut port = self.port.lock().await;
        port.get_mut().write_all(b"1\r").await?;
        port.get_mut().flush().await?;

        let mut reply = read_until_timeout(&mut *port, b'\r', REPLY_TIMEOUT)
            .await
            .map_err(|e| match e {
                XlabError::Timeout(_) => XlabError::Timeout("Timeout reading from USB-ITN".into()),
                other => other,
            })?;
        reply.pop();
        debug!(reply = %String::from_utf8_lossy(&reply), "USB-ITN reply");
        parse_reply(&reply)
    }

    /// Read the gauge.
    #[instrument(skip(self), err)]
    pub async fn read_value(&self) -> Result<f64> {
        discard_input(&mut *self.port.lock().await, 20).await;

        for attempt in 0..BUSY_RETRIES {
            match self.request().await? {
                Reply::Value(value) => return Ok(value),
                Reply::Busy => {
                    debug!(attempt, "digimatic device busy");
                    tokio::time::sleep(BUSY_BACKOFF).await;
                }
            }
        }

        Err(XlabError::protocol(
            "Retry count exceeded while reading from digimatic device: received \"918\"",
        ))
    }
}

#[async_trait]
impl Readable for UsbItn {
    async fn read(&self) -> Result<f64> {
        self.read_value().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use xlab_core::serial::wrap_shared;

    fn cable() -> (DuplexStream, UsbItn) {
        let (host, device) = tokio::io::duplex(64);
        (host, UsbItn::with_port(wrap_shared(Box::new(device))))
    }

    #[test]
    fn reply_codes() {
        assert_eq!(parse_reply(b"01A+00012.345").unwrap(), Reply::Value(12.345));
        assert_eq!(parse_reply(b"918").unwrap(), Reply::Busy);
        assert!(matches!(parse_reply(b"911"), Err(XlabError::Timeout(_))));
        assert!(matches!(parse_reply(b"912"), Err(XlabError::Protocol(_))));
        assert!(matches!(parse_reply(b"hello"), Err(XlabError::Protocol(_))));
    }

    #[tokio::test]
    async fn reads_value_after_busy() {
        let (mut host, gauge) = cable();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 2];
            host.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"1\r");
            host.write_all(b"918\r").await.unwrap();
            host.read_exact(&mut buf).await.unwrap();
            host.write_all(b"01A-0001.50\r").await.unwrap();
            host
        });

        assert_eq!(gauge.read().await.unwrap(), -1.5);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_when_always_busy() {
        let (mut host, gauge) = cable();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 2];
            for _ in 0..BUSY_RETRIES {
                host.read_exact(&mut buf).await.unwrap();
                host.write_all(b"918\r").await.unwrap();
            }
            host
        });

        let err = gauge.read().await.unwrap_err();
        assert!(matches!(err, XlabError::Protocol(_)));
        responder.await.unwrap();
    }

    #[test]
    fn debug_hides_port() {
        let (_host, gauge) = cable();
        assert_eq!(format!("{:?}", gauge), "UsbItn { .. }");
    }

    #[test]
    fn identity_pattern() {
        assert!(UsbItnFactory.matches("USB-ITN").unwrap());
        assert!(!UsbItnFactory.matches("USB-ITN v2").unwrap());
    }
}
