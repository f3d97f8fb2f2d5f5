//! Thurlby Thandar Instruments (TTi) power supplies and electronic loads.
//!
//! | driver | instruments | identity pattern |
//! |--------|-------------|------------------|
//! | [`Pl303`] | PL303 and other New PL DC supplies | `.*DC Power Supply$` |
//! | [`Ld400`] | LD400 electronic load | `LD400 Electronic Load$` |
//!
//! Both speak a line protocol over their USB serial port at 19200 baud:
//! commands end in `\n`, readings come back with a one-letter unit
//! (`12.003V`).

pub mod ld400;
pub mod pl303;

pub use ld400::{Ld400, Ld400Factory};
pub use pl303::{Pl303, Pl303Factory};

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::debug;
use xlab_core::scpi::parse_unit_suffixed;
use xlab_core::serial::{discard_input, open_shared, SharedPort};
use xlab_core::{Result, XlabError};

const BAUD_RATE: u32 = 19_200;
const READ_TIMEOUT: Duration = Duration::from_secs(1);
const QUIET_MS: u64 = 10;

/// Line transport shared by the TTi drivers.
#[derive(Clone)]
pub(crate) struct TtiLink {
    port: SharedPort,
    name: &'static str,
}

impl fmt::Debug for TtiLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtiLink").field("name", &self.name).finish()
    }
}

impl TtiLink {
    pub(crate) async fn open(port_path: &str, name: &'static str) -> Result<Self> {
        Ok(Self::new(open_shared(port_path, BAUD_RATE, name).await?, name))
    }

    pub(crate) fn new(port: SharedPort, name: &'static str) -> Self {
        Self { port, name }
    }

    pub(crate) async fn command(&self, command: &str) -> Result<()> {
        let mut port = self.port.lock().await;
        debug!(device = self.name, command, "sending");
        port.get_mut()
            .write_all(format!("{}\n", command).as_bytes())
            .await?;
        port.get_mut().flush().await?;
        Ok(())
    }

    /// Send a query and parse a unit-suffixed reading.
    ///
    /// A reply that missed an earlier timeout is discarded first.
    pub(crate) async fn query_reading(&self, query: &str) -> Result<f64> {
        let mut port = self.port.lock().await;
        discard_input(&mut port, QUIET_MS).await;
        port.get_mut()
            .write_all(format!("{}\n", query).as_bytes())
            .await?;
        port.get_mut().flush().await?;

        let mut line = String::new();
        match tokio::time::timeout(READ_TIMEOUT, port.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(XlabError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} connection closed", self.name),
            ))),
            Ok(Ok(_)) => {
                debug!(device = self.name, query, reply = %line.trim(), "reply");
                parse_unit_suffixed(&line)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(XlabError::Timeout(format!(
                "{} did not answer '{}'",
                self.name, query
            ))),
        }
    }
}
