//! Instrument interfaces.
//!
//! An interface is a connection to one instrument through one backend. It is
//! named by its *interface id*, `<backend>:<resource>`, for example
//! `visa:ASRL5::INSTR` or `serialport:COM5:K8090 8-Channel Relay Card`.
//!
//! Message based backends (VISA, raw SCPI sockets) carry commands and
//! queries. Serial interfaces only describe a port: the driver bound to them
//! opens the port itself with the line settings it needs, so `command` and
//! `query` return [`XlabError::Unsupported`] there.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::error::{Result, XlabError};
use crate::scpi::read_block_response;
use crate::serial::{discard_input, wrap_shared, DynSerial, SharedPort};

/// Default time to wait for a reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Split an interface id into backend name and resource.
///
/// Only the first `:` separates; resources may contain further colons.
pub fn split_interface_id(id: &str) -> Result<(&str, &str)> {
    id.split_once(':')
        .filter(|(backend, _)| !backend.is_empty())
        .ok_or_else(|| XlabError::InvalidInterfaceId(id.to_string()))
}

/// Connection to one instrument.
#[async_trait]
pub trait Interface: Send + Sync + fmt::Debug {
    /// Name of the backend serving this interface
    fn backend(&self) -> &str;

    /// Backend-specific resource name
    fn resource(&self) -> &str;

    /// `<backend>:<resource>`
    fn interface_id(&self) -> String {
        format!("{}:{}", self.backend(), self.resource())
    }

    /// Identification string used to select a driver.
    async fn identify(&self) -> Result<String>;

    /// Write one message. The transport appends the terminator.
    async fn command(&self, data: &str) -> Result<()>;

    /// Write a query and read one reply, terminator stripped.
    async fn query(&self, query: &str) -> Result<String>;

    /// Write a query whose reply is a double-quoted multi-line text (`CMD "`,
    /// body lines, `"`) and return the whole reply.
    ///
    /// Transports that frame replies by an end marker rather than by line
    /// return it from a plain `query`.
    async fn query_quoted(&self, query: &str) -> Result<String> {
        self.query(query).await
    }

    /// Write a query and read one definite length block reply, header
    /// included.
    async fn query_raw(&self, query: &str) -> Result<Vec<u8>>;

    /// Change the reply timeout.
    fn set_timeout(&self, timeout: Duration);

    /// Current reply timeout.
    fn timeout(&self) -> Duration;
}

// =============================================================================
// Stream transport
// =============================================================================

/// Message transport over any async byte stream.
///
/// Writes are terminated with `\n`; replies are read up to `\n` within the
/// timeout. Used for raw SCPI sockets and for tests over
/// `tokio::io::duplex`.
pub struct StreamInterface {
    backend: String,
    resource: String,
    port: SharedPort,
    timeout_ms: AtomicU64,
}

impl StreamInterface {
    /// Wrap a stream.
    pub fn new(backend: impl Into<String>, resource: impl Into<String>, stream: DynSerial) -> Self {
        Self::from_shared(backend, resource, wrap_shared(stream))
    }

    /// Wrap an already shared port.
    pub fn from_shared(
        backend: impl Into<String>,
        resource: impl Into<String>,
        port: SharedPort,
    ) -> Self {
        Self {
            backend: backend.into(),
            resource: resource.into(),
            port,
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT.as_millis() as u64),
        }
    }

    async fn write_message(
        guard: &mut tokio::io::BufReader<DynSerial>,
        data: &str,
    ) -> Result<()> {
        let port = guard.get_mut();
        port.write_all(data.as_bytes()).await?;
        port.write_all(b"\n").await?;
        port.flush().await?;
        Ok(())
    }

    /// Drop leftovers of an earlier reply that arrived after its timeout,
    /// then write the query.
    async fn send_query(guard: &mut tokio::io::BufReader<DynSerial>, query: &str) -> Result<()> {
        discard_input(guard, 0).await;
        Self::write_message(guard, query).await
    }

    async fn read_quoted(reader: &mut tokio::io::BufReader<DynSerial>) -> Result<String> {
        let mut reply = String::new();
        let mut lines = 0usize;
        loop {
            let start = reply.len();
            if reader.read_line(&mut reply).await? == 0 {
                return Err(XlabError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed inside quoted reply",
                )));
            }
            lines += 1;
            if lines > 1 && reply[start..].trim() == "\"" {
                return Ok(reply);
            }
        }
    }
}

impl fmt::Debug for StreamInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInterface")
            .field("backend", &self.backend)
            .field("resource", &self.resource)
            .field("timeout", &self.timeout())
            .finish()
    }
}

#[async_trait]
impl Interface for StreamInterface {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn resource(&self) -> &str {
        &self.resource
    }

    async fn identify(&self) -> Result<String> {
        Ok(self.query("*IDN?").await?.trim().to_string())
    }

    #[instrument(skip(self), fields(resource = %self.resource), err)]
    async fn command(&self, data: &str) -> Result<()> {
        let mut guard = self.port.lock().await;
        Self::write_message(&mut guard, data).await
    }

    #[instrument(skip(self), fields(resource = %self.resource), err)]
    async fn query(&self, query: &str) -> Result<String> {
        let timeout = self.timeout();
        let mut guard = self.port.lock().await;
        Self::send_query(&mut guard, query).await?;

        let mut line = String::new();
        let n = tokio::time::timeout(timeout, guard.read_line(&mut line))
            .await
            .map_err(|_| {
                XlabError::Timeout(format!(
                    "no reply to '{}' within {} ms",
                    query,
                    timeout.as_millis()
                ))
            })??;
        if n == 0 {
            return Err(XlabError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed",
            )));
        }

        let reply = line.trim_end_matches(&['\r', '\n'][..]).to_string();
        debug!(reply = %reply, "query reply");
        Ok(reply)
    }

    #[instrument(skip(self), fields(resource = %self.resource), err)]
    async fn query_quoted(&self, query: &str) -> Result<String> {
        let timeout = self.timeout();
        let mut guard = self.port.lock().await;
        Self::send_query(&mut guard, query).await?;

        tokio::time::timeout(timeout, Self::read_quoted(&mut guard))
            .await
            .map_err(|_| {
                XlabError::Timeout(format!(
                    "no complete quoted reply to '{}' within {} ms",
                    query,
                    timeout.as_millis()
                ))
            })?
    }

    #[instrument(skip(self), fields(resource = %self.resource), err)]
    async fn query_raw(&self, query: &str) -> Result<Vec<u8>> {
        let timeout = self.timeout();
        let mut guard = self.port.lock().await;
        Self::send_query(&mut guard, query).await?;

        let response = tokio::time::timeout(timeout, read_block_response(&mut *guard))
            .await
            .map_err(|_| {
                XlabError::Timeout(format!(
                    "no block reply to '{}' within {} ms",
                    query,
                    timeout.as_millis()
                ))
            })??;
        debug!(bytes = response.len(), "block reply");
        Ok(response)
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn interface_id_splits_at_first_colon() {
        assert_eq!(
            split_interface_id("visa:ASRL5::INSTR").unwrap(),
            ("visa", "ASRL5::INSTR")
        );
        assert_eq!(
            split_interface_id("serialport:COM5:K8090 8-Channel Relay Card").unwrap(),
            ("serialport", "COM5:K8090 8-Channel Relay Card")
        );
        assert!(split_interface_id("no-colon").is_err());
        assert!(split_interface_id(":resource").is_err());
    }

    #[tokio::test]
    async fn query_writes_terminator_and_strips_reply() {
        let (mut host, device) = tokio::io::duplex(256);
        let iface = StreamInterface::new("tcpip", "127.0.0.1:5025", Box::new(device));

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 6];
            host.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"*IDN?\n");
            host.write_all(b"Agilent Technologies,34405A,MY1,1.0\r\n")
                .await
                .unwrap();
            host
        });

        let id = iface.identify().await.unwrap();
        assert_eq!(id, "Agilent Technologies,34405A,MY1,1.0");
        assert_eq!(iface.interface_id(), "tcpip:127.0.0.1:5025");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn query_times_out_without_reply() {
        let (_host, device) = tokio::io::duplex(256);
        let iface = StreamInterface::new("tcpip", "x", Box::new(device));
        iface.set_timeout(Duration::from_millis(20));

        let err = iface.query("MEAS?").await.unwrap_err();
        assert!(matches!(err, XlabError::Timeout(_)));
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_the_next_one() {
        let (mut host, device) = tokio::io::duplex(256);
        let iface = StreamInterface::new("tcpip", "x", Box::new(device));
        iface.set_timeout(Duration::from_millis(20));

        assert!(iface.query("MEAS?").await.is_err());
        host.write_all(b"+1.0E+00\n").await.unwrap();

        let (reply, _) = tokio::join!(iface.query("MEAS?"), async {
            let mut sent = [0u8; 12];
            host.read_exact(&mut sent).await.unwrap();
            assert_eq!(&sent, b"MEAS?\nMEAS?\n");
            host.write_all(b"+2.0E+00\n").await.unwrap();
        });
        assert_eq!(reply.unwrap(), "+2.0E+00");
    }

    #[tokio::test]
    async fn query_quoted_reads_until_closing_quote() {
        let (mut host, device) = tokio::io::duplex(256);
        let iface = StreamInterface::new("tcpip", "x", Box::new(device));

        let (reply, _) = tokio::join!(iface.query_quoted("TEMPLATE?"), async {
            let mut sent = [0u8; 10];
            host.read_exact(&mut sent).await.unwrap();
            host.write_all(b"TMPL \"\nWAVEDESC: BLOCK\n/00 ENDBLOCK\n\"\n")
                .await
                .unwrap();
        });
        assert_eq!(
            crate::scpi::parse_quoted_response(&reply.unwrap()).unwrap(),
            "WAVEDESC: BLOCK\n/00 ENDBLOCK\n"
        );
    }

    #[tokio::test]
    async fn query_raw_reads_binary_block() {
        let (mut host, device) = tokio::io::duplex(256);
        let iface = StreamInterface::new("tcpip", "x", Box::new(device));

        let (raw, _) = tokio::join!(iface.query_raw("C1:WF? ALL"), async {
            let mut sent = [0u8; 11];
            host.read_exact(&mut sent).await.unwrap();
            host.write_all(b"C1:WF ALL,#14\n\x01\n\x02\n").await.unwrap();
        });
        assert_eq!(raw.unwrap(), b"C1:WF ALL,#14\n\x01\n\x02\n");
    }
}
