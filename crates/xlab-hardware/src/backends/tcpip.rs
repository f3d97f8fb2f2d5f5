//! Raw SCPI socket backend.
//!
//! Connects to `host[:port]` (port 5025 when omitted) and exchanges
//! `\n`-terminated messages through a [`StreamInterface`]. Raw sockets cannot
//! be discovered, so `list()` returns the configured resources.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, instrument};
use xlab_core::{Interface, Result, StreamInterface, XlabError};

use super::Backend;

/// Default SCPI-RAW port.
pub const DEFAULT_PORT: u16 = 5025;

/// Split `host[:port]`.
pub fn parse_address(resource: &str) -> Result<(String, u16)> {
    let resource = resource.trim();
    let (host, port) = match resource.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                XlabError::InvalidInterfaceId(format!("tcpip:{} (invalid port)", resource))
            })?;
            (host, port)
        }
        None => (resource, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(XlabError::InvalidInterfaceId(format!(
            "tcpip:{} (missing host)",
            resource
        )));
    }
    Ok((host.to_string(), port))
}

#[derive(Debug, Clone)]
pub struct TcpipBackend {
    resources: Vec<String>,
    timeout: Duration,
}

impl TcpipBackend {
    /// Backend listing `resources`, using `timeout` for connecting and as the
    /// initial reply timeout of opened interfaces.
    pub fn new(resources: Vec<String>, timeout: Duration) -> Self {
        Self { resources, timeout }
    }
}

#[async_trait]
impl Backend for TcpipBackend {
    fn name(&self) -> &'static str {
        "tcpip"
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.resources.clone())
    }

    #[instrument(skip(self), err)]
    async fn open(&self, resource: &str) -> Result<Arc<dyn Interface>> {
        let (host, port) = parse_address(resource)?;
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| {
                XlabError::Timeout(format!("connecting to {}:{} timed out", host, port))
            })??;
        stream.set_nodelay(true)?;
        debug!(host = %host, port, "connected");

        let iface = StreamInterface::new("tcpip", resource, Box::new(stream));
        iface.set_timeout(self.timeout);
        Ok(Arc::new(iface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn address_defaults_to_scpi_raw_port() {
        assert_eq!(
            parse_address("192.168.1.20").unwrap(),
            ("192.168.1.20".to_string(), 5025)
        );
        assert_eq!(
            parse_address("scope.lab:1861").unwrap(),
            ("scope.lab".to_string(), 1861)
        );
        assert!(parse_address(":5025").is_err());
        assert!(parse_address("host:port").is_err());
    }

    #[tokio::test]
    async fn identifies_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut line = String::new();
            socket.read_line(&mut line).await.unwrap();
            assert_eq!(line, "*IDN?\n");
            socket
                .get_mut()
                .write_all(b"ROHDE&SCHWARZ,SML01,1090.3000.11/1,2.20\n")
                .await
                .unwrap();
        });

        let backend = TcpipBackend::new(vec![addr.to_string()], Duration::from_secs(2));
        assert_eq!(backend.list().await.unwrap(), vec![addr.to_string()]);

        let iface = backend.open(&addr.to_string()).await.unwrap();
        assert_eq!(
            iface.identify().await.unwrap(),
            "ROHDE&SCHWARZ,SML01,1090.3000.11/1,2.20"
        );
        assert_eq!(iface.interface_id(), format!("tcpip:{}", addr));
        server.await.unwrap();
    }
}
