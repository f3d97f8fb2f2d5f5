//! Async byte-port plumbing.
//!
//! Serial drivers (relay card, power supply, load, gauge) open their own
//! port with [`open_shared`] and talk through a [`SharedPort`].
//! [`StreamInterface`](crate::interface::StreamInterface) uses the same
//! port type for sockets and in-memory test pipes.
//!
//! ```rust,ignore
//! let port = open_shared("/dev/ttyUSB0", 19200, "PL303").await?;
//! let mut guard = port.lock().await;
//! drain_serial_buffer(guard.get_mut(), 50).await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, XlabError};

/// Anything a driver can read from and write to: a serial stream, a TCP
/// socket or one end of `tokio::io::duplex`.
pub trait AsyncPort: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncPort for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type DynSerial = Box<dyn AsyncPort>;

/// Port shared between the tasks of one driver.
///
/// Reads go through the `BufReader` so line protocols can use
/// `read_line`; writes go to `get_mut()`.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open `path` at `baud` (8N1, no flow control) on a blocking thread.
///
/// `device` names the instrument in the error message.
pub async fn open_shared(path: &str, baud: u32, device: &str) -> Result<SharedPort> {
    let port = open_port(path.to_string(), baud)
        .await
        .map_err(|e| XlabError::NotAvailable(format!("{} on {}: {}", device, path, e)))?;
    Ok(wrap_shared(port))
}

#[cfg(feature = "serial")]
async fn open_port(path: String, baud: u32) -> std::result::Result<DynSerial, String> {
    use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

    let stream = tokio::task::spawn_blocking(move || {
        tokio_serial::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "serial"))]
async fn open_port(_path: String, _baud: u32) -> std::result::Result<DynSerial, String> {
    Err("serial support not compiled in".to_string())
}

/// Port name of a serial resource (`COM5:K8090 8-Channel Relay Card` → `COM5`).
pub fn port_from_resource(resource: &str) -> &str {
    resource.split_once(':').map_or(resource, |(port, _)| port)
}

/// Longest a drain may take, for ports that never go quiet.
const DRAIN_LIMIT: Duration = Duration::from_secs(1);

/// Discard whatever arrives until the port stays quiet for `quiet_ms`.
/// Returns the number of bytes thrown away.
///
/// A zero window only takes what is already available. Gives up after one
/// second of continuous input.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, quiet_ms: u64) -> usize {
    let quiet = Duration::from_millis(quiet_ms);
    let limit = Instant::now() + DRAIN_LIMIT;
    let mut scratch = [0u8; 256];
    let mut dropped = 0;

    while Instant::now() < limit {
        match tokio::time::timeout(quiet, port.read(&mut scratch)).await {
            Ok(Ok(n)) if n > 0 => dropped += n,
            _ => break,
        }
    }
    dropped
}

/// Drop buffered and pending input so the next reply read belongs to the
/// next request. Returns the number of bytes thrown away.
pub async fn discard_input<R: AsyncRead + Unpin>(port: &mut BufReader<R>, quiet_ms: u64) -> usize {
    let buffered = port.buffer().len();
    port.consume(buffered);
    let dropped = buffered + drain_serial_buffer(port.get_mut(), quiet_ms).await;
    if dropped > 0 {
        debug!(bytes = dropped, "discarded stale input");
    }
    dropped
}

/// Read until `delimiter` (included in the result) within `timeout`.
///
/// # Errors
///
/// - [`XlabError::Timeout`] when the delimiter does not arrive in time
/// - [`XlabError::Io`] when the port closes or fails
pub async fn read_until_timeout<R>(reader: &mut R, delimiter: u8, timeout: Duration) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    match tokio::time::timeout(timeout, reader.read_until(delimiter, &mut buf)).await {
        Ok(Ok(0)) => Err(XlabError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "port closed",
        ))),
        Ok(Ok(_)) if buf.last() != Some(&delimiter) => Err(XlabError::Timeout(format!(
            "reply not terminated by 0x{:02x}",
            delimiter
        ))),
        Ok(Ok(_)) => Ok(buf),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(XlabError::Timeout(format!(
            "no reply within {} ms",
            timeout.as_millis()
        ))),
    }
}
