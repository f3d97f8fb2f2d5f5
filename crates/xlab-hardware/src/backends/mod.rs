//! Instrument backends.
//!
//! A backend enumerates the resources it can reach and opens an
//! [`Interface`] to one of them. Backends are keyed by name in the
//! [`InstrumentRegistry`](crate::InstrumentRegistry); the name is the first
//! part of an interface id.
//!
//! | name | resources | interface |
//! |------|-----------|-----------|
//! | `visa` | VISA resource strings (`USB0::...::INSTR`) | message based |
//! | `serialport` | `<port>:<description>` | port description only |
//! | `tcpip` | `host[:port]` raw SCPI sockets | message based |
//! | `mock` | programmatically registered | scripted |

pub mod mock;
pub mod serialport;
pub mod tcpip;
pub mod visa;

pub use mock::MockBackend;
pub use serialport::{SerialPortBackend, SerialPortInterface};
pub use tcpip::TcpipBackend;
pub use visa::VisaBackend;

use std::sync::Arc;

use async_trait::async_trait;
use xlab_core::{Interface, Result};

/// Source of instrument interfaces.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name, the prefix of its interface ids.
    fn name(&self) -> &'static str;

    /// Resource names currently reachable.
    async fn list(&self) -> Result<Vec<String>>;

    /// Open an interface to `resource`.
    async fn open(&self, resource: &str) -> Result<Arc<dyn Interface>>;
}
