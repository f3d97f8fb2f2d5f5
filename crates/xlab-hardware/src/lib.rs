//! Instrument backends, configuration and the instrument registry.
//!
//! ```rust,ignore
//! use xlab_hardware::{InstrumentRegistry, XlabConfig};
//!
//! let config = XlabConfig::load()?;
//! config.validate()?;
//! let registry = InstrumentRegistry::from_config(&config);
//!
//! let relay = registry.find_instrument("serialport:.*K8090").await?;
//! relay.components.relay_card.unwrap().switch_on(&[1, 2]).await?;
//! ```

pub mod backends;
pub mod config;
pub mod registry;

pub use backends::{Backend, MockBackend};
pub use config::{LogFormat, XlabConfig};
pub use registry::{DriverInfo, Instrument, InstrumentRegistry};
