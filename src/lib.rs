//! # xlab
//!
//! Laboratory instrument control: find instruments on VISA, serial and
//! TCP/IP backends, bind them to drivers by their identity, and run timed
//! experiments that log to CSV.
//!
//! This crate re-exports the workspace crates so applications can depend on
//! `xlab` alone:
//!
//! - [`common`]: interfaces, errors, SCPI helpers and capability traits
//! - [`drivers`]: instrument drivers, one module per manufacturer
//! - [`hardware`]: backends, configuration and the instrument registry
//! - [`experiment`]: measurement loops, conditions and loggers
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use xlab::prelude::*;
//!
//! let registry = InstrumentRegistry::from_config(&XlabConfig::load()?);
//! let dmm = registry.find_instrument("visa:USB.*34405").await?.components.readable.unwrap();
//!
//! let data = Experiment::new(ReadableMeasure::new("voltage", dmm))
//!     .with_logger(CsvLogger::new(format!("{}.csv", timestamp())))
//!     .measurements_per_condition(10)
//!     .run(Duration::from_secs(1))
//!     .await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;

pub use xlab_core as common;
pub use xlab_drivers as drivers;
pub use xlab_experiment as experiment;
pub use xlab_hardware as hardware;

pub use xlab_core::{Interface, Result, XlabError};

use xlab_core::capabilities::Readable;
use xlab_experiment::{Measure, Measurement};

/// Common imports.
pub mod prelude {
    pub use crate::ReadableMeasure;
    pub use xlab_core::capabilities::*;
    pub use xlab_core::scpi::Param;
    pub use xlab_core::{Interface, XlabError};
    pub use xlab_experiment::{
        apply_fn, measure_fn, read_csv, timestamp, wait, Conditions, CsvLogger, DataTable,
        Experiment, LogPlotter, Measurement, Value,
    };
    pub use xlab_hardware::{Instrument, InstrumentRegistry, XlabConfig};
}

/// Measure step taking one reading from a [`Readable`] instrument.
pub struct ReadableMeasure {
    column: String,
    readable: Arc<dyn Readable>,
}

impl ReadableMeasure {
    pub fn new(column: impl Into<String>, readable: Arc<dyn Readable>) -> Self {
        Self {
            column: column.into(),
            readable,
        }
    }
}

#[async_trait]
impl Measure for ReadableMeasure {
    async fn measure(&self, measurement: &mut Measurement) -> anyhow::Result<()> {
        let value = self.readable.read().await?;
        measurement.insert(self.column.as_str(), value);
        Ok(())
    }
}
