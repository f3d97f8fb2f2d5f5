//! Experiments: timed sequences of measurements.
//!
//! An [`Experiment`] repeatedly calls a measure step, collects the rows in a
//! [`DataTable`], hands every row to its [`Logger`]s and the table to its
//! [`Plotter`]s. With [`Conditions`] it steps through sets of process
//! parameters, calling apply-condition steps whenever the set changes.
//!
//! Callbacks return `anyhow::Result` so instrument errors and user errors
//! can be mixed freely.

pub mod conditions;
pub mod data;
pub mod experiment;
pub mod logger;
pub mod plotter;
pub mod util;

pub use conditions::Conditions;
pub use data::{DataTable, Measurement, Value};
pub use experiment::{
    apply_fn, measure_fn, ApplyCondition, ApplyFn, Experiment, ExperimentHandle, Measure,
    MeasureFn,
};
pub use logger::{read_csv, read_csv_with_separator, CsvLogger, Logger};
pub use plotter::{LogPlotter, Plotter};
pub use util::{timestamp, wait};
