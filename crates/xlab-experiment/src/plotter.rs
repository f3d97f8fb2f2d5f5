//! Progress reporting on the data gathered so far.

use anyhow::Result;
use tracing::info;

use crate::data::DataTable;

/// Receives the whole table after every measurement.
pub trait Plotter: Send {
    fn update(&mut self, data: &DataTable) -> Result<()>;
}

/// Reports the newest measurement through `tracing`.
///
/// Shows the chosen columns, or every column but `time`. With
/// [`LogPlotter::every`] only every n-th row is reported.
#[derive(Debug, Clone)]
pub struct LogPlotter {
    columns: Option<Vec<String>>,
    every: usize,
}

impl Default for LogPlotter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogPlotter {
    pub fn new() -> Self {
        Self {
            columns: None,
            every: 1,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn every(mut self, n: usize) -> Self {
        self.every = n.max(1);
        self
    }

    /// `name=value` pairs of the newest row.
    pub fn summary(&self, data: &DataTable) -> Option<String> {
        let last = data.last()?;
        let parts: Vec<String> = match &self.columns {
            Some(columns) => columns
                .iter()
                .filter_map(|c| last.get(c).map(|v| format!("{}={}", c, v)))
                .collect(),
            None => last
                .iter()
                .filter(|(name, _)| *name != "time")
                .map(|(name, v)| format!("{}={}", name, v))
                .collect(),
        };
        Some(parts.join(" "))
    }
}

impl Plotter for LogPlotter {
    fn update(&mut self, data: &DataTable) -> Result<()> {
        if data.len() % self.every != 0 {
            return Ok(());
        }
        if let Some(summary) = self.summary(data) {
            let time = data
                .last()
                .and_then(|m| m.get("time").and_then(|v| v.as_f64()))
                .unwrap_or_default();
            info!(sample = data.len(), time, "{}", summary);
        }
        Ok(())
    }
}
