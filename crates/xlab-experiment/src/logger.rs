//! Measurement loggers.
//!
//! A logger sees the column names once, when the first measurement arrives,
//! then every measurement as it is taken, and is finished when the
//! experiment ends for any reason.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::data::{DataTable, Measurement, Value};

#[async_trait]
pub trait Logger: Send {
    /// Called once with the columns fixed by the first measurement.
    async fn start(&mut self, columns: &[String]) -> Result<()>;

    async fn log(&mut self, measurement: &Measurement) -> Result<()>;

    async fn finish(&mut self) -> Result<()>;
}

/// Writes measurements to a new CSV file.
///
/// The file is created exclusively when the first measurement arrives;
/// logging into an existing file is an error. Every row is flushed.
pub struct CsvLogger {
    path: PathBuf,
    separator: u8,
    writer: Option<csv::Writer<File>>,
    rows: usize,
}

impl CsvLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            separator: b',',
            writer: None,
            rows: 0,
        }
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>> {
        self.writer
            .as_mut()
            .with_context(|| format!("CSV log '{}' is not started", self.path.display()))
    }
}

#[async_trait]
impl Logger for CsvLogger {
    async fn start(&mut self, columns: &[String]) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .with_context(|| format!("Failed to create CSV log '{}'", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.separator)
            .from_writer(file);
        writer.write_record(columns)?;
        writer.flush()?;

        info!(path = %self.path.display(), columns = columns.len(), "CSV log started");
        self.writer = Some(writer);
        self.rows = 0;
        Ok(())
    }

    async fn log(&mut self, measurement: &Measurement) -> Result<()> {
        let writer = self.writer()?;
        writer.write_record(measurement.values().map(Value::to_string))?;
        writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(path = %self.path.display(), rows = self.rows, "CSV log closed");
        }
        Ok(())
    }
}

/// Read a CSV log back into a table.
pub fn read_csv(path: impl AsRef<Path>) -> Result<DataTable> {
    read_csv_with_separator(path, b',')
}

/// Read a CSV log written with another separator.
///
/// Numeric cells become floats, other cells text.
pub fn read_csv_with_separator(path: impl AsRef<Path>, separator: u8) -> Result<DataTable> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV log '{}'", path.display()))?;

    let columns = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut table = DataTable::with_columns(columns);
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed row in '{}'", path.display()))?;
        table.push_row(record.iter().map(Value::parse).collect())?;
    }
    debug!(path = %path.display(), rows = table.len(), "read CSV log");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(time: f64, state: &str) -> Measurement {
        let mut m = Measurement::new();
        m.insert("time", time);
        m.insert("state", state);
        m.insert("voltage", time * 2.0);
        m
    }

    #[tokio::test]
    async fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut logger = CsvLogger::new(&path).with_separator(b';');

        let first = row(0.0, "idle");
        let columns: Vec<String> = first.columns().map(str::to_string).collect();
        logger.start(&columns).await.unwrap();
        logger.log(&first).await.unwrap();
        logger.log(&row(0.5, "busy")).await.unwrap();
        logger.finish().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "time;state;voltage\n0;idle;0\n0.5;busy;1\n");

        let table = read_csv_with_separator(&path, b';').unwrap();
        assert_eq!(table.columns(), ["time", "state", "voltage"]);
        assert_eq!(table.column_f64("voltage").unwrap(), vec![0.0, 1.0]);
        assert_eq!(table.row(1).unwrap().get("state"), Some(&Value::from("busy")));
    }

    #[tokio::test]
    async fn refuses_existing_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut logger = CsvLogger::new(file.path());
        assert!(logger.start(&["time".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn log_before_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = CsvLogger::new(dir.path().join("log.csv"));
        assert!(logger.log(&row(0.0, "idle")).await.is_err());
        logger.finish().await.unwrap();
    }
}
