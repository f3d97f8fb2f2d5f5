//! Measured values, single measurements and the table they accumulate in.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// One measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Float(_) => None,
            Value::Text(s) => Some(s),
        }
    }

    /// Numeric text becomes a float, anything else stays text.
    pub fn parse(cell: &str) -> Self {
        match cell.trim().parse::<f64>() {
            Ok(v) => Value::Float(v),
            Err(_) => Value::Text(cell.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v.into())
    }
}

macro_rules! int_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Float(v as f64)
            }
        })*
    };
}

int_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Float(if v { 1.0 } else { 0.0 })
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

// =============================================================================
// Measurement
// =============================================================================

/// Named values taken at one instant, in insertion order.
///
/// Also used for one set of experimental conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    entries: Vec<(String, Value)>,
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, keeping its position if it is already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Copy every entry of `other` into this measurement.
    pub fn extend_from(&mut self, other: &Measurement) {
        for (name, value) in other.iter() {
            self.insert(name, value.clone());
        }
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Measurement {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut m = Measurement::new();
        for (name, value) in iter {
            m.insert(name, value);
        }
        m
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

// =============================================================================
// DataTable
// =============================================================================

/// Rows of measurements sharing one set of columns.
///
/// The first appended row fixes the columns and their order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with fixed columns and no rows yet.
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a measurement. Returns `true` when it was the first row.
    pub fn push(&mut self, measurement: &Measurement) -> Result<bool> {
        let first = self.rows.is_empty();
        if first && self.columns.is_empty() {
            self.columns = measurement.columns().map(str::to_string).collect();
        } else if !measurement.columns().eq(self.columns.iter().map(String::as_str)) {
            bail!(
                "measurement columns [{}] differ from table columns [{}]",
                measurement.columns().collect::<Vec<_>>().join(", "),
                self.columns.join(", ")
            );
        }
        self.push_row(measurement.values().cloned().collect())?;
        Ok(first)
    }

    /// Append raw values in column order.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Numeric values of one column; text cells are skipped.
    pub fn column_f64(&self, name: &str) -> Option<Vec<f64>> {
        let values = self.column(name)?;
        Some(values.into_iter().filter_map(Value::as_f64).collect())
    }

    /// Row `index` as a measurement.
    pub fn row(&self, index: usize) -> Option<Measurement> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .zip(row)
                .map(|(c, v)| (c.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn last(&self) -> Option<Measurement> {
        self.len().checked_sub(1).and_then(|i| self.row(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_promote_to_float() {
        assert_eq!(Value::from(3), Value::Float(3.0));
        assert_eq!(Value::from(7u64), Value::Float(7.0));
        assert_eq!(Value::from("on"), Value::Text("on".into()));
        assert_eq!(Value::parse("1e-3"), Value::Float(0.001));
        assert_eq!(Value::parse("OVLD"), Value::Text("OVLD".into()));
    }

    #[test]
    fn insert_keeps_position() {
        let mut m = Measurement::new();
        m.insert("time", 0.0);
        m.insert("voltage", 1.5);
        m.insert("time", 2.0);
        assert_eq!(m.columns().collect::<Vec<_>>(), vec!["time", "voltage"]);
        assert_eq!(m.get("time"), Some(&Value::Float(2.0)));
        assert_eq!(m.to_string(), "time=2 voltage=1.5");
    }

    #[test]
    fn first_row_fixes_columns() {
        let mut table = DataTable::new();
        let a: Measurement = [("time", 0.0), ("v", 1.0)].into_iter().collect();
        let b: Measurement = [("time", 1.0), ("v", 2.0)].into_iter().collect();
        let swapped: Measurement = [("v", 3.0), ("time", 2.0)].into_iter().collect();
        let extra: Measurement = [("time", 2.0), ("v", 3.0), ("i", 0.1)].into_iter().collect();

        assert!(table.push(&a).unwrap());
        assert!(!table.push(&b).unwrap());
        assert!(table.push(&swapped).is_err());
        assert!(table.push(&extra).is_err());

        assert_eq!(table.len(), 2);
        assert_eq!(table.column_f64("v").unwrap(), vec![1.0, 2.0]);
        assert_eq!(table.last().unwrap(), b);
        assert!(table.column("i").is_none());
    }
}
