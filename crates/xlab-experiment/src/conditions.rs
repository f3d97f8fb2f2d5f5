//! Sets of experimental conditions to step through.

use anyhow::{bail, Result};

use crate::data::{Measurement, Value};

/// Ordered list of conditions, each a set of named values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    names: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Conditions {
    /// All variables step together; every list must have the same length.
    pub fn zip<I, N, V>(variables: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, Vec<V>)>,
        N: Into<String>,
        V: Into<Value>,
    {
        let (names, columns) = split(variables);
        let len = columns.first().map_or(0, Vec::len);
        if let Some((name, column)) = names.iter().zip(&columns).find(|(_, c)| c.len() != len) {
            bail!(
                "condition '{}' has {} values, expected {}",
                name,
                column.len(),
                len
            );
        }

        let rows = (0..len)
            .map(|i| columns.iter().map(|c| c[i].clone()).collect())
            .collect();
        Ok(Self { names, rows })
    }

    /// Every combination of the variables; the last variable changes
    /// fastest.
    pub fn product<I, N, V>(variables: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<V>)>,
        N: Into<String>,
        V: Into<Value>,
    {
        let (names, columns) = split(variables);
        let mut rows: Vec<Vec<Value>> = vec![Vec::new()];
        for column in &columns {
            rows = rows
                .into_iter()
                .flat_map(|prefix| {
                    column.iter().map(move |v| {
                        let mut row = prefix.clone();
                        row.push(v.clone());
                        row
                    })
                })
                .collect();
        }
        Self { names, rows }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Condition `index` as named values.
    pub fn get(&self, index: usize) -> Option<Measurement> {
        let row = self.rows.get(index)?;
        Some(
            self.names
                .iter()
                .zip(row)
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = Measurement> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }
}

fn split<I, N, V>(variables: I) -> (Vec<String>, Vec<Vec<Value>>)
where
    I: IntoIterator<Item = (N, Vec<V>)>,
    N: Into<String>,
    V: Into<Value>,
{
    variables
        .into_iter()
        .map(|(n, values)| (n.into(), values.into_iter().map(Into::into).collect()))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_steps_together() {
        let c = Conditions::zip([("v", vec![1.0, 2.0, 3.0]), ("i", vec![0.1, 0.2, 0.3])]).unwrap();
        assert_eq!(c.len(), 3);
        let second = c.get(1).unwrap();
        assert_eq!(second.get("v"), Some(&Value::Float(2.0)));
        assert_eq!(second.get("i"), Some(&Value::Float(0.2)));
    }

    #[test]
    fn zip_rejects_unequal_lengths() {
        assert!(Conditions::zip([("v", vec![1.0, 2.0]), ("i", vec![0.1])]).is_err());
    }

    #[test]
    fn product_varies_last_fastest() {
        let c = Conditions::product([("a", vec![1, 2]), ("b", vec![10, 20, 30])]);
        assert_eq!(c.names(), ["a", "b"]);
        let rows: Vec<(f64, f64)> = c
            .iter()
            .map(|m| {
                (
                    m.get("a").and_then(Value::as_f64).unwrap(),
                    m.get("b").and_then(Value::as_f64).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            rows,
            vec![
                (1.0, 10.0),
                (1.0, 20.0),
                (1.0, 30.0),
                (2.0, 10.0),
                (2.0, 20.0),
                (2.0, 30.0)
            ]
        );
    }

    #[test]
    fn product_with_an_empty_variable_is_empty() {
        let c = Conditions::product([("a", vec![1.0]), ("b", Vec::<f64>::new())]);
        assert!(c.is_empty());
    }
}
