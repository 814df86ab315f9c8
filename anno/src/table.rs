use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

/// One column of a [`DataTable`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Column {
    /// String values
    Str(Vec<String>),
    /// Floating-point values
    F64(Vec<f64>),
    /// Integer values
    Int(Vec<i64>),
}

impl Column {
    /// Number of values in the column
    pub fn len(&self) -> usize {
        match self {
            Column::Str(v) => v.len(),
            Column::F64(v) => v.len(),
            Column::Int(v) => v.len(),
        }
    }

    /// Whether the column has no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the value at `row` for CSV-style output.
    pub fn format(&self, row: usize) -> String {
        match self {
            Column::Str(v) => v[row].clone(),
            Column::F64(v) => format!("{}", v[row]),
            Column::Int(v) => format!("{}", v[row]),
        }
    }
}

/// A named-column table used for result storage and export.
///
/// All columns share the same length; the first column added fixes the row
/// count.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    columns: Vec<(String, Column)>,
}

impl DataTable {
    /// An empty table
    pub fn new() -> DataTable {
        DataTable::default()
    }

    /// Number of rows (0 for an empty table)
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    /// Column names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Columns in insertion order
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Append a column, enforcing the shared row count.
    pub fn push(&mut self, name: &str, column: Column) -> Result<(), Error> {
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            bail!(
                "column '{}' has {} rows, table has {}",
                name,
                column.len(),
                self.n_rows()
            );
        }
        if self.columns.iter().any(|(n, _)| n == name) {
            bail!("column '{}' already present", name);
        }
        self.columns.push((name.to_owned(), column));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_push_and_lookup() {
        let mut t = DataTable::new();
        t.push("gene", Column::Str(vec!["ACTB".into(), "CD3E".into()])).unwrap();
        t.push("log2_fc", Column::F64(vec![2.5, -0.1])).unwrap();
        t.push("cluster", Column::Int(vec![0, 1])).unwrap();

        assert_eq!(t.n_rows(), 2);
        assert_eq!(t.names().collect::<Vec<_>>(), vec!["gene", "log2_fc", "cluster"]);
        assert_eq!(t.column("cluster"), Some(&Column::Int(vec![0, 1])));
        assert_eq!(t.column("log2_fc").unwrap().format(0), "2.5");
    }

    #[test]
    fn test_shape_and_duplicate_errors() {
        let mut t = DataTable::new();
        t.push("a", Column::Int(vec![1, 2, 3])).unwrap();
        assert!(t.push("b", Column::Int(vec![1])).is_err());
        assert!(t.push("a", Column::Int(vec![4, 5, 6])).is_err());
    }
}
