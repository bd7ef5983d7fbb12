//! ms_board
//!
//! Narrow adapter over the external status board: a tabular registry keyed by
//! project and sample, fetched by range and written one cell at a time.

// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms
)]
#![warn(unused)]

pub mod a1;
pub mod memory;
pub mod registry;
pub mod sheets;

pub use memory::MemoryBoard;
pub use registry::{Registry, RegistryLayout, RegistryRow};
pub use sheets::SheetsBoard;

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// The board could not be reached or refused the request. Stages abort on
    /// this and wait for the next scheduled run.
    #[error("status board unavailable: {0}")]
    Unavailable(String),

    #[error("invalid range or cell reference '{0}'")]
    BadReference(String),

    #[error("range {range} is empty, expected a header row")]
    EmptyRange { range: String },

    #[error("column '{column}' not found in {range}")]
    MissingColumn { column: String, range: String },

    #[error("no row with project '{project}' and sample '{sample}' in {range}")]
    RowNotFound {
        project: String,
        sample: String,
        range: String,
    },
}

impl BoardError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BoardError::Unavailable(_))
    }
}

/// The raw operations the board supports. No batch update and no
/// optimistic-concurrency token.
pub trait StatusBoard: Send + Sync {
    /// Fetch a range such as `List!A:I`. The first row holds the column names.
    fn fetch(&self, range: &str) -> Result<Table, BoardError>;

    /// Write a single cell such as `List!I7`.
    fn write_cell(&self, cell: &str, value: &str) -> Result<(), BoardError>;
}

/// A fetched range: normalized header names and data rows padded to the
/// header width.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Build from raw cell values. Header names have spaces replaced by
    /// underscores. Returns None if there is no header row.
    pub fn from_values(mut values: Vec<Vec<String>>) -> Option<Table> {
        if values.is_empty() {
            return None;
        }
        let header: Vec<String> = values
            .remove(0)
            .into_iter()
            .map(|h| normalize_header(&h))
            .collect();
        let width = header.len();
        let rows = values
            .into_iter()
            .map(|mut row| {
                if row.len() < width {
                    row.resize(width, String::new());
                }
                row
            })
            .collect();
        Some(Table { header, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        let name = normalize_header(name);
        self.header.iter().position(|h| *h == name)
    }

    /// Cell text, or "" past the end of a short row.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map_or("", String::as_str)
    }
}

pub fn normalize_header(name: &str) -> String {
    name.trim().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_table_from_values() {
        let table = Table::from_values(vec![
            row(&["Project title", "Sample ID", "Status"]),
            row(&["P1", "S1"]),
            row(&["P1", "S2", "Converted", "extra"]),
        ])
        .unwrap();
        assert_eq!(table.header, row(&["Project_title", "Sample_ID", "Status"]));
        assert_eq!(table.column("Sample ID"), Some(1));
        assert_eq!(table.column("Status"), Some(2));
        assert_eq!(table.cell(0, 2), "");
        assert_eq!(table.cell(1, 2), "Converted");
        assert_eq!(table.cell(5, 0), "");
        assert!(Table::from_values(vec![]).is_none());
    }
}
