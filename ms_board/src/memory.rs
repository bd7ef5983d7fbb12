//! An in-process status board with the same range and cell semantics as the
//! hosted spreadsheet. Clones share state.

use crate::a1::{CellRef, ColumnRange};
use crate::{BoardError, StatusBoard, Table};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    sheets: BTreeMap<String, Vec<Vec<String>>>,
    writes: Vec<(String, String)>,
    unavailable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBoard {
    inner: Arc<Mutex<Inner>>,
}

const DEFAULT_SHEET: &str = "Sheet1";

impl MemoryBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole content of `sheet`, starting at cell A1.
    pub fn set_sheet<R, C>(&self, sheet: &str, rows: R)
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(Into::into).collect())
            .collect();
        self.lock().sheets.insert(sheet.to_string(), rows);
    }

    /// Make every following call fail with [`BoardError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Value of a cell such as `List!I7`, "" when unset.
    pub fn get(&self, cell: &str) -> String {
        let Ok(cell) = CellRef::parse(cell) else {
            return String::new();
        };
        let inner = self.lock();
        let sheet = cell.sheet.as_deref().unwrap_or(DEFAULT_SHEET);
        inner
            .sheets
            .get(sheet)
            .and_then(|rows| rows.get(cell.row - 1))
            .and_then(|row| row.get(cell.col))
            .cloned()
            .unwrap_or_default()
    }

    /// Every `(cell, value)` write in order.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.lock().writes.clone()
    }
}

impl StatusBoard for MemoryBoard {
    fn fetch(&self, range: &str) -> Result<Table, BoardError> {
        let parsed = ColumnRange::parse(range)?;
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(BoardError::Unavailable(format!("fetch {range}")));
        }
        let sheet = parsed.sheet.as_deref().unwrap_or(DEFAULT_SHEET);
        let values: Vec<Vec<String>> = inner
            .sheets
            .get(sheet)
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        let mut cells: Vec<String> = row
                            .iter()
                            .skip(parsed.first)
                            .take(parsed.width())
                            .cloned()
                            .collect();
                        // the hosted board omits trailing empty cells
                        while cells.last().is_some_and(String::is_empty) {
                            cells.pop();
                        }
                        cells
                    })
                    .collect()
            })
            .unwrap_or_default();
        Table::from_values(values).ok_or_else(|| BoardError::EmptyRange {
            range: range.to_string(),
        })
    }

    fn write_cell(&self, cell: &str, value: &str) -> Result<(), BoardError> {
        let parsed = CellRef::parse(cell)?;
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(BoardError::Unavailable(format!("write {cell}")));
        }
        let sheet = parsed.sheet.as_deref().unwrap_or(DEFAULT_SHEET).to_string();
        let rows = inner.sheets.entry(sheet).or_default();
        if rows.len() < parsed.row {
            rows.resize(parsed.row, Vec::new());
        }
        let row = &mut rows[parsed.row - 1];
        if row.len() <= parsed.col {
            row.resize(parsed.col + 1, String::new());
        }
        row[parsed.col] = value.to_string();
        inner.writes.push((cell.to_string(), value.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fetch_column_window() -> anyhow::Result<()> {
        let board = MemoryBoard::new();
        board.set_sheet(
            "Prefs",
            vec![
                vec!["Protocol", "Tandem prefs", "Mascot prefs", "", "Organism", "Tandem db"],
                vec!["trypsin", "t.xml", "m.par", "", "human", "hs"],
            ],
        );
        let organism = board.fetch("Prefs!E:F")?;
        assert_eq!(organism.header, vec!["Organism", "Tandem_db"]);
        assert_eq!(organism.rows, vec![vec!["human", "hs"]]);

        let protocol = board.fetch("Prefs!A:D")?;
        assert_eq!(protocol.header, vec!["Protocol", "Tandem_prefs", "Mascot_prefs"]);
        assert!(matches!(
            board.fetch("Other!A:B"),
            Err(BoardError::EmptyRange { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_write_grows_sheet() -> anyhow::Result<()> {
        let board = MemoryBoard::new();
        board.write_cell("List!C3", "done")?;
        assert_eq!(board.get("List!C3"), "done");
        assert_eq!(board.get("List!A1"), "");
        assert_eq!(board.writes(), vec![("List!C3".to_string(), "done".to_string())]);

        board.set_unavailable(true);
        let err = board.write_cell("List!C3", "x").unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(board.get("List!C3"), "done");
        Ok(())
    }
}
