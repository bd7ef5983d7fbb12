//! A1 notation: column letters, ranges like `List!A:I` and cells like `List!I7`.

use crate::BoardError;

/// 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn column_letters(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// `A` → 0, `AA` → 26. None for anything that is not upper/lower case letters.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0usize, |acc, c| {
        c.is_ascii_alphabetic()
            .then(|| acc * 26 + (c.to_ascii_uppercase() as u8 - b'A') as usize + 1)
    })
    .map(|n| n - 1)
}

/// A whole-column range such as `List!A:I`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRange {
    pub sheet: Option<String>,
    pub first: usize,
    pub last: usize,
}

impl ColumnRange {
    pub fn parse(range: &str) -> Result<ColumnRange, BoardError> {
        let bad = || BoardError::BadReference(range.to_string());
        let (sheet, cols) = split_sheet(range);
        let (first, last) = cols.split_once(':').ok_or_else(bad)?;
        let first = column_index(first).ok_or_else(bad)?;
        let last = column_index(last).ok_or_else(bad)?;
        if last < first {
            return Err(bad());
        }
        Ok(ColumnRange {
            sheet: sheet.map(String::from),
            first,
            last,
        })
    }

    pub fn width(&self) -> usize {
        self.last - self.first + 1
    }

    /// Address of the cell at `offset` columns into the range on the 1-based
    /// sheet row `row`.
    pub fn cell(&self, offset: usize, row: usize) -> String {
        let col = column_letters(self.first + offset);
        match &self.sheet {
            Some(sheet) => format!("{sheet}!{col}{row}"),
            None => format!("{col}{row}"),
        }
    }
}

/// A single cell such as `List!I7`: sheet, 0-based column, 1-based row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRef {
    pub sheet: Option<String>,
    pub col: usize,
    pub row: usize,
}

impl CellRef {
    pub fn parse(cell: &str) -> Result<CellRef, BoardError> {
        let bad = || BoardError::BadReference(cell.to_string());
        let (sheet, addr) = split_sheet(cell);
        let split = addr.find(|c: char| c.is_ascii_digit()).ok_or_else(bad)?;
        let (letters, digits) = addr.split_at(split);
        let col = column_index(letters).ok_or_else(bad)?;
        let row: usize = digits.parse().map_err(|_| bad())?;
        if row == 0 {
            return Err(bad());
        }
        Ok(CellRef {
            sheet: sheet.map(String::from),
            col,
            row,
        })
    }
}

fn split_sheet(reference: &str) -> (Option<&str>, &str) {
    match reference.rsplit_once('!') {
        Some((sheet, rest)) => (Some(sheet.trim_matches('\'')), rest),
        None => (None, reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        for (i, s) in [(0, "A"), (8, "I"), (25, "Z"), (26, "AA"), (27, "AB"), (701, "ZZ"), (702, "AAA")] {
            assert_eq!(column_letters(i), s);
            assert_eq!(column_index(s), Some(i));
        }
        assert_eq!(column_index("a"), Some(0));
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn test_ranges_and_cells() -> anyhow::Result<()> {
        let range = ColumnRange::parse("List!A:I")?;
        assert_eq!(range.sheet.as_deref(), Some("List"));
        assert_eq!(range.width(), 9);
        assert_eq!(range.cell(8, 7), "List!I7");

        let prefs = ColumnRange::parse("Prefs!E:G")?;
        assert_eq!(prefs.cell(0, 1), "Prefs!E1");

        assert!(ColumnRange::parse("List!I:A").is_err());
        assert!(ColumnRange::parse("List").is_err());

        let cell = CellRef::parse("'My List'!AB12")?;
        assert_eq!(cell.sheet.as_deref(), Some("My List"));
        assert_eq!((cell.col, cell.row), (27, 12));
        assert!(CellRef::parse("List!A0").is_err());
        assert!(CellRef::parse("List!7").is_err());
        Ok(())
    }
}
