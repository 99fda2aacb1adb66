use core::fmt;

use serde::{Deserialize, Serialize};

/// Syntax a formula's references are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceDialect {
    /// `A1`, `$B$2`, `A1:B3`.
    A1,
    /// A1 with sheet qualifiers: `Sheet1!A1`, `'My Sheet'!A1:B2`, `Sheet1:Sheet3!A1`.
    A1Sheets,
    /// `R1C1`, `R[-1]C`, `RC[2]`.
    R1C1,
    /// OpenDocument bracketed references: `[.A1]`, `[.A1:.B2]`, `[$Sheet1.A1:.B2]`.
    Odf,
    /// OOXML text, where deleted references survive as `#REF!` tokens.
    Ooxml,
}

impl Default for ReferenceDialect {
    fn default() -> Self {
        ReferenceDialect::A1
    }
}

/// A single cell address as written in a formula.
///
/// Rows and columns are **0-indexed**; `row_abs`/`col_abs` record the `$` markers (or, for R1C1,
/// whether the component was an absolute index rather than a bracketed offset).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub sheet: Option<String>,
    pub row: u32,
    pub col: u32,
    pub row_abs: bool,
    pub col_abs: bool,
}

impl CellAddress {
    pub fn new(row: u32, col: u32) -> Self {
        Self {
            sheet: None,
            row,
            col,
            row_abs: false,
            col_abs: false,
        }
    }

    pub fn absolute(row: u32, col: u32) -> Self {
        Self {
            row_abs: true,
            col_abs: true,
            ..Self::new(row, col)
        }
    }

    pub fn on_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    /// Parse a plain A1 address such as `B3` or `$AA$10`.
    pub fn from_a1(a1: &str) -> Option<Self> {
        let bytes = a1.as_bytes();
        let mut idx = 0usize;
        let col_abs = bytes.first() == Some(&b'$');
        if col_abs {
            idx += 1;
        }
        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return None;
        }
        let col = name_to_col(&a1[col_start..idx])?;
        let row_abs = bytes.get(idx) == Some(&b'$');
        if row_abs {
            idx += 1;
        }
        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start || idx != bytes.len() {
            return None;
        }
        let row: u32 = a1[row_start..].parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(Self {
            sheet: None,
            row: row - 1,
            col,
            row_abs,
            col_abs,
        })
    }

    /// Same coordinates without sheet or `$` markers, for lookups.
    pub fn position(&self) -> (u32, u32) {
        (self.row, self.col)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write_sheet_name(f, sheet)?;
            f.write_str("!")?;
        }
        if self.col_abs {
            f.write_str("$")?;
        }
        f.write_str(&col_to_name(self.col))?;
        if self.row_abs {
            f.write_str("$")?;
        }
        write!(f, "{}", self.row + 1)
    }
}

/// Rectangular region between two corners. A sheet span (`Sheet1:Sheet3!A1`) keeps a different
/// sheet on each corner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeAddress {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl RangeAddress {
    pub fn new(start: CellAddress, end: CellAddress) -> Self {
        Self { start, end }
    }

    pub fn top(&self) -> u32 {
        self.start.row.min(self.end.row)
    }

    pub fn bottom(&self) -> u32 {
        self.start.row.max(self.end.row)
    }

    pub fn left(&self) -> u32 {
        self.start.col.min(self.end.col)
    }

    pub fn right(&self) -> u32 {
        self.start.col.max(self.end.col)
    }

    pub fn height(&self) -> u32 {
        self.bottom() - self.top() + 1
    }

    pub fn width(&self) -> u32 {
        self.right() - self.left() + 1
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.top()..=self.bottom()).contains(&row) && (self.left()..=self.right()).contains(&col)
    }

    pub fn is_sheet_span(&self) -> bool {
        self.start.sheet != self.end.sheet && self.end.sheet.is_some()
    }
}

impl fmt::Display for RangeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sheet_span() {
            if let (Some(a), Some(b)) = (&self.start.sheet, &self.end.sheet) {
                write_sheet_name(f, a)?;
                f.write_str(":")?;
                write_sheet_name(f, b)?;
                f.write_str("!")?;
            }
            let start = CellAddress {
                sheet: None,
                ..self.start.clone()
            };
            let end = CellAddress {
                sheet: None,
                ..self.end.clone()
            };
            return write!(f, "{start}:{end}");
        }
        let end = CellAddress {
            sheet: None,
            ..self.end.clone()
        };
        write!(f, "{}:{end}", self.start)
    }
}

/// A reference as parsed from formula text, before it is bound to model cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reference {
    Cell(CellAddress),
    Range(RangeAddress),
    /// `#REF!`: a reference whose target was deleted. Parses, but never resolves.
    Broken,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Cell(c) => write!(f, "{c}"),
            Reference::Range(r) => write!(f, "{r}"),
            Reference::Broken => f.write_str("#REF!"),
        }
    }
}

fn write_sheet_name(f: &mut fmt::Formatter<'_>, sheet: &str) -> fmt::Result {
    let plain = sheet
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if plain {
        f.write_str(sheet)
    } else {
        write!(f, "'{}'", sheet.replace('\'', "''"))
    }
}

pub fn col_to_name(col: u32) -> String {
    // A1 columns are 1-based; stored 0-based.
    let mut n = col + 1;
    let mut out = String::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.insert(0, char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    out
}

pub fn name_to_col(s: &str) -> Option<u32> {
    let mut col: u32 = 0;
    for b in s.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        let v = u32::from(b.to_ascii_uppercase() - b'A') + 1;
        col = col.checked_mul(26)?.checked_add(v)?;
    }
    col.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_roundtrip() {
        let c = CellAddress::from_a1("$BC$32").unwrap();
        assert_eq!(c.position(), (31, 54));
        assert!(c.row_abs && c.col_abs);
        assert_eq!(c.to_string(), "$BC$32");
        assert_eq!(CellAddress::from_a1("a1").unwrap().to_string(), "A1");
        assert!(CellAddress::from_a1("A0").is_none());
        assert!(CellAddress::from_a1("11").is_none());
    }

    #[test]
    fn sheet_names_are_quoted_when_needed() {
        let c = CellAddress::new(0, 0).on_sheet("My Sheet");
        assert_eq!(c.to_string(), "'My Sheet'!A1");
        let span = RangeAddress::new(
            CellAddress::new(0, 0).on_sheet("Sheet1"),
            CellAddress::new(1, 1).on_sheet("Sheet2"),
        );
        assert_eq!(span.to_string(), "Sheet1:Sheet2!A1:B2");
        assert_eq!((span.width(), span.height()), (2, 2));
    }
}
