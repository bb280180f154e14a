//! Sheet-scoped cell positions and formula-embedded reference occurrences.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coord::{A1ParseError, MAX_COL, MAX_ROW, column_to_letters, parse_a1};

/// Position of a cell on a worksheet, 1-based.
///
/// Field order drives the derived ordering: sheet, then column, then row, which
/// is the column-major order the scanner walks in.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    pub sheet: String,
    pub col: u32,
    pub row: u32,
}

impl CellAddress {
    pub fn new(sheet: impl Into<String>, row: u32, col: u32) -> Self {
        CellAddress {
            sheet: sheet.into(),
            col,
            row,
        }
    }

    /// Build from an A1 token; `$` markers are accepted and ignored.
    pub fn from_a1(sheet: impl Into<String>, a1: &str) -> Result<Self, A1ParseError> {
        let parts = parse_a1(a1)?;
        Ok(Self::new(sheet, parts.row, parts.col))
    }

    pub fn a1(&self) -> String {
        format!("{}{}", column_to_letters(self.col), self.row)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", quote_sheet_name(&self.sheet), self.a1())
    }
}

/// Row/column offset from an origin cell to a candidate cell.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Distance {
    pub d_row: i64,
    pub d_col: i64,
}

impl Distance {
    pub const ZERO: Distance = Distance { d_row: 0, d_col: 0 };

    pub const fn new(d_row: i64, d_col: i64) -> Self {
        Distance { d_row, d_col }
    }

    /// `candidate - origin`, computed once per cell pair.
    pub fn between(origin: &CellAddress, candidate: &CellAddress) -> Self {
        Distance {
            d_row: candidate.row as i64 - origin.row as i64,
            d_col: candidate.col as i64 - origin.col as i64,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Δrow {:+}, Δcol {:+})", self.d_row, self.d_col)
    }
}

/// One cell-reference occurrence inside a formula, with its `$` anchors.
///
/// Equality and ordering are by (sheet, col, row, col_fixed, row_fixed); the
/// derive relies on the field declaration order below. This order is the
/// canonical parameter order used when formulas are parameterized.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CellReference {
    pub sheet: String,
    pub col: u32,
    pub row: u32,
    pub col_fixed: bool,
    pub row_fixed: bool,
}

impl CellReference {
    pub fn new(
        sheet: impl Into<String>,
        row: u32,
        col: u32,
        row_fixed: bool,
        col_fixed: bool,
    ) -> Self {
        CellReference {
            sheet: sheet.into(),
            col,
            row,
            col_fixed,
            row_fixed,
        }
    }

    /// Decode an A1 token (without sheet prefix) in the context of `sheet`.
    pub fn from_a1(sheet: impl Into<String>, a1: &str) -> Result<Self, A1ParseError> {
        let parts = parse_a1(a1)?;
        Ok(Self::new(
            sheet,
            parts.row,
            parts.col,
            parts.row_fixed,
            parts.col_fixed,
        ))
    }

    /// Both axes carry a `$` anchor.
    pub fn is_fully_fixed(&self) -> bool {
        self.row_fixed && self.col_fixed
    }

    /// Moves when the enclosing formula is dragged along at least one axis.
    pub fn is_variable(&self) -> bool {
        !self.is_fully_fixed()
    }

    /// The referenced cell, dropping anchors.
    pub fn address(&self) -> CellAddress {
        CellAddress::new(self.sheet.clone(), self.row, self.col)
    }

    /// Where this reference lands when its formula is copied by `distance`.
    ///
    /// Fixed axes stay put. Returns `None` if the result falls off the grid.
    pub fn shifted(&self, distance: Distance) -> Option<CellReference> {
        let row = if self.row_fixed {
            self.row
        } else {
            shift_axis(self.row, distance.d_row, MAX_ROW)?
        };
        let col = if self.col_fixed {
            self.col
        } else {
            shift_axis(self.col, distance.d_col, MAX_COL)?
        };
        Some(CellReference {
            sheet: self.sheet.clone(),
            col,
            row,
            col_fixed: self.col_fixed,
            row_fixed: self.row_fixed,
        })
    }

    /// A1 text with anchors and without the sheet prefix.
    pub fn a1(&self) -> String {
        let mut out = String::with_capacity(8);
        if self.col_fixed {
            out.push('$');
        }
        out.push_str(&column_to_letters(self.col));
        if self.row_fixed {
            out.push('$');
        }
        out.push_str(&self.row.to_string());
        out
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", quote_sheet_name(&self.sheet), self.a1())
    }
}

fn shift_axis(value: u32, delta: i64, max: u32) -> Option<u32> {
    let moved = value as i64 + delta;
    (1..=max as i64).contains(&moved).then_some(moved as u32)
}

/// Quote a sheet name the way Excel writes it in formulas, when needed.
pub fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && !name.as_bytes()[0].is_ascii_digit()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}
