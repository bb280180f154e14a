//! Spreadsheet data access.
//!
//! The engine never reads files itself; cell contents and declared roles come
//! from a [`SpreadsheetSource`]. [`InMemorySource`] is a builder-style
//! implementation for tests and embedding.

use std::fmt;

use rustc_hash::FxHashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use sheetfold_common::{CellAddress, LiteralValue, parse_a1};

/// Declared optimization-model role of a cell. Only cells sharing a role are
/// compared with each other.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelRole {
    Parameter,
    Variable,
    Objective,
    Constraint,
    Type,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelRole::Parameter => "parameter",
            ModelRole::Variable => "variable",
            ModelRole::Objective => "objective",
            ModelRole::Constraint => "constraint",
            ModelRole::Type => "type",
        })
    }
}

pub trait SpreadsheetSource {
    /// Declared role of a cell, `None` when the cell has no recognized role.
    fn role(&self, cell: &CellAddress) -> Option<ModelRole>;

    /// Raw content; formulas are `Text` starting with `=`.
    fn cell_value(&self, sheet: &str, row: u32, col: u32) -> LiteralValue;

    /// Used extent of a sheet as (rows, cols), `None` for an unknown sheet.
    fn dimensions(&self, sheet: &str) -> Option<(u32, u32)>;

    /// Formula text of a cell, if it holds one.
    fn formula(&self, cell: &CellAddress) -> Option<String> {
        self.cell_value(&cell.sheet, cell.row, cell.col)
            .as_formula()
            .map(str::to_string)
    }
}

impl<S: SpreadsheetSource + ?Sized> SpreadsheetSource for &S {
    fn role(&self, cell: &CellAddress) -> Option<ModelRole> {
        (**self).role(cell)
    }

    fn cell_value(&self, sheet: &str, row: u32, col: u32) -> LiteralValue {
        (**self).cell_value(sheet, row, col)
    }

    fn dimensions(&self, sheet: &str) -> Option<(u32, u32)> {
        (**self).dimensions(sheet)
    }
}

type CellKey = (u32, u32); // 1-based (row, col)

#[derive(Default, Clone, Debug)]
struct Sheet {
    cells: FxHashMap<CellKey, LiteralValue>,
}

/// Lightweight in-memory workbook.
///
/// The `*_a1` helpers panic on malformed A1 text; they are meant for literal
/// fixtures.
#[derive(Default, Clone, Debug)]
pub struct InMemorySource {
    sheets: FxHashMap<String, Sheet>,
    roles: FxHashMap<CellAddress, ModelRole>,
    default_formula_role: Option<ModelRole>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value<S: Into<String>>(
        mut self,
        sheet: S,
        row: u32,
        col: u32,
        value: impl Into<LiteralValue>,
    ) -> Self {
        let sh = self.sheets.entry(sheet.into()).or_default();
        sh.cells.insert((row, col), value.into());
        self
    }

    pub fn with_formula<S: Into<String>>(self, sheet: S, row: u32, col: u32, formula: &str) -> Self {
        let text = if formula.starts_with('=') {
            formula.to_string()
        } else {
            format!("={formula}")
        };
        self.with_value(sheet, row, col, LiteralValue::Text(text))
    }

    pub fn with_role<S: Into<String>>(mut self, sheet: S, row: u32, col: u32, role: ModelRole) -> Self {
        self.roles.insert(CellAddress::new(sheet, row, col), role);
        self
    }

    /// Role reported for formula cells that have no explicit role.
    pub fn with_default_formula_role(mut self, role: ModelRole) -> Self {
        self.default_formula_role = Some(role);
        self
    }

    pub fn with_value_a1<S: Into<String>>(
        self,
        sheet: S,
        a1: &str,
        value: impl Into<LiteralValue>,
    ) -> Self {
        let (row, col) = a1_key(a1);
        self.with_value(sheet, row, col, value)
    }

    pub fn with_formula_a1<S: Into<String>>(self, sheet: S, a1: &str, formula: &str) -> Self {
        let (row, col) = a1_key(a1);
        self.with_formula(sheet, row, col, formula)
    }

    pub fn with_role_a1<S: Into<String>>(self, sheet: S, a1: &str, role: ModelRole) -> Self {
        let (row, col) = a1_key(a1);
        self.with_role(sheet, row, col, role)
    }

    /// Insert a block of values with its top-left corner at (row, col).
    pub fn with_range<S: Into<String>>(
        mut self,
        sheet: S,
        row: u32,
        col: u32,
        data: Vec<Vec<LiteralValue>>,
    ) -> Self {
        let sh = self.sheets.entry(sheet.into()).or_default();
        for (r_off, r) in data.into_iter().enumerate() {
            for (c_off, v) in r.into_iter().enumerate() {
                sh.cells.insert((row + r_off as u32, col + c_off as u32), v);
            }
        }
        self
    }

    pub fn sheet_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sheets.keys().cloned().collect();
        names.sort();
        names
    }
}

fn a1_key(a1: &str) -> CellKey {
    match parse_a1(a1) {
        Ok(parts) => (parts.row, parts.col),
        Err(err) => panic!("bad A1 reference {a1:?}: {err}"),
    }
}

impl SpreadsheetSource for InMemorySource {
    fn role(&self, cell: &CellAddress) -> Option<ModelRole> {
        if let Some(role) = self.roles.get(cell) {
            return Some(*role);
        }
        self.default_formula_role
            .filter(|_| self.cell_value(&cell.sheet, cell.row, cell.col).is_formula())
    }

    fn cell_value(&self, sheet: &str, row: u32, col: u32) -> LiteralValue {
        self.sheets
            .get(sheet)
            .and_then(|sh| sh.cells.get(&(row, col)).cloned())
            .unwrap_or(LiteralValue::Empty)
    }

    fn dimensions(&self, sheet: &str) -> Option<(u32, u32)> {
        let sh = self.sheets.get(sheet)?;
        let rows = sh.cells.keys().map(|(r, _)| *r).max().unwrap_or(0);
        let cols = sh.cells.keys().map(|(_, c)| *c).max().unwrap_or(0);
        Some((rows, cols))
    }
}
