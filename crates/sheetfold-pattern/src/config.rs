#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{PatternError, Result};

/// Traversal order of a sheet scan. A run never crosses the boundary of the
/// outer line (a column for `ColumnMajor`, a row for `RowMajor`).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScanOrder {
    /// Columns left to right, rows top to bottom within a column.
    #[default]
    ColumnMajor,
    /// Rows top to bottom, columns left to right within a row.
    RowMajor,
}

impl std::fmt::Display for ScanOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScanOrder::ColumnMajor => "column-major",
            ScanOrder::RowMajor => "row-major",
        })
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub order: ScanOrder,
    /// (rows, cols) extent overriding the source's dimensions.
    pub bounds: Option<(u32, u32)>,
    /// First row scanned, 1-based.
    pub first_row: u32,
    /// First column scanned, 1-based.
    pub first_col: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            order: ScanOrder::ColumnMajor,
            bounds: None,
            first_row: 1,
            first_col: 1,
        }
    }
}

impl ScanConfig {
    pub fn with_order(mut self, order: ScanOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_bounds(mut self, rows: u32, cols: u32) -> Self {
        self.bounds = Some((rows, cols));
        self
    }

    pub fn with_first_row(mut self, row: u32) -> Self {
        self.first_row = row;
        self
    }

    pub fn with_first_col(mut self, col: u32) -> Self {
        self.first_col = col;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_row == 0 || self.first_col == 0 {
            return Err(PatternError::Config(format!(
                "start indices are 1-based, got row {} col {}",
                self.first_row, self.first_col
            )));
        }
        if let Some((rows, cols)) = self.bounds {
            if rows == 0 || cols == 0 {
                return Err(PatternError::Config(format!(
                    "bounds must be positive, got {rows}x{cols}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.order, ScanOrder::ColumnMajor);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_indices_are_rejected() {
        assert!(matches!(
            ScanConfig::default().with_first_row(0).validate(),
            Err(PatternError::Config(_))
        ));
        assert!(ScanConfig::default().with_bounds(10, 0).validate().is_err());
        assert!(
            ScanConfig::default()
                .with_order(ScanOrder::RowMajor)
                .with_bounds(4, 4)
                .with_first_col(2)
                .validate()
                .is_ok()
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_serializes_as_plain_data() {
        let cfg = ScanConfig::default()
            .with_order(ScanOrder::RowMajor)
            .with_bounds(20, 6);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"RowMajor\""));
        let back: ScanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
