//! Meta crate re-exporting the sheetfold layers. Depend on this crate and pick
//! layers with feature flags, or reach the underlying crates directly.

#[cfg(feature = "common")]
pub use sheetfold_common as common;

#[cfg(feature = "parse")]
pub use sheetfold_parse as parse;

#[cfg(feature = "pattern")]
pub use sheetfold_pattern as pattern;

#[cfg(feature = "pattern")]
pub use sheetfold_pattern::{
    CellAddress, CellReference, Cluster, ClusterRegistry, Compatibility, Expr, InMemorySource,
    ModelRole, PatternError, ScanConfig, ScanOrder, ScanReport, Scanner, SpreadsheetSource,
    check_compatible, extract, extract_cluster, scan_sheet, scan_workbook,
};
