//! Formula pattern detection and parameterization.
//!
//! A spreadsheet built by dragging one formula across a column holds many
//! textual variants of the same rule. This crate finds those runs and folds
//! each into a single lambda over the references that move:
//!
//! 1. [`check_compatible`] compares two formula cells and records the
//!    reference occurrences that shift with the drag;
//! 2. [`extract_variability`] turns that record into a [`VariabilityTree`]
//!    plus the references in canonical parameter order;
//! 3. [`VariabilityTree::bind`] lays the pattern over any member's parse tree;
//! 4. [`extract`] translates a tree into an [`Expr`], replacing bound
//!    occurrences by parameters `v1..vn`;
//! 5. [`Scanner`] walks a sheet and collects the runs into a
//!    [`ClusterRegistry`].

pub mod cluster;
pub mod compat;
pub mod config;
pub mod error;
pub mod eval;
pub mod expr;
pub mod extract;
pub mod resolve;
pub mod scan;
pub mod source;
pub mod variability;

pub use cluster::{Cluster, ClusterRegistry, extract_cluster};
pub use compat::{
    Bindings, CheckContext, Compatibility, Mismatch, check_compatible, check_formulas, check_trees,
};
pub use config::{ScanConfig, ScanOrder};
pub use error::{PatternError, Result};
pub use eval::Evaluator;
pub use expr::{BinaryOp, Expr, Param, UnaryOp};
pub use extract::{ParameterTable, extract, extract_with_table};
pub use resolve::{ParsePath, collect_references};
pub use scan::{ScanReport, Scanner, scan_sheet, scan_workbook};
pub use source::{InMemorySource, ModelRole, SpreadsheetSource};
pub use variability::{NodeBinding, VariabilityTree, extract_variability};

pub use sheetfold_common::{CellAddress, CellReference, Distance, LiteralValue};
