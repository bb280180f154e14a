//! Sheet scanner: walks cells line by line and groups consecutive drag copies
//! of the same formula into clusters.

use sheetfold_common::{CellAddress, CellReference};
use sheetfold_parse::{ParseTree, parse};

use crate::cluster::{Cluster, ClusterRegistry};
use crate::compat::{CheckContext, Compatibility, check_trees};
use crate::config::{ScanConfig, ScanOrder};
use crate::error::Result;
use crate::source::{ModelRole, SpreadsheetSource};
use crate::variability::{VariabilityTree, extract_variability};

/// Outcome of scanning one or more sheets.
///
/// Every visited cell is counted exactly once: in a cluster, as a discarded
/// singleton origin, or as skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub registry: ClusterRegistry,
    /// Origins that found no compatible follower, including typed cells that
    /// hold a literal instead of a formula.
    pub discarded: Vec<CellAddress>,
    /// Empty, role-less or unparsable cells.
    pub skipped: Vec<CellAddress>,
    pub visited: usize,
}

impl ScanReport {
    /// Cells accounted for by clusters, discards and skips.
    pub fn accounted(&self) -> usize {
        self.registry.cell_count() + self.discarded.len() + self.skipped.len()
    }

    pub fn merge(&mut self, other: ScanReport) {
        self.registry.merge(other.registry);
        self.discarded.extend(other.discarded);
        self.skipped.extend(other.skipped);
        self.visited += other.visited;
    }
}

struct Run {
    origin: CellAddress,
    role: ModelRole,
    tree: ParseTree,
    members: Vec<CellAddress>,
    pattern: Option<(VariabilityTree, Vec<CellReference>)>,
}

enum ScanState {
    NoOrigin,
    HasOrigin(Run),
}

pub struct Scanner<'s, S: SpreadsheetSource + ?Sized> {
    source: &'s S,
    config: ScanConfig,
}

impl<'s, S: SpreadsheetSource + ?Sized> Scanner<'s, S> {
    pub fn new(source: &'s S, config: ScanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Scanner { source, config })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn scan_sheet(&self, sheet: &str) -> ScanReport {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("scan_sheet", sheet, order = %self.config.order).entered();

        let mut report = ScanReport::default();
        let Some((rows, cols)) = self.config.bounds.or_else(|| self.source.dimensions(sheet))
        else {
            return report;
        };

        let (first_outer, last_outer, first_inner, last_inner) = match self.config.order {
            ScanOrder::ColumnMajor => (self.config.first_col, cols, self.config.first_row, rows),
            ScanOrder::RowMajor => (self.config.first_row, rows, self.config.first_col, cols),
        };

        for outer in first_outer..=last_outer {
            let mut state = ScanState::NoOrigin;
            for inner in first_inner..=last_inner {
                let cell = match self.config.order {
                    ScanOrder::ColumnMajor => CellAddress::new(sheet, inner, outer),
                    ScanOrder::RowMajor => CellAddress::new(sheet, outer, inner),
                };
                report.visited += 1;
                state = self.step(state, cell, &mut report);
            }
            flush(state, &mut report);
        }

        report
    }

    /// Scan several sheets independently and merge the results.
    pub fn scan_workbook<I, T>(&self, sheets: I) -> ScanReport
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut report = ScanReport::default();
        for sheet in sheets {
            report.merge(self.scan_sheet(sheet.as_ref()));
        }
        report
    }

    fn step(&self, state: ScanState, cell: CellAddress, report: &mut ScanReport) -> ScanState {
        let Some(role) = self.source.role(&cell) else {
            flush(state, report);
            report.skipped.push(cell);
            return ScanState::NoOrigin;
        };
        // A typed literal opens a run that no formula can join.
        let Some(text) = self.source.formula(&cell) else {
            flush(state, report);
            report.discarded.push(cell);
            return ScanState::NoOrigin;
        };

        let tree = match parse(&text) {
            Ok(tree) => tree,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(cell = %cell, error = %_err, "formula does not parse; treated as boundary");
                flush(state, report);
                report.skipped.push(cell);
                return ScanState::NoOrigin;
            }
        };

        let mut run = match state {
            ScanState::NoOrigin => return start(cell, role, tree),
            ScanState::HasOrigin(run) if run.role != role => {
                flush(ScanState::HasOrigin(run), report);
                return start(cell, role, tree);
            }
            ScanState::HasOrigin(run) => run,
        };

        match check_trees(&run.tree, &tree, &CheckContext::new(&run.origin, &cell)) {
            Compatibility::Incompatible(_) => {
                flush(ScanState::HasOrigin(run), report);
                start(cell, role, tree)
            }
            Compatibility::Compatible(bindings) => {
                run.members.push(cell);
                run.pattern = Some(extract_variability(&bindings));
                ScanState::HasOrigin(run)
            }
        }
    }
}

fn start(origin: CellAddress, role: ModelRole, tree: ParseTree) -> ScanState {
    ScanState::HasOrigin(Run {
        origin,
        role,
        tree,
        members: Vec::new(),
        pattern: None,
    })
}

fn flush(state: ScanState, report: &mut ScanReport) {
    let ScanState::HasOrigin(run) = state else {
        return;
    };
    match run.pattern {
        Some((pattern, references)) if !run.members.is_empty() => {
            #[cfg(feature = "tracing")]
            tracing::debug!(origin = %run.origin, cells = run.members.len() + 1, "cluster registered");
            report.registry.insert(Cluster {
                origin: run.origin,
                members: run.members,
                role: run.role,
                pattern,
                references,
            });
        }
        _ => {
            #[cfg(feature = "tracing")]
            tracing::trace!(origin = %run.origin, "singleton discarded");
            report.discarded.push(run.origin);
        }
    }
}

/// Scan one sheet with the default configuration.
pub fn scan_sheet<S: SpreadsheetSource + ?Sized>(source: &S, sheet: &str) -> ScanReport {
    Scanner {
        source,
        config: ScanConfig::default(),
    }
    .scan_sheet(sheet)
}

/// Scan several sheets with the default configuration.
pub fn scan_workbook<S, I, T>(source: &S, sheets: I) -> ScanReport
where
    S: SpreadsheetSource + ?Sized,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    Scanner {
        source,
        config: ScanConfig::default(),
    }
    .scan_workbook(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use sheetfold_common::LiteralValue;

    #[test]
    fn column_of_copies_forms_one_cluster() {
        let src = InMemorySource::new()
            .with_formula_a1("S", "B1", "=A1*2")
            .with_formula_a1("S", "B2", "=A2*2")
            .with_formula_a1("S", "B3", "=A3*2")
            .with_default_formula_role(ModelRole::Parameter);
        let report = scan_sheet(&src, "S");
        assert_eq!(report.registry.len(), 1);
        let cluster = report.registry.iter().next().unwrap();
        assert_eq!(cluster.origin.a1(), "B1");
        assert_eq!(cluster.cell_count(), 3);
        assert_eq!(report.visited, report.accounted());
    }

    #[test]
    fn unknown_sheet_yields_empty_report() {
        let report = scan_sheet(&InMemorySource::new(), "Nope");
        assert_eq!(report, ScanReport::default());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let src = InMemorySource::new();
        assert!(Scanner::new(&src, ScanConfig::default().with_first_col(0)).is_err());
    }

    #[test]
    fn typed_literal_is_a_discarded_origin() {
        let src = InMemorySource::new()
            .with_formula_a1("S", "B1", "=A1*2")
            .with_formula_a1("S", "B2", "=A2*2")
            .with_value_a1("S", "B3", LiteralValue::Number(7.0))
            .with_role_a1("S", "B3", ModelRole::Parameter)
            .with_formula_a1("S", "B4", "=A4*2")
            .with_formula_a1("S", "B5", "=A5*2")
            .with_default_formula_role(ModelRole::Parameter);
        let report = scan_sheet(&src, "S");
        let origins: Vec<String> = report.registry.iter().map(|c| c.origin.a1()).collect();
        assert_eq!(origins, vec!["B1", "B4"]);
        assert_eq!(report.discarded, vec![CellAddress::new("S", 3, 2)]);
        assert_eq!(report.visited, report.accounted());
    }
}
