//! Detected runs of compatible formulas.

use std::collections::BTreeMap;
use std::collections::btree_map;

use sheetfold_common::{CellAddress, CellReference, Distance};
use sheetfold_parse::parse;

use crate::error::{PatternError, Result};
use crate::expr::Expr;
use crate::extract::{ParameterTable, extract_with_table};
use crate::source::{ModelRole, SpreadsheetSource};
use crate::variability::VariabilityTree;

/// An origin cell and the cells whose formulas are its drag copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub origin: CellAddress,
    /// Followers in scan order; never empty.
    pub members: Vec<CellAddress>,
    pub role: ModelRole,
    pub pattern: VariabilityTree,
    /// Distinct pattern references in canonical parameter order.
    pub references: Vec<CellReference>,
}

impl Cluster {
    /// Cells in the run, origin included.
    pub fn cell_count(&self) -> usize {
        self.members.len() + 1
    }

    /// Origin first, then followers.
    pub fn cells(&self) -> impl Iterator<Item = &CellAddress> {
        std::iter::once(&self.origin).chain(self.members.iter())
    }

    pub fn contains(&self, cell: &CellAddress) -> bool {
        self.cells().any(|c| c == cell)
    }

    pub fn parameter_table(&self) -> ParameterTable {
        ParameterTable::new(self.references.clone())
    }

    /// Concrete references to pass as v1..vn when evaluating the shared rule
    /// for `cell`. `None` if a shifted reference leaves the grid.
    pub fn arguments_for(&self, cell: &CellAddress) -> Option<Vec<CellReference>> {
        let distance = Distance::between(&self.origin, cell);
        self.references
            .iter()
            .map(|r| r.shifted(distance))
            .collect()
    }
}

/// Parse the cluster's origin and fold it into the rule shared by the run.
pub fn extract_cluster<S: SpreadsheetSource + ?Sized>(cluster: &Cluster, source: &S) -> Result<Expr> {
    let origin = &cluster.origin;
    let Some(text) = source.formula(origin) else {
        return Err(PatternError::NoFormula {
            cell: origin.clone(),
        });
    };
    let tree = parse(&text).map_err(|e| PatternError::parse(origin, e))?;
    let binding = cluster.pattern.bind(&tree)?;
    extract_with_table(&tree, &origin.sheet, &binding, &cluster.parameter_table())
}

/// Clusters keyed by origin cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterRegistry {
    clusters: BTreeMap<CellAddress, Cluster>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cluster: Cluster) -> Option<Cluster> {
        self.clusters.insert(cluster.origin.clone(), cluster)
    }

    pub fn get(&self, origin: &CellAddress) -> Option<&Cluster> {
        self.clusters.get(origin)
    }

    /// The cluster containing `cell`, whether as origin or follower.
    pub fn cluster_for(&self, cell: &CellAddress) -> Option<&Cluster> {
        if let Some(c) = self.clusters.get(cell) {
            return Some(c);
        }
        self.clusters.values().find(|c| c.contains(cell))
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Total cells covered by all clusters.
    pub fn cell_count(&self) -> usize {
        self.clusters.values().map(Cluster::cell_count).sum()
    }

    pub fn iter(&self) -> btree_map::Values<'_, CellAddress, Cluster> {
        self.clusters.values()
    }

    /// Absorb another registry. Scans of distinct sheets never share keys.
    pub fn merge(&mut self, other: ClusterRegistry) {
        self.clusters.extend(other.clusters);
    }
}

impl IntoIterator for ClusterRegistry {
    type Item = Cluster;
    type IntoIter = btree_map::IntoValues<CellAddress, Cluster>;

    fn into_iter(self) -> Self::IntoIter {
        self.clusters.into_values()
    }
}

impl<'a> IntoIterator for &'a ClusterRegistry {
    type Item = &'a Cluster;
    type IntoIter = btree_map::Values<'a, CellAddress, Cluster>;

    fn into_iter(self) -> Self::IntoIter {
        self.clusters.values()
    }
}
