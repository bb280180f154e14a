//! Pairwise compatibility of two formula occurrences.
//!
//! Two formulas are compatible when the second is what the first becomes after
//! being dragged by the distance between their cells: the parse trees line up
//! node for node, literal terminals are identical, and every reference moved
//! by exactly that distance on its unanchored axes.

use std::fmt;

use rustc_hash::FxHashMap;
use sheetfold_common::{CellAddress, CellReference, Distance};
use sheetfold_parse::{NodeRef, ParseTree, parse};

use crate::error::{PatternError, Result};
use crate::resolve::{ParsePath, child_scope, decode_reference};
use crate::source::SpreadsheetSource;
use crate::variability::{NodeBinding, VariabilityTree, extract_variability};

/// Variable reference occurrences of a compatible pair, keyed by their path in
/// the origin's tree. Values are the origin's references.
///
/// Only the checker creates these, so holding one proves the pair it came from
/// was compatible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    map: FxHashMap<ParsePath, CellReference>,
}

impl Bindings {
    pub(crate) fn from_pairs(pairs: impl IntoIterator<Item = (ParsePath, CellReference)>) -> Self {
        Bindings {
            map: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, path: &[u32]) -> Option<&CellReference> {
        self.map.get(path)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&ParsePath, &CellReference)> {
        self.map.iter()
    }
}

/// Why a pair was judged incompatible. Every reason is treated alike; this is
/// diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// One of the cells holds no formula.
    NoFormula,
    /// Node kind, child count or literal text differ.
    Structure { path: ParsePath },
    /// A reference did not move by the drag distance, or its anchors changed.
    Reference { path: ParsePath },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::NoFormula => f.write_str("no formula"),
            Mismatch::Structure { path } => write!(f, "structure differs at {:?}", path.as_slice()),
            Mismatch::Reference { path } => write!(f, "reference differs at {:?}", path.as_slice()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Incompatible(Mismatch),
    Compatible(Bindings),
}

impl Compatibility {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Compatibility::Compatible(_))
    }

    pub fn bindings(&self) -> Option<&Bindings> {
        match self {
            Compatibility::Compatible(b) => Some(b),
            Compatibility::Incompatible(_) => None,
        }
    }

    pub fn mismatch(&self) -> Option<&Mismatch> {
        match self {
            Compatibility::Incompatible(m) => Some(m),
            Compatibility::Compatible(_) => None,
        }
    }

    /// Variability tree and sorted distinct references, if compatible.
    pub fn variability(&self) -> Option<(VariabilityTree, Vec<CellReference>)> {
        self.bindings().map(extract_variability)
    }

    /// Bind the pattern of this result onto `tree`.
    ///
    /// `Ok(None)` for an incompatible result; nothing is walked in that case.
    pub fn bind_to(&self, tree: &ParseTree) -> Result<Option<NodeBinding>> {
        match self {
            Compatibility::Incompatible(_) => Ok(None),
            Compatibility::Compatible(bindings) => {
                let (pattern, _) = extract_variability(bindings);
                pattern.bind(tree).map(Some)
            }
        }
    }
}

/// The two cells a pair of trees was read from.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub origin: &'a CellAddress,
    pub candidate: &'a CellAddress,
}

impl<'a> CheckContext<'a> {
    pub fn new(origin: &'a CellAddress, candidate: &'a CellAddress) -> Self {
        CheckContext { origin, candidate }
    }

    pub fn distance(&self) -> Distance {
        Distance::between(self.origin, self.candidate)
    }
}

/// Compare the formulas of two cells of `source`.
///
/// A cell without formula text gives `Incompatible(NoFormula)`; a formula that
/// does not parse is an error for that cell.
pub fn check_compatible<S: SpreadsheetSource + ?Sized>(
    origin: &CellAddress,
    candidate: &CellAddress,
    source: &S,
) -> Result<Compatibility> {
    let (Some(origin_text), Some(candidate_text)) =
        (source.formula(origin), source.formula(candidate))
    else {
        return Ok(Compatibility::Incompatible(Mismatch::NoFormula));
    };
    check_formulas(&origin_text, origin, &candidate_text, candidate)
}

/// Compare two formula texts as if they sat in the given cells.
pub fn check_formulas(
    origin_text: &str,
    origin: &CellAddress,
    candidate_text: &str,
    candidate: &CellAddress,
) -> Result<Compatibility> {
    if !origin_text.starts_with('=') || !candidate_text.starts_with('=') {
        return Ok(Compatibility::Incompatible(Mismatch::NoFormula));
    }
    let origin_tree = parse(origin_text).map_err(|e| PatternError::parse(origin, e))?;
    let candidate_tree = parse(candidate_text).map_err(|e| PatternError::parse(candidate, e))?;
    Ok(check_trees(
        &origin_tree,
        &candidate_tree,
        &CheckContext::new(origin, candidate),
    ))
}

/// Lock-step comparison of two parsed formulas.
pub fn check_trees(origin: &ParseTree, candidate: &ParseTree, ctx: &CheckContext<'_>) -> Compatibility {
    debug_assert_ne!(
        ctx.origin, ctx.candidate,
        "a cell is never compared with itself"
    );

    let mut walker = LockStep {
        distance: ctx.distance(),
        path: ParsePath::new(),
        found: Vec::new(),
    };
    match walker.walk(
        origin.root(),
        candidate.root(),
        &ctx.origin.sheet,
        &ctx.candidate.sheet,
    ) {
        Ok(()) => Compatibility::Compatible(Bindings::from_pairs(walker.found)),
        Err(mismatch) => {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                origin = %ctx.origin,
                candidate = %ctx.candidate,
                reason = %mismatch,
                "formulas incompatible"
            );
            Compatibility::Incompatible(mismatch)
        }
    }
}

struct LockStep {
    distance: Distance,
    path: ParsePath,
    found: Vec<(ParsePath, CellReference)>,
}

impl LockStep {
    fn walk(
        &mut self,
        a: NodeRef<'_>,
        b: NodeRef<'_>,
        sheet_a: &str,
        sheet_b: &str,
    ) -> std::result::Result<(), Mismatch> {
        if a.kind() != b.kind() || a.child_count() != b.child_count() {
            return Err(self.structure());
        }

        if a.is_cell_ref() {
            let (Some(ra), Some(rb)) = (decode_reference(a, sheet_a), decode_reference(b, sheet_b))
            else {
                return Err(self.reference());
            };
            if !self.moved_by_distance(&ra, &rb) {
                return Err(self.reference());
            }
            if ra.is_variable() {
                self.found.push((self.path.clone(), ra));
            }
            return Ok(());
        }

        if a.is_terminal() {
            return if a.text() == b.text() {
                Ok(())
            } else {
                Err(self.structure())
            };
        }

        let scope_a = child_scope(a, sheet_a);
        let scope_b = child_scope(b, sheet_b);
        for (i, (ca, cb)) in a.children().zip(b.children()).enumerate() {
            self.path.push(i as u32);
            self.walk(ca, cb, &scope_a, &scope_b)?;
            self.path.pop();
        }
        Ok(())
    }

    /// Anchored axes stay put, free axes move by the drag distance. A drag
    /// never changes the sheet or the `$` markers.
    fn moved_by_distance(&self, origin: &CellReference, candidate: &CellReference) -> bool {
        if origin.sheet != candidate.sheet
            || origin.col_fixed != candidate.col_fixed
            || origin.row_fixed != candidate.row_fixed
        {
            return false;
        }
        let col_ok = if origin.col_fixed {
            origin.col == candidate.col
        } else {
            candidate.col as i64 - origin.col as i64 == self.distance.d_col
        };
        let row_ok = if origin.row_fixed {
            origin.row == candidate.row
        } else {
            candidate.row as i64 - origin.row as i64 == self.distance.d_row
        };
        col_ok && row_ok
    }

    fn structure(&self) -> Mismatch {
        Mismatch::Structure {
            path: self.path.clone(),
        }
    }

    fn reference(&self) -> Mismatch {
        Mismatch::Reference {
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(sheet: &str, a1: &str) -> CellAddress {
        CellAddress::from_a1(sheet, a1).unwrap()
    }

    fn check(a: &str, at: &str, b: &str, bt: &str) -> Compatibility {
        check_formulas(a, &addr("S", at), b, &addr("S", bt)).unwrap()
    }

    #[test]
    fn drag_down_is_compatible() {
        let result = check("=A1*2", "B1", "=A2*2", "B2");
        let bindings = result.bindings().unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings.get(&[1, 0]).unwrap().a1(), "A1");
    }

    #[test]
    fn literal_change_is_structural() {
        let result = check("=A1*2", "B1", "=A2*3", "B2");
        assert_eq!(
            result.mismatch(),
            Some(&Mismatch::Structure {
                path: ParsePath::from_slice(&[1, 2])
            })
        );
    }

    #[test]
    fn wrong_offset_is_reference_mismatch() {
        let result = check("=A1*2", "B1", "=A3*2", "B2");
        assert!(matches!(
            result.mismatch(),
            Some(Mismatch::Reference { .. })
        ));
    }

    #[test]
    fn anchors_must_agree() {
        assert!(!check("=$A1", "B1", "=A2", "B2").is_compatible());
        assert!(check("=$A1", "B1", "=$A2", "B2").is_compatible());
        assert!(check("=A$1", "B1", "=A$1", "B2").is_compatible());
        assert!(!check("=A$1", "B1", "=A$2", "B2").is_compatible());
    }

    #[test]
    fn non_formulas_are_no_formula() {
        let result = check("42", "B1", "=A2", "B2");
        assert_eq!(result.mismatch(), Some(&Mismatch::NoFormula));
    }

    #[test]
    fn parse_failure_names_the_cell() {
        let err = check_formulas("=A1+", &addr("S", "B1"), "=A2", &addr("S", "B2")).unwrap_err();
        match err {
            PatternError::Parse { cell, .. } => assert_eq!(cell.a1(), "B1"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn bind_to_on_incompatible_is_none() {
        let result = check("=A1", "B1", "=C9", "B2");
        let tree = parse("=C9").unwrap();
        assert_eq!(result.bind_to(&tree).unwrap(), None);
    }

    #[test]
    fn wide_arrays_keep_every_path_distinct() {
        // B1 sits at child index 65537 of the array node.
        let array = |row: u32| {
            let zeros = vec!["0"; 32767].join(",");
            format!("={{A{row},{zeros},B{row}}}")
        };
        let result = check(&array(1), "C1", &array(2), "C2");
        let bindings = result.bindings().unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings.get(&[1, 1]).unwrap().a1(), "A1");
        assert_eq!(bindings.get(&[1, 65537]).unwrap().a1(), "B1");
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "a cell is never compared with itself")]
    fn comparing_a_cell_with_itself_is_a_bug() {
        let tree = parse("=A1*2").unwrap();
        let cell = addr("S", "B1");
        check_trees(&tree, &tree, &CheckContext::new(&cell, &cell));
    }
}
