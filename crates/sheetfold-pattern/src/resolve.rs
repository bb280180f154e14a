//! Decoding of reference terminals within their sheet scope.

use std::borrow::Cow;

use smallvec::SmallVec;
use sheetfold_common::CellReference;
use sheetfold_parse::{NodeRef, Rule, unquote_sheet_name};

/// Child-index sequence from a parse tree's root to one node.
pub type ParsePath = SmallVec<[u32; 8]>;

/// Sheet that unprefixed references below `node` resolve against.
///
/// A `SheetRef` node switches the scope to its prefix for its whole target,
/// so both endpoints of `loc!B2:B9` live on `loc`.
pub fn child_scope<'a>(node: NodeRef<'_>, current: &'a str) -> Cow<'a, str> {
    match (node.rule(), node.child(0)) {
        (Some(Rule::SheetRef), Some(prefix)) => Cow::Owned(unquote_sheet_name(prefix.text())),
        _ => Cow::Borrowed(current),
    }
}

/// The reference a cell-reference terminal denotes on `sheet`.
pub fn decode_reference(node: NodeRef<'_>, sheet: &str) -> Option<CellReference> {
    if !node.is_cell_ref() {
        return None;
    }
    CellReference::from_a1(sheet, node.text()).ok()
}

/// Every cell-reference terminal of a tree with its path and resolved reference,
/// in source order.
pub fn collect_references(
    tree: &sheetfold_parse::ParseTree,
    sheet: &str,
) -> Vec<(ParsePath, CellReference)> {
    let mut out = Vec::new();
    let mut path = ParsePath::new();
    walk(tree.root(), sheet, &mut path, &mut out);
    out
}

fn walk(
    node: NodeRef<'_>,
    sheet: &str,
    path: &mut ParsePath,
    out: &mut Vec<(ParsePath, CellReference)>,
) {
    if let Some(reference) = decode_reference(node, sheet) {
        out.push((path.clone(), reference));
        return;
    }
    let scope = child_scope(node, sheet);
    for (i, child) in node.children().enumerate() {
        path.push(i as u32);
        walk(child, &scope, path, out);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetfold_parse::parse;

    #[test]
    fn sheet_prefix_scopes_both_range_endpoints() {
        let tree = parse("=SUM('Data Sheet'!B2:C3)+D4").unwrap();
        let refs: Vec<String> = collect_references(&tree, "Main")
            .into_iter()
            .map(|(_, r)| r.to_string())
            .collect();
        assert_eq!(refs, vec!["'Data Sheet'!B2", "'Data Sheet'!C3", "Main!D4"]);
    }

    #[test]
    fn paths_point_at_terminals() {
        let tree = parse("=IF(C2<E2,E2-C2,0)").unwrap();
        for (path, reference) in collect_references(&tree, "Problem") {
            let node = tree.node_at(&path).unwrap();
            assert!(node.is_cell_ref());
            assert_eq!(node.text(), reference.a1());
        }
    }
}
