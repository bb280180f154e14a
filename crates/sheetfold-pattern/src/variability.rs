//! The variability tree: the skeleton of a parse tree that leads to its
//! variable reference occurrences, and the binder that lays it over another
//! parse tree.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use sheetfold_common::CellReference;
use sheetfold_parse::{NodeId, NodeRef, ParseTree};

use crate::compat::Bindings;
use crate::error::{PatternError, Result};
use crate::resolve::ParsePath;

/// Parse-tree node → pattern reference it stands for.
pub type NodeBinding = FxHashMap<NodeId, CellReference>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct VNode {
    /// (child index, arena slot), ascending by child index.
    children: SmallVec<[(u32, u32); 4]>,
    reference: Option<CellReference>,
}

/// Trie over parse paths whose leaves carry the pattern's references.
///
/// Only built by [`extract_variability`] from the bindings of a compatible
/// pair, so a tree in hand is proof of compatibility for some offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariabilityTree {
    nodes: Vec<VNode>,
}

impl VariabilityTree {
    fn with_root() -> Self {
        VariabilityTree {
            nodes: vec![VNode::default()],
        }
    }

    fn insert(&mut self, path: &[u32], reference: CellReference) {
        let mut at = 0usize;
        for &step in path {
            let children = &self.nodes[at].children;
            at = match children.binary_search_by_key(&step, |(i, _)| *i) {
                Ok(pos) => children[pos].1 as usize,
                Err(pos) => {
                    let slot = self.nodes.len() as u32;
                    self.nodes.push(VNode::default());
                    self.nodes[at].children.insert(pos, (step, slot));
                    slot as usize
                }
            };
        }
        self.nodes[at].reference = Some(reference);
    }

    /// Number of variable reference occurrences.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.reference.is_some()).count()
    }

    /// No variable occurrences: a constant or fully anchored formula.
    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    /// (path, reference) for every leaf, in path order.
    pub fn leaves(&self) -> Vec<(ParsePath, &CellReference)> {
        let mut out = Vec::with_capacity(self.leaf_count());
        let mut path = ParsePath::new();
        self.collect_leaves(0, &mut path, &mut out);
        out
    }

    fn collect_leaves<'a>(
        &'a self,
        at: usize,
        path: &mut ParsePath,
        out: &mut Vec<(ParsePath, &'a CellReference)>,
    ) {
        let node = &self.nodes[at];
        if let Some(reference) = &node.reference {
            out.push((path.clone(), reference));
        }
        for &(step, slot) in &node.children {
            path.push(step);
            self.collect_leaves(slot as usize, path, out);
            path.pop();
        }
    }

    /// Find the nodes of `tree` that play the role of this pattern's leaves.
    ///
    /// Only the branches recorded in the pattern are walked, and offsets are
    /// not re-checked: `tree` is expected to be a member of the run the pattern
    /// came from. A tree that cannot host the pattern gives
    /// [`PatternError::Binding`].
    pub fn bind(&self, tree: &ParseTree) -> Result<NodeBinding> {
        let mut out = NodeBinding::default();
        let mut path = ParsePath::new();
        self.bind_node(0, tree.root(), &mut path, &mut out)?;
        Ok(out)
    }

    fn bind_node(
        &self,
        at: usize,
        node: NodeRef<'_>,
        path: &mut ParsePath,
        out: &mut NodeBinding,
    ) -> Result<()> {
        let vnode = &self.nodes[at];
        if let Some(reference) = &vnode.reference {
            if !node.is_cell_ref() {
                return Err(PatternError::Binding { path: path.clone() });
            }
            out.insert(node.id(), reference.clone());
        }
        for &(step, slot) in &vnode.children {
            path.push(step);
            let Some(child) = node.child(step as usize) else {
                return Err(PatternError::Binding { path: path.clone() });
            };
            self.bind_node(slot as usize, child, path, out)?;
            path.pop();
        }
        Ok(())
    }
}

/// Build the variability tree of a compatible pair, together with its distinct
/// references sorted into canonical parameter order.
pub fn extract_variability(bindings: &Bindings) -> (VariabilityTree, Vec<CellReference>) {
    let mut tree = VariabilityTree::with_root();
    let mut references: Vec<CellReference> = Vec::with_capacity(bindings.len());
    for (path, reference) in bindings.iter() {
        tree.insert(path, reference.clone());
        references.push(reference.clone());
    }
    references.sort();
    references.dedup();
    (tree, references)
}
