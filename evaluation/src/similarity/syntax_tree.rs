//! Syntax-tree component.
//!
//! Both texts are reduced to a skeleton of named node kinds (comments
//! dropped, bounded by a node budget) and compared with the Zhang–Shasha
//! ordered tree edit distance under unit costs. Similarity is
//! `1 - distance / max(|A|, |B|)`.

use std::collections::HashMap;
use tree_sitter::{Node, Tree};

/// Default cap on skeleton size. Edit distance is quadratic in node count.
pub const DEFAULT_NODE_BUDGET: usize = 1500;

/// Post-order skeleton: labels, leftmost-leaf indices and keyroots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skeleton {
    labels: Vec<&'static str>,
    leftmost: Vec<usize>,
    keyroots: Vec<usize>,
    visited: usize,
}

impl Skeleton {
    /// Build a skeleton; `None` when the tree contains error or missing
    /// nodes.
    pub fn from_tree(tree: &Tree, budget: usize) -> Option<Self> {
        let root = tree.root_node();
        if root.has_error() {
            return None;
        }
        let mut skeleton = Self::default();
        skeleton.visit(root, budget.max(1));
        skeleton.compute_keyroots();
        Some(skeleton)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Post-order labels, mostly for tests and debugging.
    pub fn labels(&self) -> &[&'static str] {
        &self.labels
    }

    /// Post-order walk, stopping once `budget` nodes have been entered.
    fn visit(&mut self, root: Node<'_>, budget: usize) {
        self.visited += 1;
        let mut stack = vec![Frame::new(root)];
        while let Some(top) = stack.last_mut() {
            let next = if self.visited >= budget {
                None
            } else {
                top.children.find(|child| !child.kind().contains("comment"))
            };
            if let Some(child) = next {
                self.visited += 1;
                stack.push(Frame::new(child));
                continue;
            }

            let Some(done) = stack.pop() else { break };
            let idx = self.labels.len();
            self.labels.push(done.node.kind());
            let leaf = done.first_leaf.unwrap_or(idx);
            self.leftmost.push(leaf);
            if let Some(parent) = stack.last_mut() {
                parent.first_leaf.get_or_insert(leaf);
            }
        }
    }

    /// A keyroot is the highest-numbered node for each distinct leftmost leaf.
    fn compute_keyroots(&mut self) {
        let mut highest: HashMap<usize, usize> = HashMap::new();
        for (idx, &leaf) in self.leftmost.iter().enumerate() {
            highest.insert(leaf, idx);
        }
        let mut keyroots: Vec<usize> = highest.into_values().collect();
        keyroots.sort_unstable();
        self.keyroots = keyroots;
    }
}

/// A node whose children are still being walked.
struct Frame<'t> {
    node: Node<'t>,
    children: std::vec::IntoIter<Node<'t>>,
    first_leaf: Option<usize>,
}

impl<'t> Frame<'t> {
    fn new(node: Node<'t>) -> Self {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        Self {
            node,
            children: children.into_iter(),
            first_leaf: None,
        }
    }
}

/// Zhang–Shasha tree edit distance with unit insert/delete/relabel costs.
pub fn tree_edit_distance(a: &Skeleton, b: &Skeleton) -> usize {
    if a.is_empty() || b.is_empty() {
        return a.len().max(b.len());
    }
    let mut treedist = vec![vec![0usize; b.len()]; a.len()];
    for &i in &a.keyroots {
        for &j in &b.keyroots {
            forest_distance(a, b, i, j, &mut treedist);
        }
    }
    treedist[a.len() - 1][b.len() - 1]
}

fn forest_distance(a: &Skeleton, b: &Skeleton, i: usize, j: usize, treedist: &mut [Vec<usize>]) {
    let li = a.leftmost[i];
    let lj = b.leftmost[j];
    let rows = i - li + 2;
    let cols = j - lj + 2;
    let mut fd = vec![vec![0usize; cols]; rows];
    for x in 1..rows {
        fd[x][0] = fd[x - 1][0] + 1;
    }
    for y in 1..cols {
        fd[0][y] = fd[0][y - 1] + 1;
    }

    for x in 1..rows {
        let ai = li + x - 1;
        for y in 1..cols {
            let bj = lj + y - 1;
            let delete = fd[x - 1][y] + 1;
            let insert = fd[x][y - 1] + 1;
            if a.leftmost[ai] == li && b.leftmost[bj] == lj {
                let relabel = usize::from(a.labels[ai] != b.labels[bj]);
                fd[x][y] = delete.min(insert).min(fd[x - 1][y - 1] + relabel);
                treedist[ai][bj] = fd[x][y];
            } else {
                let px = a.leftmost[ai] - li;
                let py = b.leftmost[bj] - lj;
                fd[x][y] = delete.min(insert).min(fd[px][py] + treedist[ai][bj]);
            }
        }
    }
}

/// Normalised similarity in [0,1].
pub fn similarity(reference: &Skeleton, candidate: &Skeleton) -> f64 {
    let largest = reference.len().max(candidate.len());
    if largest == 0 {
        return 1.0;
    }
    let distance = tree_edit_distance(reference, candidate);
    (1.0 - distance as f64 / largest as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::TargetLanguage;

    fn skeleton(src: &str) -> Skeleton {
        let tree = TargetLanguage::Cpp.parse(src).unwrap();
        Skeleton::from_tree(&tree, DEFAULT_NODE_BUDGET).unwrap()
    }

    /// Build a skeleton by hand from (label, leftmost) post-order pairs.
    fn manual(nodes: &[(&'static str, usize)]) -> Skeleton {
        let mut s = Skeleton {
            labels: nodes.iter().map(|n| n.0).collect(),
            leftmost: nodes.iter().map(|n| n.1).collect(),
            ..Default::default()
        };
        s.compute_keyroots();
        s
    }

    #[test]
    fn test_identical_trees_distance_zero() {
        let a = skeleton("int main() { int x = 1; return x; }");
        assert_eq!(tree_edit_distance(&a, &a), 0);
        assert_eq!(similarity(&a, &a), 1.0);
    }

    #[test]
    fn test_classic_zhang_shasha_example() {
        // f(d(a c(b)) e)  vs  f(c(d(a b)) e): distance 2
        let t1 = manual(&[("a", 0), ("b", 1), ("c", 1), ("d", 0), ("e", 4), ("f", 0)]);
        let t2 = manual(&[("a", 0), ("b", 1), ("d", 0), ("c", 0), ("e", 4), ("f", 0)]);
        assert_eq!(tree_edit_distance(&t1, &t2), 2);
    }

    #[test]
    fn test_relabel_costs_one() {
        let t1 = manual(&[("a", 0), ("r", 0)]);
        let t2 = manual(&[("b", 0), ("r", 0)]);
        assert_eq!(tree_edit_distance(&t1, &t2), 1);
        assert_eq!(tree_edit_distance(&t1, &Skeleton::default()), 2);
    }

    #[test]
    fn test_partial_credit_for_similar_structure() {
        let a = skeleton("int f(int n) { int s = 0; for (int i = 0; i < n; i++) s += i; return s; }");
        let b = skeleton("int f(int n) { int s = 0; int i = 0; while (i < n) { s += i; i++; } return s; }");
        let sim = similarity(&a, &b);
        assert!(sim > 0.3 && sim < 1.0, "got {sim}");
    }

    #[test]
    fn test_comments_ignored() {
        let a = skeleton("int x = 1;");
        let b = skeleton("// leading\nint x = 1; /* trailing */");
        assert_eq!(tree_edit_distance(&a, &b), 0);
    }

    #[test]
    fn test_tree_with_errors_has_no_skeleton() {
        for src in ["int main( { for ( ; return }", "}}}} (((( ;;; @@@"] {
            let tree = TargetLanguage::Cpp.parse(src).unwrap();
            assert!(Skeleton::from_tree(&tree, DEFAULT_NODE_BUDGET).is_none(), "{src}");
        }
    }

    #[test]
    fn test_deep_nesting_respects_budget() {
        let depth = 20_000;
        let src = format!("int x = {}1{};", "(".repeat(depth), ")".repeat(depth));
        let tree = TargetLanguage::Cpp.parse(&src).unwrap();
        let s = Skeleton::from_tree(&tree, DEFAULT_NODE_BUDGET).unwrap();
        assert_eq!(s.len(), DEFAULT_NODE_BUDGET);
        assert_eq!(s.labels().last(), Some(&"translation_unit"));
    }

    #[test]
    fn test_budget_caps_size() {
        let src = "int a = 1; ".repeat(200);
        let tree = TargetLanguage::Cpp.parse(&src).unwrap();
        let s = Skeleton::from_tree(&tree, 50).unwrap();
        assert!(s.len() <= 50);
    }
}
