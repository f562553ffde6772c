//! Data-flow component.
//!
//! A deliberately simplified statement graph built from the parse tree:
//!
//! * nodes are statements (declarations, expression statements, loops, ...);
//! * `Control` edges join an enclosing statement to each statement nested in
//!   it, and each statement to the next one in the same block;
//! * `Data` edges join the statement that last wrote a variable to a later
//!   statement that reads it.
//!
//! Graphs are compared by their multiset of edge keys
//! `(from_kind, to_kind, edge_kind, variable)` with variables renamed by order
//! of first appearance, so consistent renaming does not cost anything.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tree_sitter::{Node, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Control,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEdge {
    pub kind: EdgeKind,
    /// Variable carried by a data edge, as written in the source.
    pub variable: Option<String>,
}

/// Edge key used for comparison.
pub type EdgeKey = (&'static str, &'static str, EdgeKind, Option<String>);

#[derive(Debug, Default)]
pub struct DataFlowGraph {
    graph: DiGraph<&'static str, FlowEdge>,
}

/// Per-statement variable accesses, in source order.
#[derive(Default)]
struct Accesses {
    reads: Vec<String>,
    writes: Vec<String>,
}

/// Container statements that only group other statements.
fn is_block(kind: &str) -> bool {
    matches!(kind, "compound_statement" | "block" | "statement_block")
}

fn is_statement(kind: &str) -> bool {
    if is_block(kind) {
        return false;
    }
    kind.ends_with("_statement")
        || matches!(
            kind,
            "declaration"
                | "let_declaration"
                | "short_var_declaration"
                | "var_declaration"
                | "const_declaration"
                | "for_range_loop"
                | "for_expression"
                | "while_expression"
                | "loop_expression"
                | "if_expression"
        )
}

/// Whether `field` of a `kind` node is a write target.
fn is_write_field(kind: &str, field: Option<&str>) -> bool {
    match (kind, field) {
        (_, Some("left")) => {
            kind.contains("assignment")
                || matches!(kind, "for_statement" | "for_in_statement" | "short_var_declaration")
        }
        ("init_declarator" | "declaration" | "for_range_loop", Some("declarator")) => true,
        ("let_declaration" | "for_expression", Some("pattern")) => true,
        ("update_expression" | "compound_assignment_expr", Some("argument")) => true,
        _ => false,
    }
}

/// Fields whose subtrees are always reads even inside a write target.
fn is_read_field(field: Option<&str>) -> bool {
    matches!(
        field,
        Some("value" | "right" | "index" | "indices" | "size" | "subscript" | "arguments")
    )
}

/// Read-modify-write forms: the write target is also read.
fn is_read_modify_write(kind: &str) -> bool {
    matches!(
        kind,
        "update_expression"
            | "augmented_assignment"
            | "compound_assignment_expr"
            | "inc_statement"
            | "dec_statement"
    )
}

impl DataFlowGraph {
    /// Build from a parsed tree; `None` when the tree contains error or
    /// missing nodes.
    pub fn from_tree(tree: &Tree, source: &str) -> Option<Self> {
        let root = tree.root_node();
        if root.has_error() {
            return None;
        }
        let mut builder = Builder {
            source: source.as_bytes(),
            graph: DiGraph::new(),
            statements: Vec::new(),
        };
        builder.visit(root);
        builder.add_data_edges();
        Some(Self {
            graph: builder.graph,
        })
    }

    pub fn statement_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Edge keys with variables normalised by first appearance.
    pub fn edge_keys(&self) -> Vec<EdgeKey> {
        let mut names: HashMap<&str, String> = HashMap::new();
        let mut edges: Vec<_> = self.graph.edge_references().collect();
        edges.sort_by_key(|e| (e.source().index(), e.target().index(), e.id().index()));
        edges
            .into_iter()
            .map(|e| {
                let weight = e.weight();
                let variable = weight.variable.as_deref().map(|v| {
                    let next = names.len();
                    names
                        .entry(v)
                        .or_insert_with(|| format!("v{next}"))
                        .clone()
                });
                (
                    self.graph[e.source()],
                    self.graph[e.target()],
                    weight.kind,
                    variable,
                )
            })
            .collect()
    }
}

struct Builder<'s> {
    source: &'s [u8],
    graph: DiGraph<&'static str, FlowEdge>,
    /// Statements in pre-order with their accesses.
    statements: Vec<(NodeIndex, Accesses)>,
}

/// One level of the statement walk: the remaining children of a node.
struct Level<'t> {
    children: std::vec::IntoIter<Node<'t>>,
    enclosing: Option<NodeIndex>,
    previous: Option<NodeIndex>,
}

impl<'t> Level<'t> {
    fn new(node: Node<'t>, enclosing: Option<NodeIndex>) -> Self {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        Self {
            children: children.into_iter(),
            enclosing,
            previous: None,
        }
    }
}

impl Builder<'_> {
    /// Pre-order walk adding one graph node per statement. Iterative, so
    /// nesting depth is bounded by memory rather than the call stack.
    fn visit(&mut self, root: Node<'_>) {
        let mut stack = vec![Level::new(root, None)];
        while let Some(level) = stack.last_mut() {
            let Some(child) = level.children.next() else {
                stack.pop();
                continue;
            };
            if child.kind().contains("comment") {
                continue;
            }
            if !is_statement(child.kind()) {
                let enclosing = level.enclosing;
                stack.push(Level::new(child, enclosing));
                continue;
            }

            let enclosing = level.enclosing;
            let previous = level.previous;
            let idx = self.graph.add_node(child.kind());
            level.previous = Some(idx);
            if let Some(parent) = enclosing {
                self.control(parent, idx);
            }
            if let Some(prev) = previous {
                self.control(prev, idx);
            }

            let accesses = self.collect(child);
            self.statements.push((idx, accesses));
            stack.push(Level::new(child, Some(idx)));
        }
    }

    fn control(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(
            from,
            to,
            FlowEdge {
                kind: EdgeKind::Control,
                variable: None,
            },
        );
    }

    /// Collect identifier reads/writes of one statement, not descending into
    /// nested statements (they get their own node).
    fn collect(&self, statement: Node<'_>) -> Accesses {
        let mut out = Accesses::default();
        // (node, inside a write target); popped in source order.
        let mut stack = vec![(statement, false)];
        while let Some((node, in_write)) = stack.pop() {
            if node.id() != statement.id() && is_statement(node.kind()) {
                continue;
            }
            if node.kind() == "identifier" {
                if let Ok(name) = node.utf8_text(self.source) {
                    if in_write {
                        out.writes.push(name.to_string());
                    } else {
                        out.reads.push(name.to_string());
                    }
                }
                continue;
            }

            let rmw = is_read_modify_write(node.kind())
                || (node.kind().contains("assignment")
                    && node
                        .child_by_field_name("operator")
                        .is_some_and(|op| op.kind() != "="));
            let mut pending = Vec::new();
            let mut cursor = node.walk();
            if cursor.goto_first_child() {
                loop {
                    let child = cursor.node();
                    let field = cursor.field_name();
                    // Called function names are not variables.
                    if field != Some("function") && child.is_named() {
                        let write = is_write_field(node.kind(), field);
                        pending.push((child, (in_write || write) && !is_read_field(field)));
                        if write && rmw {
                            pending.push((child, false));
                        }
                    }
                    if !cursor.goto_next_sibling() {
                        break;
                    }
                }
            }
            stack.extend(pending.into_iter().rev());
        }
        out
    }

    /// Reaching-definition style data edges in statement order.
    fn add_data_edges(&mut self) {
        let mut last_writer: HashMap<String, NodeIndex> = HashMap::new();
        let mut edges = Vec::new();
        for (idx, accesses) in &self.statements {
            let mut seen = BTreeSet::new();
            for var in &accesses.reads {
                if let Some(&writer) = last_writer.get(var) {
                    if writer != *idx && seen.insert(var.clone()) {
                        edges.push((writer, *idx, var.clone()));
                    }
                }
            }
            for var in &accesses.writes {
                last_writer.insert(var.clone(), *idx);
            }
        }
        for (from, to, var) in edges {
            self.graph.add_edge(
                from,
                to,
                FlowEdge {
                    kind: EdgeKind::Data,
                    variable: Some(var),
                },
            );
        }
    }
}

/// Multiset Jaccard of edge keys. Two empty graphs match perfectly.
pub fn similarity(reference: &DataFlowGraph, candidate: &DataFlowGraph) -> f64 {
    let count = |keys: Vec<EdgeKey>| {
        let mut counts: HashMap<EdgeKey, usize> = HashMap::new();
        for key in keys {
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    };
    let r = count(reference.edge_keys());
    let c = count(candidate.edge_keys());
    if r.is_empty() && c.is_empty() {
        return 1.0;
    }

    let mut intersection = 0usize;
    let mut union = 0usize;
    for (key, &rn) in &r {
        let cn = c.get(key).copied().unwrap_or(0);
        intersection += rn.min(cn);
        union += rn.max(cn);
    }
    for (key, &cn) in &c {
        if !r.contains_key(key) {
            union += cn;
        }
    }
    intersection as f64 / union as f64
}
