//! Pathway graph representation and compilation.
//!
//! A compiled module is a weighted directed acyclic multigraph with a single
//! start node (`0`) and a single end node (`1`); interior nodes receive fresh
//! integer ids from `2` upward, allocated depth-first in definition order.
//! Every KO leaf of the definition becomes a labeled edge, so parallel edges
//! between the same node pair are ordinary (alternative catalysts for the
//! same step).
//!
//! Edge weights encode step granularity: the whole definition carries unit
//! weight, sequential steps and complex subunits split their parent's weight
//! evenly, alternatives inherit it, and dispensable (`-`-marked) subtrees
//! weigh nothing. A source-to-sink path's weight is therefore the fraction
//! of the module it represents, which is what coverage scoring normalizes
//! against.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parse::{Expr, MISSING_KO};

/// Node identifier within one pathway graph.
pub type NodeId = usize;

/// The unique source node of every pathway graph.
pub const START_NODE: NodeId = 0;
/// The unique sink node of every pathway graph.
pub const END_NODE: NodeId = 1;

/// Maps each KO to the `(source, target)` node pairs of the edges carrying
/// it, in edge insertion order.
pub type KoToEdges = FxHashMap<String, Vec<(NodeId, NodeId)>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph invariant violated: {0}")]
    InvariantViolated(String),
}

// ============================================================================
// Multigraph
// ============================================================================

/// A directed edge labeled with one KO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub label: String,
    pub base_weight: f64,
}

/// Arena-style DAG multigraph: edges live in a single vector (the edge id is
/// the index) with per-node adjacency lists in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathwayGraph {
    node_count: usize,
    edges: Vec<Edge>,
    out_edges: Vec<Vec<usize>>,
    in_edges: Vec<Vec<usize>>,
}

impl PathwayGraph {
    /// Creates a graph holding only the start and end nodes.
    pub fn new() -> Self {
        Self {
            node_count: 2,
            edges: Vec::new(),
            out_edges: vec![Vec::new(), Vec::new()],
            in_edges: vec![Vec::new(), Vec::new()],
        }
    }

    /// Allocates a fresh interior node and returns its id.
    pub fn add_node(&mut self) -> NodeId {
        let id = self.node_count;
        self.node_count += 1;
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        id
    }

    /// Adds an edge and returns its id.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, label: String, base_weight: f64) -> usize {
        let id = self.edges.len();
        self.edges.push(Edge { source, target, label, base_weight });
        self.out_edges[source].push(id);
        self.in_edges[target].push(id);
        id
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, id: usize) -> &Edge {
        &self.edges[id]
    }

    /// Out-edge ids of `node` in insertion order.
    pub fn out_edges(&self, node: NodeId) -> &[usize] {
        &self.out_edges[node]
    }

    /// In-edge ids of `node` in insertion order.
    pub fn in_edges(&self, node: NodeId) -> &[usize] {
        &self.in_edges[node]
    }

    /// Kahn topological order over all nodes, or `None` if the graph holds a
    /// cycle. Deterministic for a given edge insertion order.
    pub fn topological_order(&self) -> Option<Vec<NodeId>> {
        let mut indegree: Vec<usize> = self.in_edges.iter().map(|es| es.len()).collect();
        let mut queue: std::collections::VecDeque<NodeId> = (0..self.node_count)
            .filter(|&n| indegree[n] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.node_count);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &e in &self.out_edges[node] {
                let target = self.edges[e].target;
                indegree[target] -= 1;
                if indegree[target] == 0 {
                    queue.push_back(target);
                }
            }
        }

        if order.len() == self.node_count {
            Some(order)
        } else {
            None
        }
    }
}

impl Default for PathwayGraph {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// A fully compiled module: graph, KO index, and the dispensable KO set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledModule {
    pub graph: PathwayGraph,
    pub ko_to_edges: KoToEdges,
    pub optional_kos: FxHashSet<String>,
}

/// Compiles an expression tree into a validated pathway graph.
pub fn compile(expr: &Expr) -> Result<CompiledModule, GraphError> {
    let mut graph = PathwayGraph::new();
    let mut optional_kos = FxHashSet::default();
    compile_into(expr, &mut graph, START_NODE, END_NODE, 1.0, false, &mut optional_kos);

    let mut ko_to_edges: KoToEdges = FxHashMap::default();
    for edge in graph.edges() {
        ko_to_edges
            .entry(edge.label.clone())
            .or_default()
            .push((edge.source, edge.target));
    }

    validate(&graph, &ko_to_edges)?;
    Ok(CompiledModule { graph, ko_to_edges, optional_kos })
}

fn compile_into(
    expr: &Expr,
    graph: &mut PathwayGraph,
    src: NodeId,
    dst: NodeId,
    weight: f64,
    optional: bool,
    optional_kos: &mut FxHashSet<String>,
) {
    match expr {
        Expr::Atom(ko) => {
            let w = if optional { 0.0 } else { weight };
            graph.add_edge(src, dst, ko.clone(), w);
            if optional {
                optional_kos.insert(ko.clone());
            }
        }
        Expr::Missing => {
            graph.add_edge(src, dst, MISSING_KO.to_string(), 0.0);
            optional_kos.insert(MISSING_KO.to_string());
        }
        Expr::Seq(children) => {
            let child_weight = weight / children.len() as f64;
            compile_chain(children, graph, src, dst, child_weight, optional, optional_kos);
        }
        Expr::Complex(children) => {
            // Weight splits across required subunits only; dispensable
            // members weigh nothing either way.
            let required = children
                .iter()
                .filter(|c| !matches!(c, Expr::Optional(_) | Expr::Missing))
                .count()
                .max(1);
            let child_weight = weight / required as f64;
            compile_chain(children, graph, src, dst, child_weight, optional, optional_kos);
        }
        Expr::Alt(children) => {
            for child in children {
                compile_into(child, graph, src, dst, weight, optional, optional_kos);
            }
        }
        Expr::Optional(inner) => {
            compile_into(inner, graph, src, dst, 0.0, true, optional_kos);
        }
    }
}

/// Chains children through fresh interior nodes, left to right.
fn compile_chain(
    children: &[Expr],
    graph: &mut PathwayGraph,
    src: NodeId,
    dst: NodeId,
    child_weight: f64,
    optional: bool,
    optional_kos: &mut FxHashSet<String>,
) {
    let mut current = src;
    for (i, child) in children.iter().enumerate() {
        let next = if i + 1 == children.len() { dst } else { graph.add_node() };
        compile_into(child, graph, current, next, child_weight, optional, optional_kos);
        current = next;
    }
}

/// Checks the structural invariants every compiled module must satisfy.
pub fn validate(graph: &PathwayGraph, ko_to_edges: &KoToEdges) -> Result<(), GraphError> {
    let order = graph
        .topological_order()
        .ok_or_else(|| GraphError::InvariantViolated("graph contains a cycle".to_string()))?;
    debug_assert_eq!(order.len(), graph.node_count());

    for node in 0..graph.node_count() {
        if node != START_NODE && graph.in_edges(node).is_empty() {
            return Err(GraphError::InvariantViolated(format!(
                "node {} has no in-edges but is not the start node",
                node
            )));
        }
        if node != END_NODE && graph.out_edges(node).is_empty() {
            return Err(GraphError::InvariantViolated(format!(
                "node {} has no out-edges but is not the end node",
                node
            )));
        }
    }
    if !graph.in_edges(START_NODE).is_empty() {
        return Err(GraphError::InvariantViolated("start node has in-edges".to_string()));
    }
    if !graph.out_edges(END_NODE).is_empty() {
        return Err(GraphError::InvariantViolated("end node has out-edges".to_string()));
    }

    // Every node must lie on some start-to-end path.
    let forward = reachable(graph, START_NODE, false);
    let backward = reachable(graph, END_NODE, true);
    for node in 0..graph.node_count() {
        if !forward[node] || !backward[node] {
            return Err(GraphError::InvariantViolated(format!(
                "node {} is not on any start-to-end path",
                node
            )));
        }
    }

    for edge in graph.edges() {
        if !ko_to_edges.contains_key(&edge.label) {
            return Err(GraphError::InvariantViolated(format!(
                "edge label {} missing from KO index",
                edge.label
            )));
        }
    }

    Ok(())
}

fn reachable(graph: &PathwayGraph, from: NodeId, reverse: bool) -> Vec<bool> {
    let mut seen = vec![false; graph.node_count()];
    let mut stack = vec![from];
    seen[from] = true;
    while let Some(node) = stack.pop() {
        let edges = if reverse { graph.in_edges(node) } else { graph.out_edges(node) };
        for &e in edges {
            let next = if reverse { graph.edge(e).source } else { graph.edge(e).target };
            if !seen[next] {
                seen[next] = true;
                stack.push(next);
            }
        }
    }
    seen
}
