//! Flow dependency graph
//!
//! Nodes are flow indices into a closed flow sequence. An edge `O -> U` means
//! an identifier that originated in the response of flow `O` was later (or
//! earlier) supplied in the request of flow `U`.

use crate::models::FlowRecord;
use crate::tracker::LedgerSnapshot;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// Outgoing edge with the identifier values that justify it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub target: usize,
    /// Deduplicated identifier values, first-seen order
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Node weight is the flow index, edge weight the carried values
    graph: DiGraph<usize, Vec<String>>,
    /// Flow index to node; `None` once restricted away
    nodes: Vec<Option<NodeIndex>>,
}

impl DependencyGraph {
    /// Builds the graph from a flow sequence and its finalized ledger
    pub fn build(flows: &[FlowRecord], snapshot: &LedgerSnapshot) -> Self {
        let position: HashMap<&str, usize> = flows
            .iter()
            .enumerate()
            .map(|(i, f)| (f.flow_id.as_str(), i))
            .collect();

        let mut graph: DiGraph<usize, Vec<String>> = DiGraph::with_capacity(flows.len(), flows.len());
        let nodes: Vec<NodeIndex> = (0..flows.len()).map(|i| graph.add_node(i)).collect();

        for tracked in &snapshot.tracked {
            let Some(origin) = tracked
                .origin
                .as_ref()
                .and_then(|o| position.get(o.flow_id.as_str()).copied())
            else {
                continue;
            };
            for usage in &tracked.usages {
                let Some(&target) = position.get(usage.flow_id.as_str()) else {
                    continue;
                };
                if target == origin {
                    continue;
                }
                let (from, to) = (nodes[origin], nodes[target]);
                match graph.find_edge(from, to) {
                    Some(edge) => {
                        let params = &mut graph[edge];
                        if !params.contains(&tracked.value) {
                            params.push(tracked.value.clone());
                        }
                    }
                    None => {
                        graph.add_edge(from, to, vec![tracked.value.clone()]);
                    }
                }
            }
        }

        Self {
            graph,
            nodes: nodes.into_iter().map(Some).collect(),
        }
    }

    /// Number of flows the graph was built over
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, flow: usize) -> Option<NodeIndex> {
        self.nodes.get(flow).copied().flatten()
    }

    pub fn contains(&self, flow: usize) -> bool {
        self.node(flow).is_some()
    }

    /// Outgoing edges ordered by target index
    pub fn edges(&self, flow: usize) -> Vec<Edge> {
        let Some(node) = self.node(flow) else {
            return Vec::new();
        };
        let mut edges: Vec<Edge> = self
            .graph
            .edges(node)
            .map(|e| Edge {
                target: self.graph[e.target()],
                params: e.weight().clone(),
            })
            .collect();
        edges.sort_by_key(|e| e.target);
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Present flows with no incoming edges, in index order
    pub fn roots(&self) -> Vec<usize> {
        let mut roots: Vec<usize> = self
            .graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n])
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Subgraph over the flows satisfying `keep`
    pub fn restrict(&self, keep: impl Fn(usize) -> bool) -> Self {
        let graph = self.graph.filter_map(
            |_, &flow| keep(flow).then_some(flow),
            |_, params| Some(params.clone()),
        );
        let mut nodes = vec![None; self.nodes.len()];
        for node in graph.node_indices() {
            nodes[graph[node]] = Some(node);
        }
        Self { graph, nodes }
    }
}
