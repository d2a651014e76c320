//! Parameter chain trees
//!
//! Starting from every root flow, a depth-first walk follows dependency edges
//! and builds a tree of API calls fed by each other's identifiers. Cycles are
//! cut by API pattern: when a child's `METHOD /normalized/path` is already on
//! the current root-to-node path, a back-reference to that ancestor is emitted
//! instead of recursing.

use crate::analysis::graph::DependencyGraph;
use crate::analysis::url::api_pattern;
use crate::models::FlowRecord;
use crate::tracker::scope::matches_any;
use crate::tracker::LedgerSnapshot;
use serde::Serialize;

pub const DEFAULT_MAX_DEPTH: usize = 20;

/// One node of a chain tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainNode {
    Flow {
        /// Index into the flow sequence
        flow: usize,
        /// Preorder number within the tree, starting at 1
        index: usize,
        depth: usize,
        via_params: Vec<String>,
        children: Vec<ChainNode>,
    },
    /// Already on the current path; see node `#target`
    BackRef {
        target: usize,
        flow: usize,
        via_params: Vec<String>,
    },
}

impl ChainNode {
    pub fn flow(&self) -> usize {
        match self {
            ChainNode::Flow { flow, .. } | ChainNode::BackRef { flow, .. } => *flow,
        }
    }

    pub fn via_params(&self) -> &[String] {
        match self {
            ChainNode::Flow { via_params, .. } | ChainNode::BackRef { via_params, .. } => {
                via_params
            }
        }
    }

    pub fn children(&self) -> &[ChainNode] {
        match self {
            ChainNode::Flow { children, .. } => children,
            ChainNode::BackRef { .. } => &[],
        }
    }

    /// Longest root-to-leaf edge count, back-references excluded
    pub fn height(&self) -> usize {
        self.children()
            .iter()
            .filter(|c| matches!(c, ChainNode::Flow { .. }))
            .map(|c| c.height() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Number of flow nodes in the subtree
    pub fn node_count(&self) -> usize {
        match self {
            ChainNode::Flow { children, .. } => {
                1 + children.iter().map(ChainNode::node_count).sum::<usize>()
            }
            ChainNode::BackRef { .. } => 0,
        }
    }
}

/// A ranked tree rooted at a flow with no incoming edges
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainTree {
    pub root: ChainNode,
    pub depth: usize,
    pub node_count: usize,
    pub score: usize,
}

impl ChainTree {
    fn new(root: ChainNode) -> Self {
        let depth = root.height();
        let node_count = root.node_count();
        Self {
            root,
            depth,
            node_count,
            score: depth * 100 + node_count,
        }
    }

    pub fn root_flow(&self) -> usize {
        self.root.flow()
    }
}

#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub min_depth: usize,
    pub top: Option<usize>,
    pub max_depth: usize,
    /// Host globs; empty means every flow
    pub domains: Vec<String>,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            min_depth: 1,
            top: None,
            max_depth: DEFAULT_MAX_DEPTH,
            domains: Vec::new(),
        }
    }
}

/// Builds and ranks chain trees over a closed flow sequence
pub struct ChainAnalyzer<'a> {
    flows: &'a [FlowRecord],
    graph: DependencyGraph,
    patterns: Vec<String>,
}

impl<'a> ChainAnalyzer<'a> {
    pub fn new(flows: &'a [FlowRecord], snapshot: &LedgerSnapshot) -> Self {
        Self::with_graph(flows, DependencyGraph::build(flows, snapshot))
    }

    pub fn with_graph(flows: &'a [FlowRecord], graph: DependencyGraph) -> Self {
        let patterns = flows.iter().map(|f| api_pattern(&f.method, &f.url)).collect();
        Self {
            flows,
            graph,
            patterns,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Ranked trees: score descending, then root index ascending
    pub fn analyze(&self, options: &ChainOptions) -> Vec<ChainTree> {
        let restricted;
        let graph = if options.domains.is_empty() {
            &self.graph
        } else {
            restricted = self.graph.restrict(|i| {
                self.flows[i]
                    .host()
                    .map(|h| matches_any(&h, &options.domains))
                    .unwrap_or(false)
            });
            &restricted
        };

        let mut trees: Vec<ChainTree> = graph
            .roots()
            .into_iter()
            .map(|root| {
                let mut path = Vec::new();
                let mut counter = 0;
                let node = self.visit(
                    graph,
                    root,
                    Vec::new(),
                    0,
                    options.max_depth,
                    &mut path,
                    &mut counter,
                );
                ChainTree::new(node)
            })
            .filter(|tree| tree.depth >= options.min_depth)
            .collect();

        trees.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.root_flow().cmp(&b.root_flow()))
        });
        if let Some(top) = options.top {
            trees.truncate(top);
        }
        trees
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        graph: &DependencyGraph,
        flow: usize,
        via_params: Vec<String>,
        depth: usize,
        max_depth: usize,
        path: &mut Vec<(usize, usize)>,
        counter: &mut usize,
    ) -> ChainNode {
        *counter += 1;
        let index = *counter;
        path.push((flow, index));

        let mut children = Vec::new();
        if depth < max_depth {
            for edge in graph.edges(flow) {
                let pattern = &self.patterns[edge.target];
                let ancestor = path
                    .iter()
                    .find(|(f, _)| &self.patterns[*f] == pattern)
                    .map(|&(_, i)| i);
                match ancestor {
                    Some(target) => children.push(ChainNode::BackRef {
                        target,
                        flow: edge.target,
                        via_params: edge.params,
                    }),
                    None => children.push(self.visit(
                        graph,
                        edge.target,
                        edge.params,
                        depth + 1,
                        max_depth,
                        path,
                        counter,
                    )),
                }
            }
        }

        path.pop();
        ChainNode::Flow {
            flow,
            index,
            depth,
            via_params,
            children,
        }
    }

    /// Indented text rendering of a tree
    pub fn render(&self, tree: &ChainTree) -> Vec<String> {
        let mut lines = Vec::new();
        self.render_node(&tree.root, "", true, true, &mut lines);
        lines
    }

    fn render_node(
        &self,
        node: &ChainNode,
        prefix: &str,
        last: bool,
        root: bool,
        lines: &mut Vec<String>,
    ) {
        let branch = if root {
            ""
        } else if last {
            "└── "
        } else {
            "├── "
        };
        let via = format_params(node.via_params());

        match node {
            ChainNode::BackRef { target, .. } => {
                lines.push(format!("{prefix}{branch}↩ [#{target}] via {via}"));
            }
            ChainNode::Flow {
                flow,
                index,
                children,
                ..
            } => {
                let api = format!("{} {}", self.flows[*flow].method, self.flows[*flow].path());
                if root || via.is_empty() {
                    lines.push(format!("{prefix}{branch}[#{index}] {api}"));
                } else {
                    lines.push(format!("{prefix}{branch}[#{index}] → {via} → {api}"));
                }

                let child_prefix = if root {
                    prefix.to_string()
                } else if last {
                    format!("{prefix}    ")
                } else {
                    format!("{prefix}│   ")
                };
                for (i, child) in children.iter().enumerate() {
                    self.render_node(child, &child_prefix, i + 1 == children.len(), false, lines);
                }
            }
        }
    }
}

/// Shortens a parameter list for display
pub fn format_params(params: &[String]) -> String {
    let short = |p: &String| {
        if p.chars().count() > 12 {
            format!("{}..", p.chars().take(12).collect::<String>())
        } else {
            p.clone()
        }
    };
    let mut shown: Vec<String> = params.iter().take(3).map(short).collect();
    if params.len() > 3 {
        shown.push(format!("+{}", params.len() - 3));
    }
    shown.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, IdOccurrence, IdType, Location};
    use crate::tracker::IdLedger;
    use chrono::Utc;

    fn flow(id: &str, method: &str, path: &str, req: &[&str], resp: &[&str]) -> FlowRecord {
        let url = format!("https://api.example.com{path}");
        let occ = |value: &str, direction| IdOccurrence {
            value: value.to_string(),
            id_type: IdType::Numeric,
            location: Location::Body,
            field: None,
            url: url.clone(),
            method: method.to_string(),
            timestamp: Utc::now(),
            direction,
            flow_id: id.to_string(),
        };
        let mut f = FlowRecord::bare(id, method, url.clone(), Utc::now());
        f.request_occurrences = req.iter().map(|v| occ(v, Direction::Request)).collect();
        f.response_occurrences = resp.iter().map(|v| occ(v, Direction::Response)).collect();
        f
    }

    fn trees(flows: &[FlowRecord], options: &ChainOptions) -> Vec<ChainTree> {
        let snapshot = IdLedger::from_flows(flows).finalize();
        ChainAnalyzer::new(flows, &snapshot).analyze(options)
    }

    #[test]
    fn test_linear_chain_depth_and_score() {
        let flows = vec![
            flow("a", "POST", "/login", &[], &["1001"]),
            flow("b", "GET", "/users/1001", &["1001"], &["2002"]),
            flow("c", "DELETE", "/orders/2002", &["2002"], &[]),
        ];
        let result = trees(&flows, &ChainOptions::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].depth, 2);
        assert_eq!(result[0].node_count, 3);
        assert_eq!(result[0].score, 203);
        assert_eq!(result[0].root_flow(), 0);
    }

    #[test]
    fn test_same_pattern_becomes_back_reference() {
        let flows = vec![
            flow("a", "GET", "/users/100", &[], &["1001"]),
            flow("b", "GET", "/users/1001", &["1001"], &["1002"]),
            flow("c", "GET", "/users/1002", &["1002"], &[]),
        ];
        let result = trees(
            &flows,
            &ChainOptions {
                min_depth: 0,
                ..ChainOptions::default()
            },
        );
        assert_eq!(result.len(), 1);
        let root = &result[0].root;
        assert_eq!(
            root.children(),
            &[ChainNode::BackRef {
                target: 1,
                flow: 1,
                via_params: vec!["1001".to_string()],
            }]
        );
        assert_eq!(result[0].node_count, 1);
        assert_eq!(result[0].depth, 0);
    }

    #[test]
    fn test_graph_cycle_terminates() {
        // b and c feed each other
        let flows = vec![
            flow("a", "GET", "/start", &[], &["1001"]),
            flow("b", "GET", "/b", &["1001", "3003"], &["2002"]),
            flow("c", "GET", "/c", &["2002"], &["3003"]),
        ];
        let result = trees(&flows, &ChainOptions::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].depth, 2);

        let b = &result[0].root.children()[0];
        let c = &b.children()[0];
        assert_eq!(c.flow(), 2);
        assert!(matches!(c.children()[0], ChainNode::BackRef { target: 2, .. }));
    }

    #[test]
    fn test_ranking_and_filters() {
        let flows = vec![
            flow("a", "GET", "/solo", &[], &[]),
            flow("b", "GET", "/shallow", &[], &["1001"]),
            flow("c", "GET", "/x", &["1001"], &[]),
            flow("d", "GET", "/deep", &[], &["2002"]),
            flow("e", "GET", "/y", &["2002"], &["3003"]),
            flow("f", "GET", "/z", &["3003"], &[]),
        ];
        let result = trees(&flows, &ChainOptions::default());
        let roots: Vec<usize> = result.iter().map(|t| t.root_flow()).collect();
        // solo flow has depth 0 and is filtered by min_depth 1
        assert_eq!(roots, vec![3, 1]);

        let top = trees(
            &flows,
            &ChainOptions {
                top: Some(1),
                ..ChainOptions::default()
            },
        );
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].root_flow(), 3);
    }

    #[test]
    fn test_max_depth_bounds_traversal() {
        let flows = vec![
            flow("a", "GET", "/a", &[], &["1001"]),
            flow("b", "GET", "/b", &["1001"], &["2002"]),
            flow("c", "GET", "/c", &["2002"], &[]),
        ];
        let result = trees(
            &flows,
            &ChainOptions {
                max_depth: 1,
                ..ChainOptions::default()
            },
        );
        assert_eq!(result[0].depth, 1);
    }

    #[test]
    fn test_domain_filter_treats_other_hosts_as_absent() {
        let mut flows = vec![
            flow("a", "GET", "/a", &[], &["1001"]),
            flow("b", "GET", "/b", &["1001"], &[]),
        ];
        flows[0].url = "https://auth.other.net/a".to_string();
        let result = trees(
            &flows,
            &ChainOptions {
                domains: vec!["api.example.com".to_string()],
                min_depth: 0,
                ..ChainOptions::default()
            },
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].root_flow(), 1);
        assert_eq!(result[0].depth, 0);
    }

    #[test]
    fn test_render_marks_back_references() {
        let flows = vec![
            flow("a", "GET", "/users/100", &[], &["1001"]),
            flow("b", "GET", "/users/1001", &["1001"], &[]),
        ];
        let snapshot = IdLedger::from_flows(&flows).finalize();
        let analyzer = ChainAnalyzer::new(&flows, &snapshot);
        let result = analyzer.analyze(&ChainOptions {
            min_depth: 0,
            ..ChainOptions::default()
        });
        let lines = analyzer.render(&result[0]);
        assert_eq!(lines[0], "[#1] GET /users/100");
        assert_eq!(lines[1], "└── ↩ [#1] via 1001");
    }
}
