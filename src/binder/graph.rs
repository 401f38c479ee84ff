//! Directed dependency graph with tagged edges and cycle-aware ordering.
//!
//! Nodes are opaque handles (the binder uses unit ids). Each edge carries an
//! [`EdgeKind`] saying whether the dependency is dereferenced at module-init
//! time or only later at runtime. Init edges dominate: once a pair of nodes
//! is linked with an init-time edge, a runtime edge never downgrades it.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

/// How a dependency edge is dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKind {
    /// Dereferenced as soon as the module executes, at top level.
    Init,
    /// Only dereferenced later, inside a function or callback body.
    Runtime,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Init => write!(f, "init"),
            EdgeKind::Runtime => write!(f, "runtime"),
        }
    }
}

/// A directed graph over opaque node handles.
///
/// Node visitation during [`DepGraph::sort`] follows node insertion order,
/// so the resulting order is deterministic for a fixed insertion sequence.
#[derive(Debug, Clone, Default)]
pub struct DepGraph<N: Copy + Eq + Hash + fmt::Debug> {
    graph: DiGraph<N, EdgeKind>,
    indices: HashMap<N, NodeIndex>,
}

impl<N: Copy + Eq + Hash + fmt::Debug> DepGraph<N> {
    /// Create an empty graph.
    pub fn new() -> Self {
        DepGraph {
            graph: DiGraph::new(),
            indices: HashMap::new(),
        }
    }

    /// Ensure a node exists. Idempotent.
    pub fn add_node(&mut self, n: N) {
        if !self.indices.contains_key(&n) {
            let idx = self.graph.add_node(n);
            self.indices.insert(n, idx);
        }
    }

    /// Upsert the edge `from -> to`.
    ///
    /// If the edge already exists its kind is replaced only when the new kind
    /// is [`EdgeKind::Init`]; an init edge is never downgraded to runtime.
    pub fn set_edge(&mut self, from: N, to: N, kind: EdgeKind) {
        self.add_node(from);
        self.add_node(to);
        let f = self.indices[&from];
        let t = self.indices[&to];

        match self.graph.find_edge(f, t) {
            Some(e) => {
                if kind == EdgeKind::Init {
                    self.graph[e] = EdgeKind::Init;
                }
            }
            None => {
                self.graph.add_edge(f, t, kind);
            }
        }
    }

    /// Look up the kind of the edge `from -> to`, if any.
    pub fn edge(&self, from: N, to: N) -> Option<EdgeKind> {
        let f = *self.indices.get(&from)?;
        let t = *self.indices.get(&to)?;
        let e = self.graph.find_edge(f, t)?;
        Some(self.graph[e])
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Outgoing dependencies of a node, in edge insertion order.
    pub fn deps(&self, from: N) -> Vec<(N, EdgeKind)> {
        match self.indices.get(&from) {
            Some(&idx) => {
                let mut out: Vec<(N, EdgeKind)> = self
                    .graph
                    .edges(idx)
                    .map(|e| (self.graph[e.target()], *e.weight()))
                    .collect();
                // petgraph iterates edges newest-first.
                out.reverse();
                out
            }
            None => Vec::new(),
        }
    }

    /// Depth-first topological sort with a caller-supplied cycle handler.
    ///
    /// Classic three-color marking, implemented iteratively so arbitrarily
    /// deep graphs cannot overflow the stack. Output is the DFS post-order: a
    /// node is appended only after all its dependencies, which yields a valid
    /// dependency-respecting linearization for every acyclic subgraph.
    ///
    /// When a back-edge to an in-progress node is found, `on_cycle(target,
    /// source, kind)` is invoked. Returning `true` tolerates the cycle and the
    /// sort continues; returning `false` aborts, and the caller must not trust
    /// the returned (partial) order.
    pub fn sort<F>(&self, mut on_cycle: F) -> Vec<N>
    where
        F: FnMut(N, N, EdgeKind) -> bool,
    {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        struct Frame {
            node: NodeIndex,
            edges: Vec<(NodeIndex, EdgeKind)>,
            next: usize,
        }

        let children = |idx: NodeIndex| -> Vec<(NodeIndex, EdgeKind)> {
            let mut out: Vec<(NodeIndex, EdgeKind)> = self
                .graph
                .edges(idx)
                .map(|e| (e.target(), *e.weight()))
                .collect();
            out.reverse();
            out
        };

        let mut order = Vec::with_capacity(self.graph.node_count());
        let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();

        // Roots in node insertion order.
        for root in self.graph.node_indices() {
            if marks.contains_key(&root) {
                continue;
            }
            marks.insert(root, Mark::InProgress);
            let mut stack = vec![Frame {
                node: root,
                edges: children(root),
                next: 0,
            }];

            while let Some(frame) = stack.last_mut() {
                if frame.next < frame.edges.len() {
                    let (child, kind) = frame.edges[frame.next];
                    frame.next += 1;

                    match marks.get(&child) {
                        Some(Mark::Done) => {}
                        Some(Mark::InProgress) => {
                            // Back-edge: cyclic reference.
                            let keep_going =
                                on_cycle(self.graph[child], self.graph[frame.node], kind);
                            if !keep_going {
                                return order;
                            }
                        }
                        None => {
                            marks.insert(child, Mark::InProgress);
                            stack.push(Frame {
                                node: child,
                                edges: children(child),
                                next: 0,
                            });
                        }
                    }
                } else {
                    let node = frame.node;
                    marks.insert(node, Mark::Done);
                    order.push(self.graph[node]);
                    stack.pop();
                }
            }
        }

        order
    }

    /// Render the graph as the body of a GraphViz `digraph`.
    ///
    /// `node_attr` and `edge_attr` supply attribute strings (including the
    /// surrounding brackets); returning `None` falls back to a plain label.
    /// Edges are grouped into subgraphs by identical attributes so shared
    /// styling is declared once, and groups are emitted in sorted attribute
    /// order for stable output. Presentation only; binding never reads this.
    pub fn to_dot<NF, EF>(&self, nodes: Option<&[N]>, node_attr: NF, edge_attr: EF) -> String
    where
        NF: Fn(N) -> Option<String>,
        EF: Fn(N, N, EdgeKind) -> Option<String>,
    {
        let node_list: Vec<N> = match nodes {
            Some(ns) => ns.to_vec(),
            None => self.graph.node_indices().map(|i| self.graph[i]).collect(),
        };

        let mut s = String::new();
        let mut ids: HashMap<N, String> = HashMap::new();
        let mut next_id = 0usize;

        let mut declare = |n: N, s: &mut String, ids: &mut HashMap<N, String>| {
            if ids.contains_key(&n) {
                return;
            }
            let id = format!("N{}", next_id);
            next_id += 1;
            let attr = match node_attr(n) {
                Some(a) if a.is_empty() => String::new(),
                Some(a) => format!(" {}", a),
                None => format!(" [ label=\"{}\" ]", escape_label(&format!("{:?}", n))),
            };
            s.push_str(&format!("  {}{};\n", id, attr));
            ids.insert(n, id);
        };

        for &n in &node_list {
            declare(n, &mut s, &mut ids);
            for (to, _) in self.deps(n) {
                declare(to, &mut s, &mut ids);
            }
        }

        // Group edge lines by their attribute string.
        let mut edge_lines: HashMap<String, Vec<String>> = HashMap::new();
        for &from in &node_list {
            for (to, kind) in self.deps(from) {
                let attr = edge_attr(from, to, kind)
                    .unwrap_or_else(|| format!("[ label=\"{}\" ]", escape_label(&kind.to_string())));
                let line = format!("    {} -> {};", ids[&from], ids[&to]);
                edge_lines.entry(attr).or_default().push(line);
            }
        }

        let mut attrs: Vec<&String> = edge_lines.keys().collect();
        attrs.sort();
        for (i, attr) in attrs.iter().enumerate() {
            s.push_str(&format!("  subgraph S{} {{\n", i));
            if !attr.is_empty() {
                s.push_str(&format!("    edge {};\n", attr));
            }
            s.push_str(&edge_lines[*attr].join("\n"));
            s.push_str("\n  };");
            if i < attrs.len() - 1 {
                s.push('\n');
            }
        }

        s
    }
}

fn escape_label(s: &str) -> String {
    s.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[u32], n: u32) -> usize {
        order.iter().position(|&x| x == n).unwrap()
    }

    #[test]
    fn test_sort_respects_dependencies() {
        let mut g = DepGraph::new();
        // 1 depends on 2, 2 depends on 3.
        g.set_edge(1u32, 2, EdgeKind::Init);
        g.set_edge(2, 3, EdgeKind::Init);

        let order = g.sort(|_, _, _| panic!("no cycles expected"));

        assert_eq!(order.len(), 3);
        assert!(position(&order, 3) < position(&order, 2));
        assert!(position(&order, 2) < position(&order, 1));
    }

    #[test]
    fn test_sort_is_deterministic_for_insertion_order() {
        let mut g = DepGraph::new();
        g.add_node(10u32);
        g.add_node(20);
        g.add_node(30);

        let order = g.sort(|_, _, _| true);
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[test]
    fn test_add_node_idempotent() {
        let mut g = DepGraph::new();
        g.add_node(1u32);
        g.add_node(1);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_init_edge_dominates() {
        let mut g = DepGraph::new();
        g.set_edge(1u32, 2, EdgeKind::Runtime);
        assert_eq!(g.edge(1, 2), Some(EdgeKind::Runtime));

        g.set_edge(1, 2, EdgeKind::Init);
        assert_eq!(g.edge(1, 2), Some(EdgeKind::Init));

        // Never downgraded back to runtime.
        g.set_edge(1, 2, EdgeKind::Runtime);
        assert_eq!(g.edge(1, 2), Some(EdgeKind::Init));
    }

    #[test]
    fn test_tolerated_cycle_still_emits_all_nodes() {
        let mut g = DepGraph::new();
        g.set_edge(1u32, 2, EdgeKind::Runtime);
        g.set_edge(2, 1, EdgeKind::Runtime);

        let mut cycles = 0;
        let order = g.sort(|_, _, kind| {
            assert_eq!(kind, EdgeKind::Runtime);
            cycles += 1;
            true
        });

        assert_eq!(cycles, 1);
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_fatal_cycle_aborts_sort() {
        let mut g = DepGraph::new();
        g.set_edge(1u32, 2, EdgeKind::Init);
        g.set_edge(2, 1, EdgeKind::Init);
        g.add_node(3);

        let order = g.sort(|_, _, _| false);
        // Aborted before node 3 was visited.
        assert!(order.len() < 3);
    }

    #[test]
    fn test_to_dot_groups_edges_by_attr() {
        let mut g = DepGraph::new();
        g.set_edge(1u32, 2, EdgeKind::Init);
        g.set_edge(1, 3, EdgeKind::Runtime);

        let dot = g.to_dot(
            None,
            |n| Some(format!("[label=\"u{}\"]", n)),
            |_, _, kind| match kind {
                EdgeKind::Init => Some(String::new()),
                EdgeKind::Runtime => Some("[color=\"#00000022\"]".to_string()),
            },
        );

        assert!(dot.contains("N0 [label=\"u1\"];"));
        assert!(dot.contains("subgraph S0"));
        assert!(dot.contains("subgraph S1"));
        assert!(dot.contains("edge [color=\"#00000022\"];"));
    }
}
