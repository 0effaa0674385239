//! Control-flow graph over the elements of a function body.
//!
//! The graph is built by the host from the body's syntax: one node per
//! evaluation step, edges in evaluation order, with branch targets and loop
//! back-edges explicit. `break` and `continue` are materialized as ordinary
//! edges, which is what lets the dataflow engine treat non-local exits like
//! any other edge.
//!
//! One syntactic element may expand to several nodes (a loop element has a
//! head and a tail, a call has argument and invocation steps); the local
//! index maps an element to all of its nodes.

use ks_hir::ElementId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Index of a node in its [`Cfg`].
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the graph.
#[derive(Clone, Debug)]
pub struct CfgNode {
    /// The element this node was generated from. Entry and exit nodes are
    /// synthetic and carry none.
    pub element: Option<ElementId>,
    /// Outgoing edges.
    pub successors: Vec<NodeIndex>,
}

/// A finished control-flow graph.
#[derive(Clone, Debug)]
pub struct Cfg {
    nodes: Vec<CfgNode>,
    entry: NodeIndex,
    exit: NodeIndex,
}

impl Cfg {
    #[must_use]
    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    #[must_use]
    pub fn exit(&self) -> NodeIndex {
        self.exit
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> &CfgNode {
        &self.nodes[index.index()]
    }

    #[must_use]
    pub fn successors(&self, index: NodeIndex) -> &[NodeIndex] {
        &self.nodes[index.index()].successors
    }

    /// Nodes reachable from the entry, in post-order.
    ///
    /// Reversing the result gives the reverse post-order the dataflow
    /// fixpoint iterates in.
    #[must_use]
    pub fn nodes_in_post_order(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = vec![false; self.nodes.len()];
        // (node, next successor position) pairs
        let mut stack: Vec<(NodeIndex, usize)> = vec![(self.entry, 0)];
        visited[self.entry.index()] = true;

        while let Some(&(node, pos)) = stack.last() {
            let successors = &self.nodes[node.index()].successors;
            if let Some(&succ) = successors.get(pos) {
                if let Some(frame) = stack.last_mut() {
                    frame.1 = pos + 1;
                }
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                order.push(node);
                stack.pop();
            }
        }

        order
    }

    /// Maps each element to the nodes generated from it.
    #[must_use]
    pub fn build_local_index(&self) -> FxHashMap<ElementId, Vec<NodeIndex>> {
        let mut index: FxHashMap<ElementId, Vec<NodeIndex>> = FxHashMap::default();
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(element) = node.element {
                index.entry(element).or_default().push(NodeIndex(i as u32));
            }
        }
        index
    }
}

/// Incremental [`Cfg`] construction.
pub struct CfgBuilder {
    nodes: Vec<CfgNode>,
    entry: NodeIndex,
}

impl CfgBuilder {
    /// Starts a graph with a synthetic entry node.
    #[must_use]
    pub fn new() -> Self {
        let entry = CfgNode {
            element: None,
            successors: Vec::new(),
        };
        Self {
            nodes: vec![entry],
            entry: NodeIndex(0),
        }
    }

    #[must_use]
    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    pub fn add_node(&mut self, element: Option<ElementId>) -> NodeIndex {
        let index = NodeIndex(self.nodes.len() as u32);
        self.nodes.push(CfgNode {
            element,
            successors: Vec::new(),
        });
        index
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.nodes[from.index()].successors.push(to);
    }

    /// Finishes the graph. `exit` must be a node with no successors.
    #[must_use]
    pub fn finish(self, exit: NodeIndex) -> Cfg {
        Cfg {
            nodes: self.nodes,
            entry: self.entry,
            exit,
        }
    }
}

impl Default for CfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// entry -> a -> b -> exit with a loop edge b -> a.
    fn looped() -> (Cfg, NodeIndex, NodeIndex) {
        let mut builder = CfgBuilder::new();
        let a = builder.add_node(Some(ElementId(10)));
        let b = builder.add_node(Some(ElementId(11)));
        let exit = builder.add_node(None);
        let entry = builder.entry();
        builder.add_edge(entry, a);
        builder.add_edge(a, b);
        builder.add_edge(b, a);
        builder.add_edge(b, exit);
        (builder.finish(exit), a, b)
    }

    #[test]
    fn test_post_order_ends_at_entry() {
        let (cfg, _, _) = looped();
        let order = cfg.nodes_in_post_order();
        assert_eq!(order.len(), cfg.node_count());
        assert_eq!(*order.last().unwrap(), cfg.entry());
    }

    #[test]
    fn test_post_order_visits_each_node_once() {
        let (cfg, _, _) = looped();
        let mut order = cfg.nodes_in_post_order();
        order.sort_by_key(|node| node.index());
        order.dedup();
        assert_eq!(order.len(), cfg.node_count());
    }

    #[test]
    fn test_local_index_groups_nodes_by_element() {
        let mut builder = CfgBuilder::new();
        let head = builder.add_node(Some(ElementId(7)));
        let tail = builder.add_node(Some(ElementId(7)));
        let exit = builder.add_node(None);
        let entry = builder.entry();
        builder.add_edge(entry, head);
        builder.add_edge(head, tail);
        builder.add_edge(tail, exit);
        let cfg = builder.finish(exit);

        let index = cfg.build_local_index();
        assert_eq!(index[&ElementId(7)], vec![head, tail]);
        assert_eq!(index.len(), 1);
    }
}
