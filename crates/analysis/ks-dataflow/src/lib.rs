//! Generic forward bit-vector dataflow.
//!
//! One bit per tracked fact (a loan, a move, an assignment), one set of
//! gen/kill/on-entry words per CFG node. The engine is parameterized over a
//! monotone join operator, so the same machinery serves "any predecessor
//! had it" analyses (join = union, initial value false) and would serve
//! "every predecessor had it" analyses (join = intersection, initial value
//! true) unchanged.
//!
//! Kills are recorded in two classes. A [`KillFrom::Execution`] kill models
//! a runtime action such as an assignment re-initializing a moved path; a
//! [`KillFrom::ScopeEnd`] kill models a scope boundary ending a loan or a
//! variable's extent. Propagation subtracts both; keeping them apart
//! preserves the distinction for analyses that will want it.

use ks_cfg::{Cfg, NodeIndex};
use ks_hir::ElementId;
use rustc_hash::FxHashMap;
use std::mem;
use tracing::debug;

/// Joins the bits flowing out of two predecessors.
pub trait BitwiseOperator {
    fn join(&self, succ: usize, pred: usize) -> usize;
}

/// Parameterization of one dataflow analysis.
pub trait DataflowOperator: BitwiseOperator {
    /// The value every bit starts with on entry to every node.
    fn initial_value() -> bool;
}

/// The provenance of a kill.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KillFrom {
    /// A scope ended; loans and variable extents die here.
    ScopeEnd,
    /// A runtime action, such as an assignment overwriting a moved path.
    Execution,
}

const WORD_BITS: usize = usize::BITS as usize;

/// Per-node gen/kill/on-entry sets for one analysis over one body.
pub struct DataflowContext<O: DataflowOperator> {
    analysis_name: &'static str,
    operator: O,
    bits_per_node: usize,
    words_per_node: usize,

    /// Element to CFG nodes, from [`Cfg::build_local_index`].
    local_index: FxHashMap<ElementId, Vec<NodeIndex>>,

    gens: Vec<usize>,
    action_kills: Vec<usize>,
    scope_kills: Vec<usize>,
    on_entry: Vec<usize>,
}

impl<O: DataflowOperator> DataflowContext<O> {
    #[must_use]
    pub fn new(analysis_name: &'static str, cfg: &Cfg, operator: O, bits_per_node: usize) -> Self {
        let words_per_node = (bits_per_node + WORD_BITS - 1) / WORD_BITS;
        let num_words = cfg.node_count() * words_per_node;
        let entry_word = if O::initial_value() { usize::MAX } else { 0 };

        debug!(
            analysis = analysis_name,
            bits = bits_per_node,
            nodes = cfg.node_count(),
            "dataflow context created"
        );

        Self {
            analysis_name,
            operator,
            bits_per_node,
            words_per_node,
            local_index: cfg.build_local_index(),
            gens: vec![0; num_words],
            action_kills: vec![0; num_words],
            scope_kills: vec![0; num_words],
            on_entry: vec![entry_word; num_words],
        }
    }

    #[must_use]
    pub fn bits_per_node(&self) -> usize {
        self.bits_per_node
    }

    fn word_range(&self, node: NodeIndex) -> std::ops::Range<usize> {
        let start = node.index() * self.words_per_node;
        start..start + self.words_per_node
    }

    /// Sets `bit` in the gen set of every node generated from `element`.
    ///
    /// An element the CFG knows nothing about is skipped: the walker may
    /// surface elements (like synthesized pattern positions) that the graph
    /// builder collapsed away, and a missing gen only loses precision.
    pub fn add_gen(&mut self, element: ElementId, bit: usize) {
        debug_assert!(bit < self.bits_per_node);
        let Some(nodes) = self.local_index.get(&element) else {
            debug!(
                analysis = self.analysis_name,
                element = element.0,
                bit,
                "add_gen for element with no CFG node"
            );
            return;
        };
        for &node in nodes.clone().iter() {
            let range = self.word_range(node);
            set_bit(&mut self.gens[range], bit);
        }
    }

    /// Sets `bit` in the kill set of the given class for every node
    /// generated from `element`.
    pub fn add_kill(&mut self, kind: KillFrom, element: ElementId, bit: usize) {
        debug_assert!(bit < self.bits_per_node);
        let Some(nodes) = self.local_index.get(&element) else {
            debug!(
                analysis = self.analysis_name,
                element = element.0,
                bit,
                "add_kill for element with no CFG node"
            );
            return;
        };
        for &node in nodes.clone().iter() {
            let range = self.word_range(node);
            match kind {
                KillFrom::ScopeEnd => set_bit(&mut self.scope_kills[range], bit),
                KillFrom::Execution => set_bit(&mut self.action_kills[range], bit),
            }
        }
    }

    /// Hook for kills induced by non-local control-flow exits.
    ///
    /// The graph builder materializes `break`/`continue` as ordinary edges,
    /// so there is nothing left to do here; the hook stays so callers wire
    /// the phase explicitly.
    pub fn add_kills_from_flow_exits(&mut self, _cfg: &Cfg) {}

    /// Runs the forward fixpoint.
    ///
    /// Each node's exit state is `(on_entry | gens) \ action_kills \
    /// scope_kills`, joined into every successor's entry state. Iteration
    /// is in reverse post-order and stops when no entry set changes; the
    /// lattice is finite and the operator monotone, so this terminates.
    pub fn propagate(&mut self, cfg: &Cfg) {
        if self.bits_per_node == 0 {
            return;
        }

        let mut order = cfg.nodes_in_post_order();
        order.reverse();

        let mut temp = vec![0usize; self.words_per_node];
        let mut iterations = 0usize;
        let mut changed = true;
        while changed {
            changed = false;
            iterations += 1;
            for &node in &order {
                let range = self.word_range(node);
                temp.copy_from_slice(&self.on_entry[range.clone()]);
                for (i, word) in temp.iter_mut().enumerate() {
                    *word |= self.gens[range.start + i];
                    *word &= !self.action_kills[range.start + i];
                    *word &= !self.scope_kills[range.start + i];
                }
                for &succ in cfg.successors(node) {
                    let succ_range = self.word_range(succ);
                    changed |= bitwise(&mut self.on_entry[succ_range], &temp, &self.operator);
                }
            }
        }

        debug!(
            analysis = self.analysis_name,
            iterations, "dataflow fixpoint reached"
        );
    }

    /// Invokes `f` for each bit set on entry to `element`, short-circuiting
    /// when `f` returns false. Returns false iff iteration was cut short.
    ///
    /// When an element expands to several nodes the union of their entry
    /// sets is consulted, so each bit is reported once.
    pub fn each_bit_on_entry(&self, element: ElementId, f: impl FnMut(usize) -> bool) -> bool {
        self.each_bit_for_element(element, &self.on_entry, f)
    }

    /// Invokes `f` for each bit generated at `element`.
    pub fn each_gen_bit(&self, element: ElementId, f: impl FnMut(usize) -> bool) -> bool {
        self.each_bit_for_element(element, &self.gens, f)
    }

    fn each_bit_for_element(
        &self,
        element: ElementId,
        words: &[usize],
        f: impl FnMut(usize) -> bool,
    ) -> bool {
        let Some(nodes) = self.local_index.get(&element) else {
            return true;
        };
        match nodes.as_slice() {
            [] => true,
            [node] => self.each_bit(&words[self.word_range(*node)], f),
            many => {
                let mut union = vec![0usize; self.words_per_node];
                for &node in many {
                    for (acc, &word) in union.iter_mut().zip(&words[self.word_range(node)]) {
                        *acc |= word;
                    }
                }
                self.each_bit(&union, f)
            }
        }
    }

    fn each_bit(&self, words: &[usize], mut f: impl FnMut(usize) -> bool) -> bool {
        for (word_index, &word) in words.iter().enumerate() {
            if word == 0 {
                continue;
            }
            let base = word_index * WORD_BITS;
            for offset in 0..WORD_BITS {
                if word & (1 << offset) != 0 {
                    let bit = base + offset;
                    // Sets are rounded up to whole words; ignore the slack.
                    if bit >= self.bits_per_node {
                        return true;
                    }
                    if !f(bit) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// The entry set of one node, for inspection.
    #[must_use]
    pub fn on_entry_set_for(&self, node: NodeIndex) -> &[usize] {
        &self.on_entry[self.word_range(node)]
    }

    /// The exit set of one node: entry plus gens minus both kill classes.
    #[must_use]
    pub fn exit_set_for(&self, node: NodeIndex) -> Vec<usize> {
        let range = self.word_range(node);
        let mut out = self.on_entry[range.clone()].to_vec();
        for (i, word) in out.iter_mut().enumerate() {
            *word |= self.gens[range.start + i];
            *word &= !self.action_kills[range.start + i];
            *word &= !self.scope_kills[range.start + i];
        }
        out
    }

}

fn set_bit(words: &mut [usize], bit: usize) {
    words[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
}

fn bitwise<Op: BitwiseOperator>(out_vec: &mut [usize], in_vec: &[usize], op: &Op) -> bool {
    debug_assert_eq!(out_vec.len(), in_vec.len());
    let mut changed = false;
    for (out_word, &in_word) in out_vec.iter_mut().zip(in_vec) {
        let old = mem::replace(out_word, op.join(*out_word, in_word));
        changed |= old != *out_word;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use ks_cfg::CfgBuilder;

    #[derive(Clone, Copy)]
    struct Union;

    impl BitwiseOperator for Union {
        fn join(&self, succ: usize, pred: usize) -> usize {
            succ | pred
        }
    }

    impl DataflowOperator for Union {
        fn initial_value() -> bool {
            false
        }
    }

    fn element(n: u32) -> ElementId {
        ElementId(n)
    }

    /// entry -> a -> b -> c -> exit, plus a diamond edge a -> c.
    fn diamond() -> Cfg {
        let mut builder = CfgBuilder::new();
        let a = builder.add_node(Some(element(1)));
        let b = builder.add_node(Some(element(2)));
        let c = builder.add_node(Some(element(3)));
        let exit = builder.add_node(None);
        let entry = builder.entry();
        builder.add_edge(entry, a);
        builder.add_edge(a, b);
        builder.add_edge(a, c);
        builder.add_edge(b, c);
        builder.add_edge(c, exit);
        builder.finish(exit)
    }

    #[test]
    fn test_gen_reaches_successors() {
        let cfg = diamond();
        let mut dfcx = DataflowContext::new("test", &cfg, Union, 2);
        dfcx.add_gen(element(1), 0);
        dfcx.propagate(&cfg);

        let mut seen = Vec::new();
        dfcx.each_bit_on_entry(element(3), |bit| {
            seen.push(bit);
            true
        });
        assert_eq!(seen, vec![0]);
    }

    #[test]
    fn test_execution_kill_stops_propagation() {
        let cfg = diamond();
        let mut dfcx = DataflowContext::new("test", &cfg, Union, 1);
        dfcx.add_gen(element(1), 0);
        dfcx.add_kill(KillFrom::Execution, element(2), 0);
        dfcx.propagate(&cfg);

        // Bit survives along the a -> c edge even though a -> b -> c kills it.
        let mut alive = false;
        dfcx.each_bit_on_entry(element(3), |_| {
            alive = true;
            true
        });
        assert!(alive);
    }

    #[test]
    fn test_scope_kill_dominates_straight_line() {
        let mut builder = CfgBuilder::new();
        let a = builder.add_node(Some(element(1)));
        let b = builder.add_node(Some(element(2)));
        let c = builder.add_node(Some(element(3)));
        let exit = builder.add_node(None);
        let entry = builder.entry();
        builder.add_edge(entry, a);
        builder.add_edge(a, b);
        builder.add_edge(b, c);
        builder.add_edge(c, exit);
        let cfg = builder.finish(exit);

        let mut dfcx = DataflowContext::new("test", &cfg, Union, 1);
        dfcx.add_gen(element(1), 0);
        dfcx.add_kill(KillFrom::ScopeEnd, element(2), 0);
        dfcx.propagate(&cfg);

        // On entry to the kill node the bit is still visible ...
        assert!(!dfcx.each_bit_on_entry(element(2), |_| false));
        // ... and gone everywhere after, with no re-gen.
        assert!(dfcx.each_bit_on_entry(element(3), |_| false));
    }

    #[test]
    fn test_entry_is_superset_of_predecessor_exits() {
        let cfg = diamond();
        let mut dfcx = DataflowContext::new("test", &cfg, Union, 3);
        dfcx.add_gen(element(1), 0);
        dfcx.add_gen(element(2), 1);
        dfcx.add_kill(KillFrom::Execution, element(2), 0);
        dfcx.propagate(&cfg);

        for node in cfg.nodes_in_post_order() {
            let exit = dfcx.exit_set_for(node);
            for &succ in cfg.successors(node) {
                let entry = dfcx.on_entry_set_for(succ);
                for (e, x) in entry.iter().zip(&exit) {
                    assert_eq!(e & x, *x, "entry must contain predecessor exit");
                }
            }
        }
    }

    #[test]
    fn test_gen_survives_loop_back_edge() {
        let mut builder = CfgBuilder::new();
        let head = builder.add_node(Some(element(1)));
        let body = builder.add_node(Some(element(2)));
        let exit = builder.add_node(None);
        let entry = builder.entry();
        builder.add_edge(entry, head);
        builder.add_edge(head, body);
        builder.add_edge(body, head);
        builder.add_edge(head, exit);
        let cfg = builder.finish(exit);

        let mut dfcx = DataflowContext::new("test", &cfg, Union, 1);
        dfcx.add_gen(element(2), 0);
        dfcx.propagate(&cfg);

        // The loop body's gen flows around the back edge to the head.
        assert!(!dfcx.each_bit_on_entry(element(1), |_| false));
    }

    #[test]
    fn test_zero_bits_is_a_no_op() {
        let cfg = diamond();
        let mut dfcx = DataflowContext::new("test", &cfg, Union, 0);
        dfcx.propagate(&cfg);
        assert!(dfcx.each_bit_on_entry(element(3), |_| false));
    }
}
