//! Tracking of moves and assignments.
//!
//! [`MoveData`] accumulates, during gather, every path the body touches by
//! move or assignment, arranged as a tree: each node knows its parent, its
//! first child, its next sibling, and an intrusive list of the moves out of
//! it. [`FlowedMoveData`] then runs two dataflows over that data (live
//! moves, variable assignments) and answers the replay pass's queries.

use crate::loan_path::{LoanPath, LoanPathElem, LoanPathKind};
use ks_cfg::Cfg;
use ks_dataflow::{BitwiseOperator, DataflowContext, DataflowOperator, KillFrom};
use ks_hir::{ElementId, FileSpan, InteriorKind, MutateMode, ScopeTree};
use la_arena::{Arena, Idx, RawIdx};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;
use tracing::debug;

pub type MovePathIndex = Idx<MovePath>;
pub type MoveIndex = Idx<Move>;

/// One node of the move-path tree.
#[derive(Debug)]
pub struct MovePath {
    /// The loan path this node stands for.
    pub loan_path: Rc<LoanPath>,
    /// Parent node; `None` for variable roots.
    pub parent: Option<MovePathIndex>,
    /// Head of the intrusive list of moves out of this path.
    pub first_move: Option<MoveIndex>,
    /// Head of the child list.
    pub first_child: Option<MovePathIndex>,
    /// Next entry in the parent's child list.
    pub next_sibling: Option<MovePathIndex>,
}

/// Why a move record exists.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MoveKind {
    /// Variables begin life moved; a declaration without initializer
    /// records one of these.
    Declared,
    /// An expression consumed the value.
    MoveExpr,
    /// A by-move pattern binding.
    MovePat,
    /// Moved into a closure environment.
    Captured,
}

/// One move out of a path.
#[derive(Debug)]
pub struct Move {
    pub path: MovePathIndex,
    /// The element performing the move.
    pub element: ElementId,
    pub kind: MoveKind,
    /// Next move out of the same path.
    pub next_move: Option<MoveIndex>,
}

/// One assignment to a path.
#[derive(Debug)]
pub struct Assignment {
    pub path: MovePathIndex,
    /// The element performing the assignment.
    pub element: ElementId,
    pub span: FileSpan,
    /// The assignee place expression.
    pub assignee: ElementId,
}

/// Moves and assignments gathered from one body.
#[derive(Debug, Default)]
pub struct MoveData {
    paths: Arena<MovePath>,
    /// Loan path to its tree node, keyed structurally.
    path_map: FxHashMap<Rc<LoanPath>, MovePathIndex>,
    moves: Arena<Move>,
    /// Assignments to whole variables; these get dataflow bits, to detect
    /// double initialization of immutable bindings.
    var_assignments: Vec<Assignment>,
    /// Assignments to projections; not flowed, but they kill move bits.
    path_assignments: Vec<Assignment>,
    /// Places assigned by `=` (not `+=`); compound assignment reads first
    /// and so never counts as initialization.
    assignee_elements: FxHashSet<ElementId>,
}

fn move_bit(index: MoveIndex) -> usize {
    u32::from(index.into_raw()) as usize
}

fn move_index(bit: usize) -> MoveIndex {
    MoveIndex::from_raw(RawIdx::from(bit as u32))
}

/// Sibling paths affected by touching `lp`, per the union-field rule.
///
/// A union's fields overlap in memory, so a move or assignment through one
/// field is a move or assignment of every other field. The rule applies at
/// every union level of the path.
fn union_field_siblings(lp: &Rc<LoanPath>) -> Vec<Rc<LoanPath>> {
    let mut siblings = Vec::new();
    let mut cursor = lp;
    loop {
        if let LoanPathKind::Extend(
            base,
            mutbl,
            LoanPathElem::Interior(variant, InteriorKind::Field(name)),
        ) = &cursor.kind
        {
            if let Some(def) = base.ty.adt_def() {
                if def.is_union() {
                    for field in def.named_fields() {
                        if field.name != *name {
                            siblings.push(Rc::new(LoanPath::new(
                                LoanPathKind::Extend(
                                    base.clone(),
                                    *mutbl,
                                    LoanPathElem::Interior(
                                        *variant,
                                        InteriorKind::Field(field.name),
                                    ),
                                ),
                                field.ty.clone(),
                            )));
                        }
                    }
                }
            }
        }
        match &cursor.kind {
            LoanPathKind::Var(..) | LoanPathKind::Upvar(..) => break,
            LoanPathKind::Downcast(base, _) | LoanPathKind::Extend(base, ..) => cursor = base,
        }
    }
    siblings
}

impl MoveData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path_loan_path(&self, index: MovePathIndex) -> Rc<LoanPath> {
        self.paths[index].loan_path.clone()
    }

    #[must_use]
    pub fn move_count(&self) -> usize {
        self.moves.len()
    }

    #[must_use]
    pub fn var_assignment_count(&self) -> usize {
        self.var_assignments.len()
    }

    #[must_use]
    pub fn var_assignment(&self, index: usize) -> &Assignment {
        &self.var_assignments[index]
    }

    #[must_use]
    pub fn a_move(&self, index: MoveIndex) -> &Move {
        &self.moves[index]
    }

    fn is_variable_path(&self, index: MovePathIndex) -> bool {
        self.paths[index].parent.is_none()
    }

    /// The tree node for `lp`, inserting it (and any missing base nodes,
    /// parents first) on demand.
    pub fn move_path(&mut self, lp: Rc<LoanPath>) -> MovePathIndex {
        if let Some(&index) = self.path_map.get(&lp) {
            return index;
        }

        let index = match &lp.kind {
            LoanPathKind::Var(..) | LoanPathKind::Upvar(..) => self.paths.alloc(MovePath {
                loan_path: lp.clone(),
                parent: None,
                first_move: None,
                first_child: None,
                next_sibling: None,
            }),

            LoanPathKind::Downcast(base, _) | LoanPathKind::Extend(base, ..) => {
                let parent = self.move_path(base.clone());
                let next_sibling = self.paths[parent].first_child;
                let index = self.paths.alloc(MovePath {
                    loan_path: lp.clone(),
                    parent: Some(parent),
                    first_move: None,
                    first_child: None,
                    next_sibling,
                });
                self.paths[parent].first_child = Some(index);
                index
            }
        };

        debug!(path = ?lp.kind, index = ?index, "new move path");
        self.path_map.insert(lp, index);
        index
    }

    #[must_use]
    pub fn existing_move_path(&self, lp: &Rc<LoanPath>) -> Option<MovePathIndex> {
        self.path_map.get(lp).copied()
    }

    /// Existing tree nodes for `lp` and every base of it. Does not insert.
    #[must_use]
    pub fn existing_base_paths(&self, lp: &Rc<LoanPath>) -> Vec<MovePathIndex> {
        let mut result = Vec::new();
        self.add_existing_base_paths(lp, &mut result);
        result
    }

    fn add_existing_base_paths(&self, lp: &Rc<LoanPath>, result: &mut Vec<MovePathIndex>) {
        match self.path_map.get(lp) {
            Some(&index) => {
                self.each_base_path(index, |base| {
                    result.push(base);
                    true
                });
            }
            None => match &lp.kind {
                LoanPathKind::Var(..) | LoanPathKind::Upvar(..) => {}
                LoanPathKind::Downcast(base, _) | LoanPathKind::Extend(base, ..) => {
                    self.add_existing_base_paths(base, result);
                }
            },
        }
    }

    /// Records a move of `lp` at `element`.
    pub fn add_move(&mut self, lp: Rc<LoanPath>, element: ElementId, kind: MoveKind) {
        debug!(path = ?lp.kind, element = element.0, ?kind, "add_move");
        if lp.is_field() {
            for sibling in union_field_siblings(&lp) {
                self.add_move_entry(sibling, element, kind);
            }
        }
        self.add_move_entry(lp, element, kind);
    }

    fn add_move_entry(&mut self, lp: Rc<LoanPath>, element: ElementId, kind: MoveKind) {
        let path = self.move_path(lp);
        let next_move = self.paths[path].first_move;
        let index = self.moves.alloc(Move {
            path,
            element,
            kind,
            next_move,
        });
        self.paths[path].first_move = Some(index);
    }

    /// Records an assignment to `lp` at `element`, with `assignee` the
    /// place expression written.
    pub fn add_assignment(
        &mut self,
        lp: Rc<LoanPath>,
        element: ElementId,
        span: FileSpan,
        assignee: ElementId,
        mode: MutateMode,
    ) {
        debug!(path = ?lp.kind, element = element.0, ?mode, "add_assignment");
        match mode {
            MutateMode::Init | MutateMode::JustWrite => {
                self.assignee_elements.insert(assignee);
            }
            MutateMode::WriteAndRead => {}
        }
        if lp.is_field() {
            for sibling in union_field_siblings(&lp) {
                self.add_assignment_entry(sibling, element, span, assignee);
            }
        }
        self.add_assignment_entry(lp, element, span, assignee);
    }

    fn add_assignment_entry(
        &mut self,
        lp: Rc<LoanPath>,
        element: ElementId,
        span: FileSpan,
        assignee: ElementId,
    ) {
        let path = self.move_path(lp);
        let assignment = Assignment {
            path,
            element,
            span,
            assignee,
        };
        if self.is_variable_path(path) {
            self.var_assignments.push(assignment);
        } else {
            self.path_assignments.push(assignment);
        }
    }

    /// Visits `index` and each of its base paths, root last.
    pub fn each_base_path(
        &self,
        index: MovePathIndex,
        mut f: impl FnMut(MovePathIndex) -> bool,
    ) -> bool {
        let mut cursor = Some(index);
        while let Some(current) = cursor {
            if !f(current) {
                return false;
            }
            cursor = self.paths[current].parent;
        }
        true
    }

    /// Visits `index` and the whole subtree of paths extending it.
    pub fn each_extending_path(
        &self,
        index: MovePathIndex,
        mut f: impl FnMut(MovePathIndex) -> bool,
    ) -> bool {
        self.each_extending_path_inner(index, &mut f)
    }

    fn each_extending_path_inner(
        &self,
        index: MovePathIndex,
        f: &mut dyn FnMut(MovePathIndex) -> bool,
    ) -> bool {
        if !f(index) {
            return false;
        }
        let mut child = self.paths[index].first_child;
        while let Some(current) = child {
            if !self.each_extending_path_inner(current, f) {
                return false;
            }
            child = self.paths[current].next_sibling;
        }
        true
    }

    /// Visits every move out of `index` or a path extending it.
    pub fn each_applicable_move(
        &self,
        index: MovePathIndex,
        mut f: impl FnMut(MoveIndex) -> bool,
    ) -> bool {
        let mut cont = true;
        self.each_extending_path_inner(index, &mut |path| {
            let mut cursor = self.paths[path].first_move;
            while let Some(current) = cursor {
                if !f(current) {
                    cont = false;
                    break;
                }
                cursor = self.moves[current].next_move;
            }
            cont
        });
        cont
    }

    /// Kills every applicable move of `path` at `kill_element`.
    ///
    /// Only precise paths kill: a path through an interior projection does
    /// not name a unique location, and a kill there could erase a move of a
    /// sibling that is in fact still live.
    fn kill_moves(
        &self,
        path: MovePathIndex,
        kill_element: ElementId,
        kill_kind: KillFrom,
        dfcx_moves: &mut MoveDataflow,
    ) {
        if self.paths[path].loan_path.is_precise() {
            self.each_applicable_move(path, |index| {
                dfcx_moves.add_kill(kill_kind, kill_element, move_bit(index));
                true
            });
        }
    }

    /// Feeds the gathered facts into the two dataflows: moves are
    /// generated by moves and killed by assignments and scope ends;
    /// variable assignments are generated at the assignment and killed at
    /// scope end.
    fn add_gen_kills(
        &self,
        scopes: &dyn ScopeTree,
        dfcx_moves: &mut MoveDataflow,
        dfcx_assign: &mut AssignDataflow,
    ) {
        for (index, mv) in self.moves.iter() {
            dfcx_moves.add_gen(mv.element, move_bit(index));
        }

        for (i, assignment) in self.var_assignments.iter().enumerate() {
            dfcx_assign.add_gen(assignment.element, i);
            self.kill_moves(
                assignment.path,
                assignment.element,
                KillFrom::Execution,
                dfcx_moves,
            );
        }

        for assignment in &self.path_assignments {
            self.kill_moves(
                assignment.path,
                assignment.element,
                KillFrom::Execution,
                dfcx_moves,
            );
        }

        // Every move of a variable (or of anything inside it) dies when the
        // variable leaves scope.
        for (index, path) in self.paths.iter() {
            if path.parent.is_none() {
                let kill_scope = path.loan_path.kill_scope(scopes);
                self.kill_moves(index, kill_scope.element(), KillFrom::ScopeEnd, dfcx_moves);
            }
        }

        for (i, assignment) in self.var_assignments.iter().enumerate() {
            let kill_scope = self.paths[assignment.path].loan_path.kill_scope(scopes);
            dfcx_assign.add_kill(KillFrom::ScopeEnd, kill_scope.element(), i);
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MoveDataflowOperator;

impl BitwiseOperator for MoveDataflowOperator {
    #[inline]
    fn join(&self, succ: usize, pred: usize) -> usize {
        succ | pred // moves from both predecessors are in scope
    }
}

impl DataflowOperator for MoveDataflowOperator {
    #[inline]
    fn initial_value() -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AssignDataflowOperator;

impl BitwiseOperator for AssignDataflowOperator {
    #[inline]
    fn join(&self, succ: usize, pred: usize) -> usize {
        succ | pred // assignments from both predecessors are in scope
    }
}

impl DataflowOperator for AssignDataflowOperator {
    #[inline]
    fn initial_value() -> bool {
        false
    }
}

pub type MoveDataflow = DataflowContext<MoveDataflowOperator>;
pub type AssignDataflow = DataflowContext<AssignDataflowOperator>;

/// [`MoveData`] with its dataflows propagated.
pub struct FlowedMoveData {
    pub move_data: MoveData,
    pub dfcx_moves: MoveDataflow,
    pub dfcx_assign: AssignDataflow,
}

impl FlowedMoveData {
    #[must_use]
    pub fn new(move_data: MoveData, scopes: &dyn ScopeTree, cfg: &Cfg) -> Self {
        let mut dfcx_moves = DataflowContext::new(
            "borrowck_moves",
            cfg,
            MoveDataflowOperator,
            move_data.move_count(),
        );
        let mut dfcx_assign = DataflowContext::new(
            "borrowck_assignments",
            cfg,
            AssignDataflowOperator,
            move_data.var_assignment_count(),
        );

        move_data.add_gen_kills(scopes, &mut dfcx_moves, &mut dfcx_assign);
        dfcx_moves.add_kills_from_flow_exits(cfg);
        dfcx_assign.add_kills_from_flow_exits(cfg);
        dfcx_moves.propagate(cfg);
        dfcx_assign.propagate(cfg);

        FlowedMoveData {
            move_data,
            dfcx_moves,
            dfcx_assign,
        }
    }

    /// The kind of the move of exactly `loan_path` generated at `element`,
    /// if one was recorded there.
    #[must_use]
    pub fn kind_of_move_of_path(
        &self,
        element: ElementId,
        loan_path: &Rc<LoanPath>,
    ) -> Option<MoveKind> {
        let path_index = self.move_data.existing_move_path(loan_path)?;
        let mut kind = None;
        self.dfcx_moves.each_gen_bit(element, |bit| {
            let mv = &self.move_data.moves[move_index(bit)];
            if mv.path == path_index {
                kind = Some(mv.kind);
                false
            } else {
                true
            }
        });
        kind
    }

    /// Visits each move that invalidates `loan_path` on entry to `element`:
    /// a move of the path itself, of one of its bases, or of something
    /// inside it. Sibling paths forked at an interior projection are not
    /// visited; moving `a.b.c` leaves `a.b.d` usable.
    pub fn each_move_of(
        &self,
        element: ElementId,
        loan_path: &Rc<LoanPath>,
        mut f: impl FnMut(&Move, &LoanPath) -> bool,
    ) -> bool {
        // Bad scenarios:
        //
        // 1. Move of `a.b.c`, use of `a.b.c`
        // 2. Move of `a.b.c`, use of `a.b.c.d`
        // 3. Move of `a.b.c`, use of `a` or `a.b`
        //
        // OK scenario:
        //
        // 4. Move of `a.b.c`, use of `a.b.d`

        let base_indices = self.move_data.existing_base_paths(loan_path);
        if base_indices.is_empty() {
            return true;
        }

        let opt_loan_path_index = self.move_data.existing_move_path(loan_path);

        let mut cont = true;
        self.dfcx_moves.each_bit_on_entry(element, |bit| {
            let the_move = self.move_data.a_move(move_index(bit));
            let moved_path = the_move.path;
            if base_indices.contains(&moved_path) {
                // Scenario 1 or 2: the path or a base of it was moved.
                if !f(the_move, &self.move_data.paths[moved_path].loan_path) {
                    cont = false;
                }
            } else if let Some(loan_path_index) = opt_loan_path_index {
                // Scenario 3: something extending the path was moved.
                let walked = self.move_data.each_base_path(moved_path, |base| {
                    if base == loan_path_index {
                        f(the_move, &self.move_data.paths[moved_path].loan_path)
                    } else {
                        true
                    }
                });
                if !walked {
                    cont = false;
                }
            }
            cont
        })
    }

    /// Whether `element` is the assignee of a plain `=` assignment.
    #[must_use]
    pub fn is_assignee(&self, element: ElementId) -> bool {
        self.move_data.assignee_elements.contains(&element)
    }

    /// Visits each assignment to `loan_path` (a variable path) that may
    /// have happened on entry to `element`.
    pub fn each_assignment_of(
        &self,
        element: ElementId,
        loan_path: &Rc<LoanPath>,
        mut f: impl FnMut(&Assignment) -> bool,
    ) -> bool {
        let Some(loan_path_index) = self.move_data.existing_move_path(loan_path) else {
            // Any assignment would have created an index.
            return true;
        };

        self.dfcx_assign.each_bit_on_entry(element, |bit| {
            let assignment = self.move_data.var_assignment(bit);
            if assignment.path == loan_path_index && !f(assignment) {
                false
            } else {
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ks_hir::{AdtDef, AdtKind, BindingId, FieldDef, MutabilityCategory, Ty, VariantDef};
    use ks_hir::Interner;
    use std::sync::Arc;

    fn var(binding: u32, ty: Ty) -> Rc<LoanPath> {
        Rc::new(LoanPath::new(LoanPathKind::Var(BindingId(binding)), ty))
    }

    fn field_of(base: &Rc<LoanPath>, name: ks_hir::Symbol, ty: Ty) -> Rc<LoanPath> {
        Rc::new(LoanPath::new(
            LoanPathKind::Extend(
                base.clone(),
                MutabilityCategory::Inherited,
                LoanPathElem::Interior(None, InteriorKind::Field(name)),
            ),
            ty,
        ))
    }

    #[test]
    fn test_move_path_links_parent_and_child() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let mut move_data = MoveData::new();

        let base = var(0, Ty::Int);
        let projected = field_of(&base, f, Ty::Int);
        let child = move_data.move_path(projected.clone());
        let parent = move_data.existing_move_path(&base).expect("parent inserted first");

        assert_eq!(move_data.paths[child].parent, Some(parent));
        assert_eq!(move_data.paths[parent].first_child, Some(child));
        assert_eq!(move_data.move_path(projected), child);
    }

    #[test]
    fn test_sibling_list_threads_through_parent() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let g = interner.intern("g");
        let mut move_data = MoveData::new();

        let base = var(0, Ty::Int);
        let first = move_data.move_path(field_of(&base, f, Ty::Int));
        let second = move_data.move_path(field_of(&base, g, Ty::Int));
        let parent = move_data.existing_move_path(&base).unwrap();

        assert_eq!(move_data.paths[parent].first_child, Some(second));
        assert_eq!(move_data.paths[second].next_sibling, Some(first));
        assert_eq!(move_data.paths[first].next_sibling, None);
    }

    #[test]
    fn test_moves_prepend_to_path_list() {
        let mut move_data = MoveData::new();
        let lp = var(0, Ty::Int);
        move_data.add_move(lp.clone(), ElementId(1), MoveKind::MoveExpr);
        move_data.add_move(lp.clone(), ElementId(2), MoveKind::MoveExpr);

        let path = move_data.existing_move_path(&lp).unwrap();
        let head = move_data.paths[path].first_move.unwrap();
        assert_eq!(move_data.moves[head].element, ElementId(2));
        let tail = move_data.moves[head].next_move.unwrap();
        assert_eq!(move_data.moves[tail].element, ElementId(1));
        assert_eq!(move_data.moves[tail].next_move, None);
    }

    #[test]
    fn test_union_move_broadcasts_to_all_fields() {
        let mut interner = Interner::new();
        let u = interner.intern("U");
        let a = interner.intern("a");
        let b = interner.intern("b");
        let c = interner.intern("c");
        let def = Arc::new(AdtDef {
            name: u,
            kind: AdtKind::Union,
            variants: vec![VariantDef {
                name: u,
                fields: vec![
                    FieldDef { name: a, ty: Ty::Int },
                    FieldDef { name: b, ty: Ty::Int },
                    FieldDef { name: c, ty: Ty::Int },
                ],
            }],
        });

        let mut move_data = MoveData::new();
        let base = var(0, Ty::Adt(def));
        move_data.add_move(
            field_of(&base, a, Ty::Int),
            ElementId(9),
            MoveKind::MoveExpr,
        );

        // All three fields carry a move at the same element.
        for name in [a, b, c] {
            let lp = field_of(&base, name, Ty::Int);
            let path = move_data.existing_move_path(&lp).expect("sibling path exists");
            let head = move_data.paths[path].first_move.expect("sibling move recorded");
            assert_eq!(move_data.moves[head].element, ElementId(9));
        }
    }

    #[test]
    fn test_struct_move_does_not_broadcast() {
        let mut interner = Interner::new();
        let s = interner.intern("S");
        let a = interner.intern("a");
        let b = interner.intern("b");
        let def = Arc::new(AdtDef {
            name: s,
            kind: AdtKind::Struct,
            variants: vec![VariantDef {
                name: s,
                fields: vec![
                    FieldDef { name: a, ty: Ty::Int },
                    FieldDef { name: b, ty: Ty::Int },
                ],
            }],
        });

        let mut move_data = MoveData::new();
        let base = var(0, Ty::Adt(def));
        move_data.add_move(
            field_of(&base, a, Ty::Int),
            ElementId(3),
            MoveKind::MoveExpr,
        );

        assert!(move_data
            .existing_move_path(&field_of(&base, b, Ty::Int))
            .is_none());
    }

    #[test]
    fn test_compound_assignment_is_not_an_assignee() {
        let mut move_data = MoveData::new();
        let lp = var(0, Ty::Int);
        move_data.add_assignment(
            lp.clone(),
            ElementId(1),
            FileSpan::dummy(),
            ElementId(10),
            MutateMode::JustWrite,
        );
        move_data.add_assignment(
            lp,
            ElementId(2),
            FileSpan::dummy(),
            ElementId(11),
            MutateMode::WriteAndRead,
        );

        assert!(move_data.assignee_elements.contains(&ElementId(10)));
        assert!(!move_data.assignee_elements.contains(&ElementId(11)));
    }

    #[test]
    fn test_assignment_classification() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let mut move_data = MoveData::new();
        let base = var(0, Ty::Int);
        move_data.add_assignment(
            base.clone(),
            ElementId(1),
            FileSpan::dummy(),
            ElementId(1),
            MutateMode::Init,
        );
        move_data.add_assignment(
            field_of(&base, f, Ty::Int),
            ElementId(2),
            FileSpan::dummy(),
            ElementId(2),
            MutateMode::JustWrite,
        );

        assert_eq!(move_data.var_assignments.len(), 1);
        assert_eq!(move_data.path_assignments.len(), 1);
    }
}
