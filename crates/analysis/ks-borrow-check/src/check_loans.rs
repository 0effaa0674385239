//! Phase two: replaying uses against the dataflow results.
//!
//! The walker drives the body a second time. At every use the checker
//! consults the loan dataflow for outstanding loans and the flowed move
//! data for invalidating moves, and reports:
//!
//! 1. assignments to places with outstanding loans;
//! 2. loans issued together that conflict with each other;
//! 3. uses of possibly-moved values;
//! 4. re-assignments of immutable bindings.

use crate::error::{Diagnostic, ErrorCode};
use crate::loan_path::{LoanPath, LoanPathElem, LoanPathKind};
use crate::move_data::{FlowedMoveData, MoveKind};
use crate::{BorrowCtxt, Loan, LoanDataflow};
use ks_hir::{
    BindingId, BorrowKind, Categorization, Cmt, ConsumeMode, ElementId, FileSpan, InteriorKind,
    LoanCause, MatchMode, MutateMode, Region, Scope, ScopeTree, UseDelegate, UseWalker,
};
use std::rc::Rc;
use tracing::debug;

pub(crate) fn check_loans(
    bccx: &BorrowCtxt<'_>,
    dfcx_loans: &LoanDataflow,
    move_data: &FlowedMoveData,
    all_loans: &[Loan],
    walker: &dyn UseWalker,
) {
    let mut clcx = CheckLoanCtxt {
        bccx,
        dfcx_loans,
        move_data,
        all_loans,
    };
    walker.walk(&mut clcx);
}

struct CheckLoanCtxt<'a, 'ctx> {
    bccx: &'a BorrowCtxt<'ctx>,
    dfcx_loans: &'a LoanDataflow,
    move_data: &'a FlowedMoveData,
    all_loans: &'a [Loan],
}

enum UseError {
    UseOk,
    UseWhileBorrowed(usize),
}

/// The only compatible pairing: two shared loans.
fn compatible_borrow_kinds(kind1: BorrowKind, kind2: BorrowKind) -> bool {
    kind1 == BorrowKind::Shared && kind2 == BorrowKind::Shared
}

impl UseDelegate for CheckLoanCtxt<'_, '_> {
    fn consume(&mut self, element: ElementId, cmt: &Cmt, mode: ConsumeMode) {
        debug!(element = element.0, ?mode, "check consume");
        self.consume_common(element, cmt, mode);
    }

    fn consume_pat(&mut self, pat: ElementId, cmt: &Cmt, mode: ConsumeMode) {
        debug!(pat = pat.0, ?mode, "check consume_pat");
        self.consume_common(pat, cmt, mode);
    }

    fn matched_pat(&mut self, _pat: ElementId, _cmt: &Cmt, _mode: MatchMode) {}

    fn borrow(
        &mut self,
        element: ElementId,
        cmt: &Cmt,
        _loan_region: Region,
        _kind: BorrowKind,
        _cause: LoanCause,
    ) {
        debug!(element = element.0, "check borrow");
        if let Some(lp) = LoanPath::compute_for(cmt) {
            self.check_if_path_is_moved(element, cmt.span, &lp);
        }
        self.check_for_conflicting_loans(element);
    }

    fn mutate(&mut self, element: ElementId, assignee_cmt: &Cmt, mode: MutateMode) {
        debug!(element = element.0, ?mode, "check mutate");
        if let Some(lp) = LoanPath::compute_for(assignee_cmt) {
            match mode {
                MutateMode::Init | MutateMode::JustWrite => {
                    // `path = v` does not need the path fully initialized,
                    // but derefs and indexes on the way there must be.
                    self.check_if_assigned_path_is_moved(element, assignee_cmt.span, &lp);
                }
                MutateMode::WriteAndRead => {
                    // `path += v` reads the path first.
                    self.check_if_path_is_moved(element, assignee_cmt.span, &lp);
                }
            }
        }
        self.check_assignment(element, assignee_cmt);
    }

    fn decl_without_init(&mut self, _binding: BindingId, _element: ElementId) {}
}

impl CheckLoanCtxt<'_, '_> {
    /// Visits each loan issued on entry to `element`, whether or not it is
    /// in scope there; loans argued at call sites are issued before they
    /// take effect.
    fn each_issued_loan(&self, element: ElementId, mut op: impl FnMut(&Loan) -> bool) -> bool {
        self.dfcx_loans
            .each_bit_on_entry(element, |bit| op(&self.all_loans[bit]))
    }

    /// Like [`Self::each_issued_loan`], restricted to loans whose kill
    /// scope has not yet been reached.
    fn each_in_scope_loan(&self, scope: Scope, mut op: impl FnMut(&Loan) -> bool) -> bool {
        self.each_issued_loan(scope.element(), |loan| {
            if self.bccx.scopes.is_subscope_of(scope, loan.kill_scope) {
                op(loan)
            } else {
                true
            }
        })
    }

    /// Visits the in-scope loans whose restrictions or paths an access to
    /// `loan_path` would touch.
    fn each_in_scope_loan_affecting_path(
        &self,
        scope: Scope,
        loan_path: &LoanPath,
        mut op: impl FnMut(&Loan) -> bool,
    ) -> bool {
        // First, loans restricting the path being used. That covers
        // borrows of the path and of anything inside it:
        //
        //     let x = &mut a.b.c; // restricts a, a.b, a.b.c
        //     let y = a;          // conflicts
        let cont = self.each_in_scope_loan(scope, |loan| {
            for restricted in &loan.restricted_paths {
                if **restricted == *loan_path {
                    if !op(loan) {
                        return false;
                    }
                }
            }
            true
        });
        if !cont {
            return false;
        }

        // Second, loans of a base path. A borrow of `a.b` alone forbids
        // uses of `a.b.c`, while leaving `a.c` alone; that is why this
        // pass looks at loan paths, not restriction sets.
        let mut cursor = loan_path;
        loop {
            match &cursor.kind {
                LoanPathKind::Var(_) | LoanPathKind::Upvar(_) => break,
                LoanPathKind::Downcast(base, _) | LoanPathKind::Extend(base, ..) => {
                    cursor = base;
                }
            }

            let cont = self.each_in_scope_loan(scope, |loan| {
                if *loan.loan_path == *cursor {
                    op(loan)
                } else {
                    true
                }
            });
            if !cont {
                return false;
            }
        }

        true
    }

    fn loans_generated_by(&self, element: ElementId) -> Vec<usize> {
        let mut result = Vec::new();
        self.dfcx_loans.each_gen_bit(element, |bit| {
            result.push(bit);
            true
        });
        result
    }

    /// Reports conflicts between the loans coming into effect at `element`
    /// and every loan already issued, and between the new loans themselves.
    fn check_for_conflicting_loans(&self, element: ElementId) {
        let new_loan_indices = self.loans_generated_by(element);
        debug!(element = element.0, ?new_loan_indices, "check_for_conflicting_loans");

        for &new_index in &new_loan_indices {
            self.each_issued_loan(element, |issued| {
                let new_loan = &self.all_loans[new_index];
                if issued.index == new_loan.index {
                    return true;
                }
                // Stop at the first conflicting issued loan to keep the
                // reports linear in the number of new loans.
                self.report_error_if_loans_conflict(issued, new_loan)
            });
        }

        for (i, &x) in new_loan_indices.iter().enumerate() {
            let old_loan = &self.all_loans[x];
            for &y in &new_loan_indices[i + 1..] {
                let new_loan = &self.all_loans[y];
                self.report_error_if_loans_conflict(old_loan, new_loan);
            }
        }
    }

    /// Whether `old_loan` and `new_loan` may coexist; reports and returns
    /// false when not.
    fn report_error_if_loans_conflict(&self, old_loan: &Loan, new_loan: &Loan) -> bool {
        self.loan_conflicts_with_restriction(old_loan, new_loan, old_loan, new_loan)
            && self.loan_conflicts_with_restriction(new_loan, old_loan, old_loan, new_loan)
    }

    /// Whether the restrictions of `loan1` permit `loan2`.
    fn loan_conflicts_with_restriction(
        &self,
        loan1: &Loan,
        loan2: &Loan,
        old_loan: &Loan,
        new_loan: &Loan,
    ) -> bool {
        if compatible_borrow_kinds(loan1.kind, loan2.kind) {
            return true;
        }

        for restricted in &loan1.restricted_paths {
            if **restricted == *loan2.loan_path {
                let common_root =
                    self.forked_common_root(&new_loan.loan_path, &old_loan.loan_path);
                self.bccx.report(Diagnostic::new(
                    new_loan.element,
                    new_loan.span,
                    ErrorCode::LoanConflict {
                        loan_index: old_loan.index,
                        common_root,
                    },
                ));
                return false;
            }
        }

        true
    }

    /// When two conflicting paths fork at sibling fields, the conflict is
    /// really about their common ancestor; attribute it there.
    fn forked_common_root(&self, path1: &LoanPath, path2: &LoanPath) -> Option<BindingId> {
        if path1.has_fork(path2) {
            path1.common(path2).map(|ancestor| ancestor.root_binding())
        } else {
            None
        }
    }

    fn consume_common(&self, element: ElementId, cmt: &Cmt, mode: ConsumeMode) {
        let Some(lp) = LoanPath::compute_for(cmt) else {
            return;
        };

        match mode {
            ConsumeMode::Copy => {
                self.check_for_copy_of_frozen_path(element, cmt.span, &lp);
            }
            ConsumeMode::Move(_) => {
                // A move with no recorded kind was moved from an illegal
                // origin; the gather pass already reported it and there is
                // no loan conflict to construct on top.
                if let Some(move_kind) = self.move_data.kind_of_move_of_path(element, &lp) {
                    self.check_for_move_of_borrowed_path(element, cmt.span, &lp, move_kind);
                }
            }
        }

        self.check_if_path_is_moved(element, cmt.span, &lp);
    }

    fn check_for_copy_of_frozen_path(&self, element: ElementId, span: FileSpan, lp: &LoanPath) {
        match self.analyze_restrictions_on_use(element, lp, BorrowKind::Shared) {
            UseError::UseOk => {}
            UseError::UseWhileBorrowed(loan_index) => {
                let loan = &self.all_loans[loan_index];
                self.bccx.report(Diagnostic::new(
                    element,
                    span,
                    ErrorCode::LoanConflict {
                        loan_index,
                        common_root: self.forked_common_root(&loan.loan_path, lp),
                    },
                ));
            }
        }
    }

    fn check_for_move_of_borrowed_path(
        &self,
        element: ElementId,
        span: FileSpan,
        lp: &LoanPath,
        move_kind: MoveKind,
    ) {
        // A move is incompatible with any loan; probing with the mutable
        // kind finds every one of them.
        match self.analyze_restrictions_on_use(element, lp, BorrowKind::Mutable) {
            UseError::UseOk => {}
            UseError::UseWhileBorrowed(loan_index) => {
                debug!(?move_kind, loan_index, "move of borrowed path");
                let loan = &self.all_loans[loan_index];
                self.bccx.report(Diagnostic::new(
                    element,
                    span,
                    ErrorCode::LoanConflict {
                        loan_index,
                        common_root: self.forked_common_root(&loan.loan_path, lp),
                    },
                ));
            }
        }
    }

    /// Whether an access of `borrow_kind` strength to `use_path` collides
    /// with an in-scope loan.
    fn analyze_restrictions_on_use(
        &self,
        element: ElementId,
        use_path: &LoanPath,
        borrow_kind: BorrowKind,
    ) -> UseError {
        let mut result = UseError::UseOk;
        self.each_in_scope_loan_affecting_path(Scope(element), use_path, |loan| {
            if !compatible_borrow_kinds(loan.kind, borrow_kind) {
                result = UseError::UseWhileBorrowed(loan.index);
                false
            } else {
                true
            }
        });
        result
    }

    /// Reports a use of `lp` while a move invalidating it is live.
    fn check_if_path_is_moved(&self, element: ElementId, span: FileSpan, lp: &Rc<LoanPath>) {
        self.move_data.each_move_of(element, lp, |the_move, moved_lp| {
            debug!(moved = ?moved_lp.kind, at = the_move.element.0, "use of moved value");
            self.bccx.report(Diagnostic::new(
                element,
                span,
                ErrorCode::UseOfMoved {
                    move_element: the_move.element,
                    move_kind: the_move.kind,
                },
            ));
            false
        });
    }

    /// Assigning to a path does not require it initialized, but every
    /// deref or index on the way to it must be:
    ///
    /// ```text
    /// let p: Point;      p.x = 22;    // ok, p may be uninitialized
    /// let b: Box<Point>; (*b).x = 22; // error, the deref reads b
    /// ```
    fn check_if_assigned_path_is_moved(
        &self,
        element: ElementId,
        span: FileSpan,
        lp: &Rc<LoanPath>,
    ) {
        match &lp.kind {
            LoanPathKind::Var(_) | LoanPathKind::Upvar(_) => {}

            LoanPathKind::Downcast(base, _)
            | LoanPathKind::Extend(
                base,
                _,
                LoanPathElem::Interior(_, InteriorKind::Field(_) | InteriorKind::Pattern),
            ) => self.check_if_assigned_path_is_moved(element, span, base),

            LoanPathKind::Extend(base, _, LoanPathElem::Interior(_, InteriorKind::Index))
            | LoanPathKind::Extend(base, _, LoanPathElem::Deref(_)) => {
                self.check_if_path_is_moved(element, span, base);
            }
        }
    }

    fn check_assignment(&self, element: ElementId, assignee_cmt: &Cmt) {
        // The write must not invalidate an outstanding loan.
        if let Some(loan_path) = LoanPath::compute_for(assignee_cmt) {
            self.each_in_scope_loan_affecting_path(Scope(element), &loan_path, |loan| {
                self.bccx.report(Diagnostic::new(
                    element,
                    assignee_cmt.span,
                    ErrorCode::LoanConflict {
                        loan_index: loan.index,
                        common_root: None,
                    },
                ));
                false
            });
        }

        // Re-assignment of a local: fine when declared mutable (and the
        // `mut` is thereby exercised), an error when not. This needs the
        // assignment dataflow, which is why it is not a gather-time gate.
        if let Categorization::Local(binding) = assignee_cmt.cat {
            let Some(lp) = LoanPath::compute_for(assignee_cmt) else {
                return;
            };
            self.move_data.each_assignment_of(element, &lp, |assignment| {
                if self.bccx.types.mutability_of(binding).is_mutable() {
                    self.bccx.note_used_mut(binding);
                } else {
                    self.bccx.report(Diagnostic::new(
                        element,
                        assignee_cmt.span,
                        ErrorCode::ReassignImmutable {
                            binding,
                            prior_element: assignment.element,
                        },
                    ));
                }
                false
            });
        }
    }
}
