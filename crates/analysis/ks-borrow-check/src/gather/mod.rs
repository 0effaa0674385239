//! Phase one: gathering loans, moves and assignments.
//!
//! The walker drives this delegate over the body once. Borrows run the
//! full pipeline (lifetime guarantee, mutability gate, aliasability gate,
//! restriction computation, scope arithmetic) and append a [`Loan`];
//! consumes and writes accumulate in [`MoveData`]. Phase two replays the
//! walk against the dataflow results.

mod lifetime;
mod moves;
pub(crate) mod restrictions;

use self::moves::MoveError;
use self::restrictions::RestrictionResult;
use crate::error::{Diagnostic, ErrorCode};
use crate::loan_path::{LoanPath, LoanPathElem, LoanPathKind};
use crate::move_data::{MoveData, MoveKind};
use crate::{BorrowCtxt, Loan};
use ks_hir::{
    Aliasability, AliasableReason, BindingId, BorrowKind, Categorization, Cmt, ConsumeMode,
    ElementId, LoanCause, MatchMode, MoveReason, MutabilityCategory, MutateMode, PointerKind,
    Region, Scope, ScopeTree, Ty, UseDelegate, UseWalker,
};
use tracing::debug;

/// Runs the gather phase over one body.
pub(crate) fn gather_loans_in_body(
    bccx: &BorrowCtxt<'_>,
    walker: &dyn UseWalker,
) -> (Vec<Loan>, MoveData) {
    let mut glcx = GatherLoanCtxt {
        bccx,
        all_loans: Vec::new(),
        move_data: MoveData::new(),
        move_errors: Vec::new(),
    };
    walker.walk(&mut glcx);
    glcx.report_move_errors();
    (glcx.all_loans, glcx.move_data)
}

struct GatherLoanCtxt<'a, 'ctx> {
    bccx: &'a BorrowCtxt<'ctx>,
    all_loans: Vec<Loan>,
    move_data: MoveData,
    /// Illegal move origins, reported in one batch after the walk.
    move_errors: Vec<MoveError>,
}

impl UseDelegate for GatherLoanCtxt<'_, '_> {
    fn consume(&mut self, element: ElementId, cmt: &Cmt, mode: ConsumeMode) {
        debug!(element = element.0, ?mode, "gather consume");
        match mode {
            ConsumeMode::Copy => {}
            ConsumeMode::Move(reason) => {
                let kind = match reason {
                    MoveReason::CaptureMove => MoveKind::Captured,
                    MoveReason::DirectRefMove | MoveReason::PatBindingMove => MoveKind::MoveExpr,
                };
                moves::gather_move(&mut self.move_data, &mut self.move_errors, element, cmt, kind);
            }
        }
    }

    fn consume_pat(&mut self, pat: ElementId, cmt: &Cmt, mode: ConsumeMode) {
        debug!(pat = pat.0, ?mode, "gather consume_pat");
        match mode {
            ConsumeMode::Copy => {}
            ConsumeMode::Move(_) => {
                moves::gather_move(
                    &mut self.move_data,
                    &mut self.move_errors,
                    pat,
                    cmt,
                    MoveKind::MovePat,
                );
            }
        }
    }

    fn matched_pat(&mut self, _pat: ElementId, _cmt: &Cmt, _mode: MatchMode) {}

    fn borrow(
        &mut self,
        element: ElementId,
        cmt: &Cmt,
        loan_region: Region,
        kind: BorrowKind,
        cause: LoanCause,
    ) {
        self.guarantee_valid(element, cmt, kind, loan_region, cause);
    }

    fn mutate(&mut self, element: ElementId, assignee_cmt: &Cmt, mode: MutateMode) {
        self.guarantee_assignment_valid(element, assignee_cmt, mode);
    }

    fn decl_without_init(&mut self, binding: BindingId, element: ElementId) {
        // The variable begins life uninitialized, i.e. moved.
        let ty = self.bccx.types.type_of(element).unwrap_or(Ty::Error);
        let lp = std::rc::Rc::new(LoanPath::new(LoanPathKind::Var(binding), ty));
        self.move_data.add_move(lp, element, MoveKind::Declared);
    }
}

impl GatherLoanCtxt<'_, '_> {
    /// Guarantees that the place `cmt` stays valid for `loan_region`, or
    /// reports why it cannot. Recording a loan is the last step of a
    /// pipeline of gates; any failure aborts the borrow without a loan, and
    /// later phases see only the diagnostics.
    fn guarantee_valid(
        &mut self,
        element: ElementId,
        cmt: &Cmt,
        req_kind: BorrowKind,
        loan_region: Region,
        cause: LoanCause,
    ) {
        debug!(
            element = element.0,
            ?req_kind,
            ?loan_region,
            "guarantee_valid"
        );

        // The borrow must not outlive the data it points into.
        if lifetime::guarantee_lifetime(self.bccx, element, cmt, loan_region, cause).is_err() {
            return;
        }

        // Mutable borrows need mutable data.
        if check_mutability(self.bccx, element, cmt, req_kind).is_err() {
            return;
        }

        // Mutable borrows need uniquely-reachable data.
        if check_aliasability(self.bccx, element, cmt, req_kind).is_err() {
            return;
        }

        match restrictions::compute_restrictions(self.bccx, element, cmt, loan_region, req_kind) {
            RestrictionResult::Safe => {}
            RestrictionResult::SafeIf(loan_path, restricted_paths) => {
                let loan_scope = self.scope_of_loan_region(loan_region);
                let borrow_scope = Scope(element);
                let gen_scope = self.compute_gen_scope(borrow_scope, loan_scope);
                let kill_scope = self.compute_kill_scope(loan_scope, &loan_path);

                if req_kind == BorrowKind::Mutable {
                    self.mark_loan_path_as_mutated(&loan_path);
                }

                let loan = Loan {
                    index: self.all_loans.len(),
                    loan_path,
                    kind: req_kind,
                    restricted_paths,
                    gen_scope,
                    kill_scope,
                    element,
                    span: cmt.span,
                    cause,
                };
                debug!(index = loan.index, ?gen_scope, ?kill_scope, "loan recorded");
                self.all_loans.push(loan);
            }
        }
    }

    fn guarantee_assignment_valid(&mut self, element: ElementId, cmt: &Cmt, mode: MutateMode) {
        let Some(lp) = LoanPath::compute_for(cmt) else {
            // Assignment into a temporary, like `*foo() = 5`; there is no
            // path whose state could be observed afterwards.
            return;
        };

        match cmt.cat {
            Categorization::Local(..) => {
                // Re-assignment of a local is judged against the assignment
                // dataflow in the replay pass, where declared mutability is
                // consulted.
            }
            _ => {
                if check_mutability(self.bccx, element, cmt, BorrowKind::Mutable).is_err() {
                    return;
                }
                if check_aliasability(self.bccx, element, cmt, BorrowKind::Mutable).is_err() {
                    return;
                }
            }
        }

        moves::gather_assignment(&mut self.move_data, lp, element, cmt.span, cmt.element, mode);
    }

    /// The scope a loan region denotes.
    fn scope_of_loan_region(&self, loan_region: Region) -> Scope {
        match loan_region {
            Region::Scope(scope) => scope,
            Region::EarlyBound { index, .. } => self.bccx.scopes.early_free_scope(index),
            Region::Free(fr) => self.bccx.scopes.free_scope(fr),
            // Loans for `'static` borrows still die with the enclosing item.
            Region::Static => self.bccx.item_scope,
        }
    }

    /// When the loan is introduced.
    ///
    /// Usually at the borrow itself, but a loan argued at a call site (a
    /// method argument, say) can only take effect once its scope is
    /// entered.
    fn compute_gen_scope(&self, borrow_scope: Scope, loan_scope: Scope) -> Scope {
        if self.bccx.scopes.is_subscope_of(borrow_scope, loan_scope) {
            borrow_scope
        } else {
            loan_scope
        }
    }

    /// When the loan's restrictions lapse: at the end of the loan region or
    /// of the root variable's extent, whichever comes first.
    ///
    /// A loan region larger than the root variable happens when a `&mut`
    /// is re-borrowed, as in `fn counter<'a>(v: &'a mut Foo) -> &'a mut u32
    /// { &mut v.counter }`: the result outlives `v` itself.
    fn compute_kill_scope(&self, loan_scope: Scope, lp: &LoanPath) -> Scope {
        let lexical_scope = lp.kill_scope(self.bccx.scopes);
        if self.bccx.scopes.is_subscope_of(lexical_scope, loan_scope) {
            lexical_scope
        } else {
            loan_scope
        }
    }

    /// Marks the binding whose `mut` makes this mutable loan possible.
    ///
    /// Walks outward through projections; a dereference of anything but an
    /// owned box means the mutability comes from the pointer, not from any
    /// binding, and the root is not marked.
    fn mark_loan_path_as_mutated(&self, loan_path: &LoanPath) {
        let mut wrapped = Some(loan_path);
        let mut through_borrow = false;
        while let Some(current) = wrapped {
            wrapped = match &current.kind {
                LoanPathKind::Var(binding) => {
                    if !through_borrow {
                        self.bccx.note_used_mut(*binding);
                    }
                    None
                }
                LoanPathKind::Upvar(binding) => {
                    self.bccx.note_used_mut(*binding);
                    None
                }
                LoanPathKind::Downcast(base, _) => Some(base),
                LoanPathKind::Extend(_, MutabilityCategory::Immutable, _) => None,
                LoanPathKind::Extend(base, _, elem) => {
                    if let LoanPathElem::Deref(pk) = elem {
                        if !matches!(pk, PointerKind::Unique) {
                            through_borrow = true;
                        }
                    }
                    Some(base)
                }
            };
        }
    }

    fn report_move_errors(&self) {
        for error in &self.move_errors {
            self.bccx.report(Diagnostic::new(
                error.element,
                error.move_from.span,
                ErrorCode::MoveOutOfNonOwned,
            ));
        }
    }
}

/// The binding a host could mark `mut` to fix a mutability violation, when
/// the place roots in one without crossing a reference.
fn immutable_binding_for_fix(cmt: &Cmt) -> Option<BindingId> {
    match &cmt.cat {
        Categorization::Local(binding) => Some(*binding),
        Categorization::Interior(base, _)
        | Categorization::Downcast(base, _)
        | Categorization::Deref(base, PointerKind::Unique) => immutable_binding_for_fix(base),
        _ => None,
    }
}

/// Mutable loans need mutable data; shared and unique-immutable loans take
/// anything.
fn check_mutability(
    bccx: &BorrowCtxt<'_>,
    element: ElementId,
    cmt: &Cmt,
    req_kind: BorrowKind,
) -> Result<(), ()> {
    match req_kind {
        BorrowKind::Shared | BorrowKind::Unique => Ok(()),
        BorrowKind::Mutable => {
            if cmt.mutbl.is_mutable() {
                Ok(())
            } else {
                bccx.report(Diagnostic::new(
                    element,
                    cmt.span,
                    ErrorCode::Mutability {
                        binding: immutable_binding_for_fix(cmt),
                    },
                ));
                Err(())
            }
        }
    }
}

/// Mutable access requires unique reach. Immutable statics may be borrowed
/// shared; `static mut` is waved through, aliasing it is `unsafe`'s
/// contract.
fn check_aliasability(
    bccx: &BorrowCtxt<'_>,
    element: ElementId,
    cmt: &Cmt,
    req_kind: BorrowKind,
) -> Result<(), ()> {
    match (cmt.freely_aliasable(), req_kind) {
        (Aliasability::NonAliasable, _) => Ok(()),
        (Aliasability::FreelyAliasable(AliasableReason::StaticMut), _) => Ok(()),
        (Aliasability::FreelyAliasable(_), BorrowKind::Shared) => Ok(()),
        (
            Aliasability::FreelyAliasable(reason),
            BorrowKind::Mutable | BorrowKind::Unique,
        ) => {
            bccx.report(Diagnostic::new(
                element,
                cmt.span,
                ErrorCode::Aliasability { reason },
            ));
            Err(())
        }
    }
}
