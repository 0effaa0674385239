//! Restriction computation.
//!
//! Granting a loan of a place restricts a set of loan paths: the path
//! itself and the prefixes whose mutation or freezing would invalidate the
//! borrow. `Safe` means the borrow needs no loan at all (rvalues live long
//! enough on their own; statics never die; raw pointers are unchecked).

use crate::error::{Diagnostic, ErrorCode};
use crate::loan_path::{LoanPath, LoanPathElem, LoanPathKind};
use crate::BorrowCtxt;
use ks_hir::{
    BorrowKind, Categorization, Cmt, ElementId, Mutability, PointerKind, Region, ScopeTree,
};
use std::rc::Rc;
use tracing::debug;

/// What a borrow requires of its surroundings.
pub(crate) enum RestrictionResult {
    /// No loan needed.
    Safe,
    /// The borrow is safe if accesses to the listed paths are restricted
    /// for the loan's duration. The first component is the borrowed path;
    /// every restricted path is it or a prefix of it.
    SafeIf(Rc<LoanPath>, Vec<Rc<LoanPath>>),
}

pub(crate) fn compute_restrictions(
    bccx: &BorrowCtxt<'_>,
    element: ElementId,
    cmt: &Cmt,
    loan_region: Region,
    req_kind: BorrowKind,
) -> RestrictionResult {
    let ctxt = RestrictionsContext {
        bccx,
        element,
        loan_region,
        req_kind,
    };
    ctxt.restrict(cmt)
}

struct RestrictionsContext<'a, 'ctx> {
    bccx: &'a BorrowCtxt<'ctx>,
    element: ElementId,
    loan_region: Region,
    req_kind: BorrowKind,
}

impl RestrictionsContext<'_, '_> {
    fn restrict(&self, cmt: &Cmt) -> RestrictionResult {
        debug!(cat = ?cmt.cat, "compute restrictions");

        match &cmt.cat {
            // Temporaries are extended to live at least as long as the
            // loan, and statics live forever.
            Categorization::Rvalue(..) | Categorization::StaticItem => RestrictionResult::Safe,

            Categorization::Local(binding) => {
                let lp = Rc::new(LoanPath::new(
                    LoanPathKind::Var(*binding),
                    cmt.ty.clone(),
                ));
                RestrictionResult::SafeIf(lp.clone(), vec![lp])
            }

            Categorization::Upvar(binding) => {
                let lp = Rc::new(LoanPath::new(
                    LoanPathKind::Upvar(*binding),
                    cmt.ty.clone(),
                ));
                RestrictionResult::SafeIf(lp.clone(), vec![lp])
            }

            Categorization::Interior(base, interior) => {
                let variant = match &base.cat {
                    Categorization::Downcast(_, variant) => Some(*variant),
                    _ => None,
                };
                let result = self.restrict(base);
                self.extend(result, cmt, LoanPathElem::Interior(variant, *interior))
            }

            Categorization::Downcast(base, variant) => match self.restrict(base) {
                RestrictionResult::Safe => RestrictionResult::Safe,
                RestrictionResult::SafeIf(base_lp, mut restricted) => {
                    let lp = Rc::new(LoanPath::new(
                        LoanPathKind::Downcast(base_lp, *variant),
                        cmt.ty.clone(),
                    ));
                    restricted.push(lp.clone());
                    RestrictionResult::SafeIf(lp, restricted)
                }
            },

            Categorization::Deref(base, pointer_kind) => match pointer_kind {
                // The box is owned; restricting its contents means
                // restricting the chain that owns the box.
                PointerKind::Unique => {
                    let result = self.restrict(base);
                    self.extend(result, cmt, LoanPathElem::Deref(*pointer_kind))
                }

                PointerKind::Ref { mutbl, region } => {
                    if !self
                        .bccx
                        .scopes
                        .is_subregion_of(self.loan_region, *region)
                    {
                        self.bccx.report(Diagnostic::new(
                            self.element,
                            cmt.span,
                            ErrorCode::BorrowedPointerTooShort {
                                loan_region: self.loan_region,
                                pointer_region: *region,
                            },
                        ));
                        return RestrictionResult::Safe;
                    }

                    match mutbl {
                        // A shared reference proves its referent stays
                        // frozen for `region` on its own; sibling accesses
                        // through the base need no restriction.
                        Mutability::Not => RestrictionResult::Safe,

                        Mutability::Mut => {
                            let result = self.restrict(base);
                            match self.req_kind {
                                BorrowKind::Mutable | BorrowKind::Unique => {
                                    self.extend(result, cmt, LoanPathElem::Deref(*pointer_kind))
                                }
                                // A shared reborrow of a `&mut` restricts
                                // the reborrowed path alone; siblings of
                                // the outer place stay usable.
                                BorrowKind::Shared => match result {
                                    RestrictionResult::Safe => RestrictionResult::Safe,
                                    RestrictionResult::SafeIf(base_lp, _) => {
                                        let lp = Rc::new(LoanPath::new(
                                            LoanPathKind::Extend(
                                                base_lp,
                                                cmt.mutbl,
                                                LoanPathElem::Deref(*pointer_kind),
                                            ),
                                            cmt.ty.clone(),
                                        ));
                                        RestrictionResult::SafeIf(lp.clone(), vec![lp])
                                    }
                                },
                            }
                        }
                    }
                }

                // The checker places no constraints behind raw pointers.
                PointerKind::Raw(..) => RestrictionResult::Safe,
            },
        }
    }

    fn extend(
        &self,
        result: RestrictionResult,
        cmt: &Cmt,
        elem: LoanPathElem,
    ) -> RestrictionResult {
        match result {
            RestrictionResult::Safe => RestrictionResult::Safe,
            RestrictionResult::SafeIf(base_lp, mut restricted) => {
                let lp = Rc::new(LoanPath::new(
                    LoanPathKind::Extend(base_lp, cmt.mutbl, elem),
                    cmt.ty.clone(),
                ));
                restricted.push(lp.clone());
                RestrictionResult::SafeIf(lp, restricted)
            }
        }
    }
}
