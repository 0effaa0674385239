//! The lifetime guarantee.
//!
//! Every pointer step between the borrowed place and its root must outlive
//! the requested loan region. References prove their referent lives for
//! their own region, so the check stops there; owned boxes and interior
//! projections defer to whatever owns them.

use crate::error::{Diagnostic, ErrorCode};
use crate::BorrowCtxt;
use ks_hir::{Categorization, Cmt, ElementId, LoanCause, PointerKind, Region, ScopeTree};
use tracing::debug;

pub(super) fn guarantee_lifetime(
    bccx: &BorrowCtxt<'_>,
    element: ElementId,
    cmt: &Cmt,
    loan_region: Region,
    cause: LoanCause,
) -> Result<(), ()> {
    debug!(element = element.0, ?loan_region, "guarantee_lifetime");
    let ctxt = GuaranteeLifetimeContext {
        bccx,
        element,
        loan_region,
        cause,
    };
    ctxt.check(cmt)
}

struct GuaranteeLifetimeContext<'a, 'ctx> {
    bccx: &'a BorrowCtxt<'ctx>,
    element: ElementId,
    loan_region: Region,
    cause: LoanCause,
}

impl GuaranteeLifetimeContext<'_, '_> {
    fn check(&self, cmt: &Cmt) -> Result<(), ()> {
        match &cmt.cat {
            Categorization::Rvalue(temp_region) => self.check_scope(cmt, *temp_region),

            Categorization::StaticItem => Ok(()),

            Categorization::Local(binding) | Categorization::Upvar(binding) => {
                let var_region = Region::Scope(self.bccx.scopes.variable_scope(*binding));
                self.check_scope(cmt, var_region)
            }

            Categorization::Deref(_, PointerKind::Ref { region, .. }) => {
                // The reference's region bounds how long the referent is
                // known to live; nothing beyond it needs checking.
                if self.bccx.scopes.is_subregion_of(self.loan_region, *region) {
                    Ok(())
                } else {
                    self.bccx.report(Diagnostic::new(
                        self.element,
                        cmt.span,
                        ErrorCode::BorrowedPointerTooShort {
                            loan_region: self.loan_region,
                            pointer_region: *region,
                        },
                    ));
                    Err(())
                }
            }

            Categorization::Deref(_, PointerKind::Raw(..)) => Ok(()),

            Categorization::Deref(base, PointerKind::Unique) => self.check(base),

            Categorization::Interior(base, _) | Categorization::Downcast(base, _) => {
                self.check(base)
            }
        }
    }

    fn check_scope(&self, cmt: &Cmt, max_region: Region) -> Result<(), ()> {
        if self.bccx.scopes.is_subregion_of(self.loan_region, max_region) {
            Ok(())
        } else {
            self.bccx.report(Diagnostic::new(
                self.element,
                cmt.span,
                ErrorCode::OutOfScope {
                    super_region: max_region,
                    sub_region: self.loan_region,
                    cause: self.cause,
                },
            ));
            Err(())
        }
    }
}
