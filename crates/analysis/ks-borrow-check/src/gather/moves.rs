//! Gathering moves and assignments into [`MoveData`].

use crate::loan_path::LoanPath;
use crate::move_data::{MoveData, MoveKind};
use ks_hir::{Categorization, Cmt, ElementId, FileSpan, InteriorKind, MutateMode, PointerKind};
use std::rc::Rc;
use tracing::debug;

/// A move whose origin does not own its content.
pub(super) struct MoveError {
    /// The offending place, innermost illegal step.
    pub move_from: Cmt,
    /// The element performing the move.
    pub element: ElementId,
}

pub(super) fn gather_move(
    move_data: &mut MoveData,
    move_errors: &mut Vec<MoveError>,
    element: ElementId,
    cmt: &Cmt,
    kind: MoveKind,
) {
    debug!(element = element.0, ?kind, cat = ?cmt.cat, "gather_move");

    if let Some(illegal) = check_and_get_illegal_move_origin(cmt) {
        move_errors.push(MoveError {
            move_from: illegal,
            element,
        });
        return;
    }

    if let Some(lp) = LoanPath::compute_for(cmt) {
        move_data.add_move(lp, element, kind);
    }
    // A move out of an rvalue is well-formed and leaves nothing to track.
}

pub(super) fn gather_assignment(
    move_data: &mut MoveData,
    lp: Rc<LoanPath>,
    element: ElementId,
    span: FileSpan,
    assignee: ElementId,
    mode: MutateMode,
) {
    move_data.add_assignment(lp, element, span, assignee, mode);
}

/// The innermost step of `cmt` that may not be moved out of, if any.
///
/// Content behind a reference or raw pointer is not owned by the place, an
/// index does not name a statically-known location to deinitialize, and a
/// static outlives any owner that could absorb it.
fn check_and_get_illegal_move_origin(cmt: &Cmt) -> Option<Cmt> {
    match &cmt.cat {
        Categorization::Rvalue(..) | Categorization::Local(..) | Categorization::Upvar(..) => None,

        Categorization::StaticItem => Some(cmt.clone()),

        Categorization::Deref(_, PointerKind::Ref { .. })
        | Categorization::Deref(_, PointerKind::Raw(..)) => Some(cmt.clone()),

        Categorization::Interior(_, InteriorKind::Index) => Some(cmt.clone()),

        Categorization::Deref(base, PointerKind::Unique)
        | Categorization::Interior(base, InteriorKind::Field(_) | InteriorKind::Pattern)
        | Categorization::Downcast(base, _) => check_and_get_illegal_move_origin(base),
    }
}
