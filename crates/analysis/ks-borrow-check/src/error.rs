//! Structured borrow-check diagnostics.
//!
//! The checker never formats messages. Each violation is a [`Diagnostic`]
//! naming the offending element and carrying an [`ErrorCode`] with the data
//! a host needs to render text and offer fixes.

use crate::move_data::MoveKind;
use ks_hir::{AliasableReason, BindingId, ElementId, FileSpan, LoanCause, Region};
use rustc_hash::FxHashSet;
use thiserror::Error;

/// Classification of a borrow-check violation.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ErrorCode {
    /// A mutable borrow or write of immutable data.
    ///
    /// `binding` is the local whose declaration the host can offer to mark
    /// `mut`, when the place roots in one without crossing a reference.
    #[error("cannot borrow immutable data mutably")]
    Mutability { binding: Option<BindingId> },

    /// A mutable access to freely-aliasable data.
    #[error("cannot write to aliasable data")]
    Aliasability { reason: AliasableReason },

    /// The borrowed data does not outlive the requested loan.
    #[error("borrowed value does not live long enough")]
    OutOfScope {
        super_region: Region,
        sub_region: Region,
        cause: LoanCause,
    },

    /// A reborrow through a reference whose own region is too short.
    #[error("reference outlives the data it points to")]
    BorrowedPointerTooShort {
        loan_region: Region,
        pointer_region: Region,
    },

    /// A use of a path that may have been moved (or never initialized).
    #[error("use of moved value")]
    UseOfMoved {
        /// Where the invalidating move happened.
        move_element: ElementId,
        move_kind: MoveKind,
    },

    /// A move out of a place that does not own its content: through a
    /// reference or raw pointer, out of an index, or from a static.
    #[error("cannot move out of non-owned location")]
    MoveOutOfNonOwned,

    /// A second assignment to a binding not declared mutable.
    #[error("re-assignment of immutable binding")]
    ReassignImmutable {
        binding: BindingId,
        /// The assignment already seen on some path to this one.
        prior_element: ElementId,
    },

    /// An access incompatible with an outstanding loan.
    #[error("access conflicts with an outstanding loan")]
    LoanConflict {
        /// Index of the conflicting loan in the body's loan list.
        loan_index: usize,
        /// Root of the nearest common ancestor when the conflicting paths
        /// fork at sibling fields; attribution for the host.
        common_root: Option<BindingId>,
    },
}

/// One reported violation.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    /// The element the violation occurred at.
    pub element: ElementId,
    pub span: FileSpan,
    pub code: ErrorCode,
}

impl Diagnostic {
    #[must_use]
    pub fn new(element: ElementId, span: FileSpan, code: ErrorCode) -> Self {
        Self {
            element,
            span,
            code,
        }
    }
}

/// Receives diagnostics as the analysis finds them.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Summary of one body's analysis.
///
/// Everything else the checker builds (paths, loans, dataflow bitsets) is
/// discarded when the analysis returns.
#[derive(Debug, Default)]
pub struct BorrowCheckResult {
    /// Bindings whose `mut` declaration was exercised by a mutable borrow
    /// or a reassignment. Input to the host's unused-mut lint.
    pub used_mut: FxHashSet<BindingId>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BorrowCheckResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}
