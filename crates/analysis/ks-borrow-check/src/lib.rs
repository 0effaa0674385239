//! Borrow and move checking for Kestrel function bodies.
//!
//! Given a body's use events, control-flow graph, scope tree and type
//! facts, [`check_body`] decides whether the body satisfies the ownership,
//! borrowing and initialization rules and returns the violations as
//! structured diagnostics.
//!
//! # Architecture
//!
//! - [`LoanPath`]: symbolic places, the keys everything else is indexed by
//! - `gather`: first walk, records loans, moves and assignments
//! - [`MoveData`] / [`FlowedMoveData`]: the move/assignment dataflows
//! - `check_loans`: second walk, replays uses against dataflow results
//! - [`BorrowCheckResult`]: diagnostics plus the used-mut surface
//!
//! All state lives for one body's analysis; nothing is shared across
//! bodies, and separate bodies may be checked in parallel when the oracles
//! tolerate concurrent reads.

mod check_loans;
mod error;
mod gather;
mod loan_path;
mod move_data;


pub use error::{BorrowCheckResult, Diagnostic, DiagnosticSink, ErrorCode};
pub use loan_path::{LoanPath, LoanPathElem, LoanPathKind};
pub use move_data::{
    AssignDataflow, AssignDataflowOperator, Assignment, FlowedMoveData, Move, MoveData,
    MoveDataflow, MoveDataflowOperator, MoveIndex, MoveKind, MovePath, MovePathIndex,
};

use ks_cfg::Cfg;
use ks_dataflow::{BitwiseOperator, DataflowContext, DataflowOperator, KillFrom};
use ks_hir::{
    BindingId, BorrowKind, ElementId, FileSpan, LoanCause, Scope, ScopeTree, TypeOracle, UseWalker,
};
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A recorded borrow.
#[derive(Debug)]
pub struct Loan {
    /// Position in the body's loan list; also the loan's dataflow bit.
    pub index: usize,
    /// The borrowed place.
    pub loan_path: Rc<LoanPath>,
    pub kind: BorrowKind,
    /// The paths locked for the loan's duration: the borrowed path and the
    /// prefixes whose mutation would invalidate it.
    pub restricted_paths: Vec<Rc<LoanPath>>,
    /// Where the loan takes effect.
    pub gen_scope: Scope,
    /// Where the loan's restrictions lapse; contains `gen_scope` by
    /// construction.
    pub kill_scope: Scope,
    /// The borrow expression.
    pub element: ElementId,
    pub span: FileSpan,
    pub cause: LoanCause,
}

/// Dataflow operator for live loans.
#[derive(Clone, Copy, Debug)]
pub struct LoanDataflowOperator;

impl BitwiseOperator for LoanDataflowOperator {
    #[inline]
    fn join(&self, succ: usize, pred: usize) -> usize {
        succ | pred // loans from both predecessors are in scope
    }
}

impl DataflowOperator for LoanDataflowOperator {
    #[inline]
    fn initial_value() -> bool {
        false
    }
}

pub type LoanDataflow = DataflowContext<LoanDataflowOperator>;

/// Signals cancellation into a running analysis.
///
/// The driver polls between phases; a cancelled analysis returns
/// [`Cancelled`] with no partial result and no observable effect.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The analysis was cancelled between phases.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("borrow check cancelled")]
pub struct Cancelled;

/// Shared context for one body's analysis.
pub struct BorrowCtxt<'a> {
    pub types: &'a dyn TypeOracle,
    pub scopes: &'a dyn ScopeTree,
    /// Upper bound for loans of `'static` data; usually the item's extent.
    pub item_scope: Scope,
    sink: RefCell<&'a mut dyn DiagnosticSink>,
    used_mut: RefCell<FxHashSet<BindingId>>,
}

impl<'a> BorrowCtxt<'a> {
    #[must_use]
    pub fn new(
        types: &'a dyn TypeOracle,
        scopes: &'a dyn ScopeTree,
        item_scope: Scope,
        sink: &'a mut dyn DiagnosticSink,
    ) -> Self {
        Self {
            types,
            scopes,
            item_scope,
            sink: RefCell::new(sink),
            used_mut: RefCell::new(FxHashSet::default()),
        }
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        debug!(element = diagnostic.element.0, code = ?diagnostic.code, "diagnostic");
        self.sink.borrow_mut().report(diagnostic);
    }

    pub(crate) fn note_used_mut(&self, binding: BindingId) {
        self.used_mut.borrow_mut().insert(binding);
    }

    fn into_used_mut(self) -> FxHashSet<BindingId> {
        self.used_mut.into_inner()
    }
}

/// Checks one function body.
///
/// Phases: gather loans and moves from the walker; run the loan dataflow;
/// run the move and assignment dataflows; replay the walker against the
/// results. The token is polled between phases.
///
/// # Errors
///
/// Only [`Cancelled`]. User-code violations are diagnostics in the result,
/// never errors; the analysis keeps going so one pass reports everything.
pub fn check_body(
    types: &dyn TypeOracle,
    scopes: &dyn ScopeTree,
    walker: &dyn UseWalker,
    cfg: &Cfg,
    item_scope: Scope,
    cancel: &CancellationToken,
) -> Result<BorrowCheckResult, Cancelled> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    let used_mut = {
        let bccx = BorrowCtxt::new(types, scopes, item_scope, &mut diagnostics);

        let (all_loans, move_data) = gather::gather_loans_in_body(&bccx, walker);
        debug!(loans = all_loans.len(), "gather complete");
        cancel.check()?;

        let mut dfcx_loans =
            LoanDataflow::new("borrowck_loans", cfg, LoanDataflowOperator, all_loans.len());
        for loan in &all_loans {
            dfcx_loans.add_gen(loan.gen_scope.element(), loan.index);
            dfcx_loans.add_kill(KillFrom::ScopeEnd, loan.kill_scope.element(), loan.index);
        }
        dfcx_loans.add_kills_from_flow_exits(cfg);
        dfcx_loans.propagate(cfg);
        cancel.check()?;

        let flowed_moves = FlowedMoveData::new(move_data, scopes, cfg);
        cancel.check()?;

        check_loans::check_loans(&bccx, &dfcx_loans, &flowed_moves, &all_loans, walker);

        bccx.into_used_mut()
    };

    Ok(BorrowCheckResult {
        used_mut,
        diagnostics,
    })
}
