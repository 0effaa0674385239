//! The expression-use walker contract.
//!
//! An external walker visits a function body in evaluation order and tells
//! the delegate how each place is used: consumed, borrowed, mutated,
//! matched or declared without an initializer. The borrow checker is run as
//! a delegate twice per body, once to gather loans and moves and once to
//! replay uses against the dataflow results, so a walker must be repeatable.

use crate::cmt::Cmt;
use crate::ids::{BindingId, ElementId};
use crate::region::Region;

/// Why a consumed value moved instead of copying.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MoveReason {
    /// The type is not copyable, so a use is a move.
    DirectRefMove,
    /// A by-value pattern binding.
    PatBindingMove,
    /// Moved into a closure environment.
    CaptureMove,
}

/// How a consume event transfers the value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConsumeMode {
    /// The value is copied; the source remains initialized.
    Copy,
    /// Ownership transfers; the source becomes uninitialized.
    Move(MoveReason),
}

/// How a pattern interacts with the matched place.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MatchMode {
    NonBinding,
    BorrowingMatch,
    CopyingMatch,
    MovingMatch,
}

/// The flavor of a write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MutateMode {
    /// First initialization of the place.
    Init,
    /// Plain overwrite, `x = v`.
    JustWrite,
    /// Compound assignment, `x += v`; reads before writing.
    WriteAndRead,
}

/// The strength of a borrow.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BorrowKind {
    /// `&place`; coexists with other shared borrows.
    Shared,
    /// Unique immutable access, as required by some closures.
    Unique,
    /// `&mut place`; excludes every other access.
    Mutable,
}

impl BorrowKind {
    #[must_use]
    pub fn is_mutable(self) -> bool {
        matches!(self, Self::Mutable)
    }
}

/// What triggered a borrow.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoanCause {
    AddrOf,
    AutoRef,
    RefBinding,
    OverloadedOperator,
    ClosureCapture,
    ClosureInvocation,
    ForLoop,
    MatchDiscriminant,
}

/// Receiver of use events, in evaluation order.
pub trait UseDelegate {
    /// A value is consumed by an expression.
    fn consume(&mut self, element: ElementId, cmt: &Cmt, mode: ConsumeMode);

    /// A value is consumed by a by-value pattern binding.
    fn consume_pat(&mut self, pat: ElementId, cmt: &Cmt, mode: ConsumeMode);

    /// A pattern matched against a place. Informational.
    fn matched_pat(&mut self, pat: ElementId, cmt: &Cmt, mode: MatchMode);

    /// A borrow of `cmt` for the duration of `loan_region`.
    fn borrow(
        &mut self,
        element: ElementId,
        cmt: &Cmt,
        loan_region: Region,
        kind: BorrowKind,
        cause: LoanCause,
    );

    /// A write to `assignee_cmt`.
    fn mutate(&mut self, element: ElementId, assignee_cmt: &Cmt, mode: MutateMode);

    /// A binding declared with no initializer; it starts out moved.
    fn decl_without_init(&mut self, binding: BindingId, element: ElementId);
}

/// A walker over one function body.
pub trait UseWalker {
    fn walk(&self, delegate: &mut dyn UseDelegate);
}

/// One recorded walker event.
#[derive(Clone, Debug)]
pub enum UseEvent {
    Consume {
        element: ElementId,
        cmt: Cmt,
        mode: ConsumeMode,
    },
    ConsumePat {
        pat: ElementId,
        cmt: Cmt,
        mode: ConsumeMode,
    },
    MatchedPat {
        pat: ElementId,
        cmt: Cmt,
        mode: MatchMode,
    },
    Borrow {
        element: ElementId,
        cmt: Cmt,
        region: Region,
        kind: BorrowKind,
        cause: LoanCause,
    },
    Mutate {
        element: ElementId,
        cmt: Cmt,
        mode: MutateMode,
    },
    DeclWithoutInit {
        binding: BindingId,
        element: ElementId,
    },
}

/// A replayable event sequence.
///
/// Hosts that walk a syntax tree implement [`UseWalker`] directly; the log
/// exists for the driver's second pass and for tests, which script bodies
/// as event sequences.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Vec<UseEvent>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: UseEvent) {
        self.events.push(event);
    }

    pub fn consume(&mut self, element: ElementId, cmt: Cmt, mode: ConsumeMode) {
        self.push(UseEvent::Consume { element, cmt, mode });
    }

    pub fn consume_pat(&mut self, pat: ElementId, cmt: Cmt, mode: ConsumeMode) {
        self.push(UseEvent::ConsumePat { pat, cmt, mode });
    }

    pub fn matched_pat(&mut self, pat: ElementId, cmt: Cmt, mode: MatchMode) {
        self.push(UseEvent::MatchedPat { pat, cmt, mode });
    }

    pub fn borrow(
        &mut self,
        element: ElementId,
        cmt: Cmt,
        region: Region,
        kind: BorrowKind,
        cause: LoanCause,
    ) {
        self.push(UseEvent::Borrow {
            element,
            cmt,
            region,
            kind,
            cause,
        });
    }

    pub fn mutate(&mut self, element: ElementId, cmt: Cmt, mode: MutateMode) {
        self.push(UseEvent::Mutate { element, cmt, mode });
    }

    pub fn decl_without_init(&mut self, binding: BindingId, element: ElementId) {
        self.push(UseEvent::DeclWithoutInit { binding, element });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

impl UseWalker for EventLog {
    fn walk(&self, delegate: &mut dyn UseDelegate) {
        for event in &self.events {
            match event {
                UseEvent::Consume { element, cmt, mode } => {
                    delegate.consume(*element, cmt, *mode);
                }
                UseEvent::ConsumePat { pat, cmt, mode } => {
                    delegate.consume_pat(*pat, cmt, *mode);
                }
                UseEvent::MatchedPat { pat, cmt, mode } => {
                    delegate.matched_pat(*pat, cmt, *mode);
                }
                UseEvent::Borrow {
                    element,
                    cmt,
                    region,
                    kind,
                    cause,
                } => {
                    delegate.borrow(*element, cmt, *region, *kind, *cause);
                }
                UseEvent::Mutate { element, cmt, mode } => {
                    delegate.mutate(*element, cmt, *mode);
                }
                UseEvent::DeclWithoutInit { binding, element } => {
                    delegate.decl_without_init(*binding, *element);
                }
            }
        }
    }
}
