//! Body-facing data model for the Kestrel borrow checker.
//!
//! The borrow checker analyzes one function body at a time. Everything it
//! knows about that body arrives through the interfaces defined here:
//!
//! - [`TypeOracle`]: types of elements and declared mutability of bindings
//! - [`ScopeTree`]: the lexical scope tree and region containment
//! - [`MemoryCategorization`]: the categorized-place view of expressions
//! - [`UseWalker`]: drives [`UseDelegate`] events in evaluation order
//!
//! The front end, type inference and categorization live elsewhere in the
//! compiler; this crate only fixes the data contracts between them and the
//! analysis.

pub mod cmt;
pub mod ids;
pub mod intern;
pub mod region;
pub mod span;
pub mod ty;
pub mod walk;

pub use cmt::{
    Aliasability, AliasableReason, Categorization, Cmt, CmtData, InteriorKind,
    MemoryCategorization, MutabilityCategory, PointerKind,
};
pub use ids::{BindingId, ElementId};
pub use intern::{Interner, Symbol};
pub use region::{FreeRegion, FreeRegionMap, Region, Scope, ScopeMap, ScopeTree};
pub use span::{FileId, FileSpan, Span};
pub use ty::{AdtDef, AdtKind, FieldDef, Mutability, Ty, TypeOracle, VariantDef};
pub use walk::{
    BorrowKind, ConsumeMode, EventLog, LoanCause, MatchMode, MoveReason, MutateMode, UseDelegate,
    UseEvent, UseWalker,
};
