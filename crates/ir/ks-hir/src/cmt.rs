//! Categorized places.
//!
//! A [`Cmt`] is the oracle's structured answer to "what storage location
//! does this expression denote". The categorization mirrors the shape of
//! the place expression: autoderefs are explicit, an index is an interior
//! projection, an enum-variant narrowing is a downcast.

use crate::ids::{BindingId, ElementId};
use crate::intern::Symbol;
use crate::region::Region;
use crate::span::FileSpan;
use crate::ty::{Mutability, Ty};
use std::rc::Rc;

/// The kind of pointer a dereference goes through.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum PointerKind {
    /// An owned box; dereferencing stays within the owner.
    Unique,
    /// A reference with its region.
    Ref { mutbl: Mutability, region: Region },
    /// A raw pointer; the checker does not constrain accesses through it.
    Raw(Mutability),
}

/// The kind of an interior projection.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum InteriorKind {
    /// A named field access.
    Field(Symbol),
    /// An index into an array or slice. Indices are not tracked, so paths
    /// through an index never denote a unique location.
    Index,
    /// A position inside a pattern.
    Pattern,
}

/// How a place came to be mutable (or not).
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum MutabilityCategory {
    /// Immutable by declaration or by context.
    Immutable,
    /// Directly declared mutable (`let mut x`, `&mut`).
    Declared,
    /// Mutable because the enclosing place is; a field of a `let mut`.
    Inherited,
}

impl MutabilityCategory {
    #[must_use]
    pub fn is_mutable(self) -> bool {
        matches!(self, Self::Declared | Self::Inherited)
    }
}

/// Why a place is reachable through more than one name.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AliasableReason {
    /// Lives in an immutable static.
    Static,
    /// Lives in a `static mut`; aliasing is `unsafe`'s problem.
    StaticMut,
    /// Reached through a shared reference.
    Borrowed,
}

/// Whether a place can be reached by more than one name.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Aliasability {
    NonAliasable,
    FreelyAliasable(AliasableReason),
}

/// Classification of the storage an expression denotes.
#[derive(Clone, Debug, PartialEq)]
pub enum Categorization {
    /// A temporary, live for the given region.
    Rvalue(Region),
    /// A static item.
    StaticItem,
    /// A local binding.
    Local(BindingId),
    /// A variable captured by a closure. Reserved: the current walker never
    /// produces it.
    Upvar(BindingId),
    /// A dereference of the base place.
    Deref(Cmt, PointerKind),
    /// A field, index or pattern position inside the base place.
    Interior(Cmt, InteriorKind),
    /// The base place narrowed to one enum variant.
    Downcast(Cmt, Symbol),
}

/// A categorized place expression.
#[derive(Clone, Debug, PartialEq)]
pub struct CmtData {
    /// The expression that was categorized.
    pub element: ElementId,
    pub span: FileSpan,
    pub cat: Categorization,
    /// Mutability of the place as an lvalue.
    pub mutbl: MutabilityCategory,
    /// Type of the value stored at the place.
    pub ty: Ty,
}

pub type Cmt = Rc<CmtData>;

impl CmtData {
    #[must_use]
    pub fn new(
        element: ElementId,
        span: FileSpan,
        cat: Categorization,
        mutbl: MutabilityCategory,
        ty: Ty,
    ) -> Cmt {
        Rc::new(CmtData {
            element,
            span,
            cat,
            mutbl,
            ty,
        })
    }

    /// Whether the place is reachable through more than one name.
    ///
    /// Interior projections, downcasts, box derefs and mutable-reference
    /// derefs inherit the answer from their base: they stay unique exactly
    /// when the base is. Shared-reference derefs are freely aliasable by
    /// construction, and raw pointers are left to `unsafe`.
    #[must_use]
    pub fn freely_aliasable(&self) -> Aliasability {
        match &self.cat {
            Categorization::Rvalue(..)
            | Categorization::Local(..)
            | Categorization::Upvar(..) => Aliasability::NonAliasable,

            Categorization::StaticItem => {
                if self.mutbl.is_mutable() {
                    Aliasability::FreelyAliasable(AliasableReason::StaticMut)
                } else {
                    Aliasability::FreelyAliasable(AliasableReason::Static)
                }
            }

            Categorization::Deref(_, PointerKind::Raw(..)) => Aliasability::NonAliasable,

            Categorization::Deref(
                _,
                PointerKind::Ref {
                    mutbl: Mutability::Not,
                    ..
                },
            ) => Aliasability::FreelyAliasable(AliasableReason::Borrowed),

            Categorization::Deref(base, _)
            | Categorization::Interior(base, _)
            | Categorization::Downcast(base, _) => base.freely_aliasable(),
        }
    }
}

/// The memory-categorization oracle.
///
/// The walker categorizes expressions before handing them to the checker;
/// the checker itself only ever sees [`Cmt`]s.
pub trait MemoryCategorization {
    fn categorize(&self, expr: ElementId) -> Option<Cmt>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{Region, Scope};
    use crate::ids::ElementId;

    fn cmt(cat: Categorization, mutbl: MutabilityCategory) -> Cmt {
        CmtData::new(ElementId(0), FileSpan::dummy(), cat, mutbl, Ty::Int)
    }

    #[test]
    fn test_local_is_non_aliasable() {
        let c = cmt(Categorization::Local(BindingId(0)), MutabilityCategory::Declared);
        assert_eq!(c.freely_aliasable(), Aliasability::NonAliasable);
    }

    #[test]
    fn test_shared_deref_is_aliasable() {
        let base = cmt(Categorization::Local(BindingId(0)), MutabilityCategory::Immutable);
        let deref = cmt(
            Categorization::Deref(
                base,
                PointerKind::Ref {
                    mutbl: Mutability::Not,
                    region: Region::Scope(Scope(ElementId(1))),
                },
            ),
            MutabilityCategory::Immutable,
        );
        assert_eq!(
            deref.freely_aliasable(),
            Aliasability::FreelyAliasable(AliasableReason::Borrowed)
        );
    }

    #[test]
    fn test_field_inherits_from_shared_deref() {
        let base = cmt(Categorization::Local(BindingId(0)), MutabilityCategory::Immutable);
        let deref = cmt(
            Categorization::Deref(
                base,
                PointerKind::Ref {
                    mutbl: Mutability::Not,
                    region: Region::Static,
                },
            ),
            MutabilityCategory::Immutable,
        );
        let field = cmt(
            Categorization::Interior(deref, InteriorKind::Index),
            MutabilityCategory::Immutable,
        );
        assert_eq!(
            field.freely_aliasable(),
            Aliasability::FreelyAliasable(AliasableReason::Borrowed)
        );
    }

    #[test]
    fn test_static_mut() {
        let c = cmt(Categorization::StaticItem, MutabilityCategory::Declared);
        assert_eq!(
            c.freely_aliasable(),
            Aliasability::FreelyAliasable(AliasableReason::StaticMut)
        );
    }
}
