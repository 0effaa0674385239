//! The slice of the type system the borrow checker consults.
//!
//! Types here are a projection of the real type system: enough structure to
//! answer the questions the analysis asks (is this an owned box, a
//! reference and with which region, a union, which sibling fields exist),
//! nothing more.

use crate::ids::{BindingId, ElementId};
use crate::intern::Symbol;
use crate::region::Region;
use std::sync::Arc;

/// Declared mutability of a binding or pointee.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum Mutability {
    Not,
    Mut,
}

impl Mutability {
    #[must_use]
    pub fn is_mutable(self) -> bool {
        matches!(self, Self::Mut)
    }
}

/// A named field of a struct, union or enum variant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldDef {
    pub name: Symbol,
    pub ty: Ty,
}

/// One variant of an algebraic data type.
///
/// Structs and unions have exactly one variant carrying their fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VariantDef {
    pub name: Symbol,
    pub fields: Vec<FieldDef>,
}

/// The flavor of an algebraic data type.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdtKind {
    Struct,
    Union,
    Enum,
}

/// An algebraic data type definition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdtDef {
    pub name: Symbol,
    pub kind: AdtKind,
    pub variants: Vec<VariantDef>,
}

impl AdtDef {
    #[must_use]
    pub fn is_union(&self) -> bool {
        matches!(self.kind, AdtKind::Union)
    }

    /// The fields of a struct or union. Empty for enums, which carry their
    /// fields per variant.
    #[must_use]
    pub fn named_fields(&self) -> &[FieldDef] {
        match self.kind {
            AdtKind::Struct | AdtKind::Union => {
                self.variants.first().map(|v| v.fields.as_slice()).unwrap_or(&[])
            }
            AdtKind::Enum => &[],
        }
    }

    #[must_use]
    pub fn variant(&self, name: Symbol) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }
}

/// A type, as seen by the borrow checker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Ty {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    /// A type the checker has no structural knowledge of.
    Named(Symbol),
    Adt(Arc<AdtDef>),
    Array {
        element: Box<Ty>,
        len: usize,
    },
    Slice {
        element: Box<Ty>,
    },
    Tuple(Vec<Ty>),
    Ref {
        mutbl: Mutability,
        region: Region,
        pointee: Box<Ty>,
    },
    RawPtr {
        mutbl: Mutability,
        pointee: Box<Ty>,
    },
    /// An owned box; the unique pointer of the language.
    Boxed(Box<Ty>),
    /// Error-recovery sentinel; compares equal only to itself.
    Error,
}

impl Ty {
    /// The ADT definition behind this type, if it is one.
    #[must_use]
    pub fn adt_def(&self) -> Option<&Arc<AdtDef>> {
        match self {
            Ty::Adt(def) => Some(def),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_union(&self) -> bool {
        self.adt_def().is_some_and(|def| def.is_union())
    }
}

/// Type information supplied by the host compiler.
pub trait TypeOracle {
    /// The type of a syntactic element, if the element has one.
    fn type_of(&self, element: ElementId) -> Option<Ty>;

    /// The declared mutability of a binding (`let x` vs `let mut x`).
    fn mutability_of(&self, binding: BindingId) -> Mutability;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    fn union_def(interner: &mut Interner) -> Arc<AdtDef> {
        let u = interner.intern("U");
        let a = interner.intern("a");
        let b = interner.intern("b");
        Arc::new(AdtDef {
            name: u,
            kind: AdtKind::Union,
            variants: vec![VariantDef {
                name: u,
                fields: vec![
                    FieldDef { name: a, ty: Ty::Int },
                    FieldDef { name: b, ty: Ty::Float },
                ],
            }],
        })
    }

    #[test]
    fn test_union_fields() {
        let mut interner = Interner::new();
        let def = union_def(&mut interner);
        assert!(def.is_union());
        assert_eq!(def.named_fields().len(), 2);
        assert!(Ty::Adt(def).is_union());
    }

    #[test]
    fn test_enum_has_no_flat_fields() {
        let mut interner = Interner::new();
        let def = AdtDef {
            name: interner.intern("E"),
            kind: AdtKind::Enum,
            variants: vec![VariantDef {
                name: interner.intern("A"),
                fields: vec![],
            }],
        };
        assert!(def.named_fields().is_empty());
    }
}
