//! Loan paths: the symbolic normal form of places.
//!
//! A loan path abstracts an lvalue expression into a term the analysis can
//! compare structurally and key maps with: `x`, `x.f`, `(*p).g`,
//! `(e as Variant).0`. Two paths are equal exactly when their terms are,
//! independent of the types they carry.

use ks_hir::{
    BindingId, Categorization, Cmt, InteriorKind, MutabilityCategory, PointerKind, Scope,
    ScopeTree, Symbol, Ty,
};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// One projection step of a loan path.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum LoanPathElem {
    /// `*base` through the given pointer kind.
    Deref(PointerKind),
    /// A field, index or pattern position. The variant is present when the
    /// immediate base was narrowed by a downcast.
    Interior(Option<Symbol>, InteriorKind),
}

/// The term structure of a loan path.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum LoanPathKind {
    /// A local binding.
    Var(BindingId),
    /// A closure-captured binding. Reserved; the walker never produces it
    /// until closure capture is modeled.
    Upvar(BindingId),
    /// The base narrowed to one enum variant.
    Downcast(Rc<LoanPath>, Symbol),
    /// The base extended by one projection.
    Extend(Rc<LoanPath>, MutabilityCategory, LoanPathElem),
}

/// A loan path with the type of the place it denotes.
#[derive(Clone, Debug)]
pub struct LoanPath {
    pub kind: LoanPathKind,
    pub ty: Ty,
}

// Equality and hashing are structural on the term alone. Union-field
// broadcast synthesizes sibling paths whose types differ from any path the
// walker produced for the same term; those must still collide in maps.
impl PartialEq for LoanPath {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for LoanPath {}

impl Hash for LoanPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl LoanPath {
    #[must_use]
    pub fn new(kind: LoanPathKind, ty: Ty) -> Self {
        Self { kind, ty }
    }

    /// The loan path a categorized place denotes, if it denotes one.
    ///
    /// Rvalues and statics have no path; neither does anything reached
    /// through a base without one.
    #[must_use]
    pub fn compute_for(cmt: &Cmt) -> Option<Rc<LoanPath>> {
        match &cmt.cat {
            Categorization::Rvalue(..) | Categorization::StaticItem => None,

            Categorization::Local(binding) => Some(Rc::new(LoanPath::new(
                LoanPathKind::Var(*binding),
                cmt.ty.clone(),
            ))),

            Categorization::Upvar(binding) => Some(Rc::new(LoanPath::new(
                LoanPathKind::Upvar(*binding),
                cmt.ty.clone(),
            ))),

            Categorization::Deref(base, pointer_kind) => Self::compute_for(base).map(|lp| {
                Rc::new(LoanPath::new(
                    LoanPathKind::Extend(lp, cmt.mutbl, LoanPathElem::Deref(*pointer_kind)),
                    cmt.ty.clone(),
                ))
            }),

            Categorization::Interior(base, interior) => {
                let variant = match &base.cat {
                    Categorization::Downcast(_, variant) => Some(*variant),
                    _ => None,
                };
                Self::compute_for(base).map(|lp| {
                    Rc::new(LoanPath::new(
                        LoanPathKind::Extend(
                            lp,
                            cmt.mutbl,
                            LoanPathElem::Interior(variant, *interior),
                        ),
                        cmt.ty.clone(),
                    ))
                })
            }

            Categorization::Downcast(base, variant) => Self::compute_for(base).map(|lp| {
                Rc::new(LoanPath::new(
                    LoanPathKind::Downcast(lp, *variant),
                    cmt.ty.clone(),
                ))
            }),
        }
    }

    /// The binding the path roots in.
    #[must_use]
    pub fn root_binding(&self) -> BindingId {
        match &self.kind {
            LoanPathKind::Var(binding) | LoanPathKind::Upvar(binding) => *binding,
            LoanPathKind::Downcast(base, _) | LoanPathKind::Extend(base, ..) => {
                base.root_binding()
            }
        }
    }

    /// The scope at which restrictions rooted in this path die.
    ///
    /// Transparent through downcasts and projections: the root binding's
    /// extent. Upvar extents await closure-capture modeling; the captured
    /// binding's extent stands in.
    #[must_use]
    pub fn kill_scope(&self, scopes: &dyn ScopeTree) -> Scope {
        scopes.variable_scope(self.root_binding())
    }

    /// Whether the path refers to one statically-known location.
    ///
    /// Any interior projection defeats precision: the checker does not
    /// track which index or position is meant, so a kill applied there
    /// could erase facts about a sibling location.
    #[must_use]
    pub fn is_precise(&self) -> bool {
        match &self.kind {
            LoanPathKind::Var(_) | LoanPathKind::Upvar(_) => true,
            LoanPathKind::Extend(_, _, LoanPathElem::Interior(..)) => false,
            LoanPathKind::Extend(base, _, LoanPathElem::Deref(_))
            | LoanPathKind::Downcast(base, _) => base.is_precise(),
        }
    }

    /// Whether the path steps inside an aggregate at least once.
    #[must_use]
    pub fn is_field(&self) -> bool {
        match &self.kind {
            LoanPathKind::Var(_) | LoanPathKind::Upvar(_) => false,
            LoanPathKind::Extend(_, _, LoanPathElem::Interior(..)) => true,
            LoanPathKind::Extend(base, _, LoanPathElem::Deref(_))
            | LoanPathKind::Downcast(base, _) => base.is_field(),
        }
    }

    /// Interior projections between the root and this node, ignoring
    /// derefs. Used to align paths when computing common ancestors.
    fn depth(&self) -> usize {
        match &self.kind {
            LoanPathKind::Extend(base, _, LoanPathElem::Deref(_)) => base.depth(),
            LoanPathKind::Extend(base, _, LoanPathElem::Interior(..)) => base.depth() + 1,
            _ => 0,
        }
    }

    /// Whether `self` and `other` diverge at some interior projection.
    ///
    /// Forked paths denote provably disjoint sibling locations; a move or
    /// loan of one cannot conflict with a use of the other.
    #[must_use]
    pub fn has_fork(&self, other: &LoanPath) -> bool {
        match (&self.kind, &other.kind) {
            (
                LoanPathKind::Extend(base1, _, LoanPathElem::Interior(variant1, interior1)),
                LoanPathKind::Extend(base2, _, LoanPathElem::Interior(variant2, interior2)),
            ) => {
                if variant1 == variant2 && interior1 == interior2 {
                    base1.has_fork(base2)
                } else {
                    true
                }
            }
            (LoanPathKind::Extend(base, _, LoanPathElem::Deref(_)), _) => base.has_fork(other),
            (_, LoanPathKind::Extend(base, _, LoanPathElem::Deref(_))) => self.has_fork(base),
            _ => false,
        }
    }

    /// The nearest common ancestor of two paths, when they share a root.
    #[must_use]
    pub fn common(&self, other: &LoanPath) -> Option<LoanPath> {
        match (&self.kind, &other.kind) {
            (
                LoanPathKind::Extend(base1, mutbl, LoanPathElem::Interior(variant1, interior1)),
                LoanPathKind::Extend(base2, _, LoanPathElem::Interior(variant2, interior2)),
            ) => {
                if variant1 == variant2 && interior1 == interior2 {
                    base1.common(base2).map(|ancestor| {
                        let depth = ancestor.depth();
                        if base1.depth() == depth && base2.depth() == depth {
                            LoanPath::new(
                                LoanPathKind::Extend(
                                    Rc::new(ancestor),
                                    *mutbl,
                                    LoanPathElem::Interior(*variant1, *interior1),
                                ),
                                self.ty.clone(),
                            )
                        } else {
                            ancestor
                        }
                    })
                } else {
                    base1.common(base2)
                }
            }
            (LoanPathKind::Extend(base, _, LoanPathElem::Deref(_)), _) => base.common(other),
            (_, LoanPathKind::Extend(base, _, LoanPathElem::Deref(_))) => self.common(base),
            (LoanPathKind::Var(a), LoanPathKind::Var(b)) if a == b => Some(self.clone()),
            (LoanPathKind::Upvar(a), LoanPathKind::Upvar(b)) if a == b => Some(self.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ks_hir::{ElementId, FileSpan, Interner, Region};

    fn var(binding: u32) -> Rc<LoanPath> {
        Rc::new(LoanPath::new(LoanPathKind::Var(BindingId(binding)), Ty::Int))
    }

    fn field(base: &Rc<LoanPath>, name: Symbol) -> Rc<LoanPath> {
        Rc::new(LoanPath::new(
            LoanPathKind::Extend(
                base.clone(),
                MutabilityCategory::Inherited,
                LoanPathElem::Interior(None, InteriorKind::Field(name)),
            ),
            Ty::Int,
        ))
    }

    fn deref(base: &Rc<LoanPath>) -> Rc<LoanPath> {
        Rc::new(LoanPath::new(
            LoanPathKind::Extend(
                base.clone(),
                MutabilityCategory::Declared,
                LoanPathElem::Deref(PointerKind::Unique),
            ),
            Ty::Int,
        ))
    }

    #[test]
    fn test_equality_ignores_types() {
        let a = LoanPath::new(LoanPathKind::Var(BindingId(1)), Ty::Int);
        let b = LoanPath::new(LoanPathKind::Var(BindingId(1)), Ty::Error);
        assert_eq!(a, b);
    }

    #[test]
    fn test_compute_for_is_deterministic() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let local = ks_hir::CmtData::new(
            ElementId(1),
            FileSpan::dummy(),
            Categorization::Local(BindingId(0)),
            MutabilityCategory::Declared,
            Ty::Int,
        );
        let cmt = ks_hir::CmtData::new(
            ElementId(2),
            FileSpan::dummy(),
            Categorization::Interior(local, InteriorKind::Field(f)),
            MutabilityCategory::Inherited,
            Ty::Int,
        );
        let once = LoanPath::compute_for(&cmt);
        let twice = LoanPath::compute_for(&cmt);
        assert_eq!(once, twice);
        assert!(once.is_some());
    }

    #[test]
    fn test_rvalue_has_no_path() {
        let cmt = ks_hir::CmtData::new(
            ElementId(1),
            FileSpan::dummy(),
            Categorization::Rvalue(Region::Static),
            MutabilityCategory::Immutable,
            Ty::Int,
        );
        assert!(LoanPath::compute_for(&cmt).is_none());
    }

    #[test]
    fn test_interior_defeats_precision() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let base = var(0);
        assert!(base.is_precise());
        assert!(!base.is_field());

        let projected = field(&base, f);
        assert!(!projected.is_precise());
        assert!(projected.is_field());

        let through_box = deref(&base);
        assert!(through_box.is_precise());
        assert!(!through_box.is_field());
    }

    #[test]
    fn test_sibling_fields_fork() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let g = interner.intern("g");
        let base = var(0);
        let lhs = field(&base, f);
        let rhs = field(&base, g);
        assert!(lhs.has_fork(&rhs));
        assert!(!lhs.has_fork(&lhs.clone()));

        // A deref between root and field is transparent to forking.
        let lhs_through_box = field(&deref(&base), f);
        let rhs_through_box = field(&deref(&base), g);
        assert!(lhs_through_box.has_fork(&rhs_through_box));
    }

    #[test]
    fn test_common_of_forked_siblings_is_base() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let g = interner.intern("g");
        let base = var(3);
        let lhs = field(&base, f);
        let rhs = field(&base, g);
        let common = lhs.common(&rhs).expect("shared root");
        assert_eq!(common, *base);
        assert_eq!(common.root_binding(), BindingId(3));
    }

    #[test]
    fn test_common_of_distinct_roots_is_none() {
        assert!(var(0).common(&var(1)).is_none());
    }

    #[test]
    fn test_root_binding_through_projections() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let lp = field(&deref(&var(7)), f);
        assert_eq!(lp.root_binding(), BindingId(7));
    }
}
