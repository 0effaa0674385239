//! Regions and the lexical scope tree.
//!
//! A [`Region`] is the static approximation of a runtime lifetime. The
//! checker never infers regions; it only asks containment questions of the
//! [`ScopeTree`] the front end provides.

use crate::ids::{BindingId, ElementId};
use crate::intern::Symbol;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// A lexical scope, named by the element that delimits it.
///
/// Every element delimits its own extent; the scope tree relates extents to
/// their enclosing blocks. Loan gen/kill sites are expressed as the
/// delimiting element of a scope.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Scope(pub ElementId);

impl Scope {
    #[must_use]
    pub fn element(self) -> ElementId {
        self.0
    }
}

/// A region parameter bound on the enclosing item, like `'a` on a function.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct FreeRegion {
    /// The item the parameter is bound on.
    pub item: ElementId,
    /// Name of the parameter as written, if it has one.
    pub name: Option<Symbol>,
}

/// Static approximation of a lifetime.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum Region {
    /// The whole-program region of statics.
    Static,
    /// The extent of one lexical scope.
    Scope(Scope),
    /// An early-bound item parameter, resolved by its index.
    EarlyBound { index: u32, name: Symbol },
    /// A late-bound (free) item parameter.
    Free(FreeRegion),
}

impl Region {
    #[must_use]
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static)
    }
}

/// Known outlives facts between free regions.
///
/// The driver currently constructs this empty; containment between distinct
/// free regions then degrades to scope comparison, which is exact within a
/// single item.
#[derive(Debug, Default)]
pub struct FreeRegionMap {
    relation: FxHashSet<(FreeRegion, FreeRegion)>,
}

impl FreeRegionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `sub` is outlived by `sup`.
    pub fn relate(&mut self, sub: FreeRegion, sup: FreeRegion) {
        self.relation.insert((sub, sup));
    }

    #[must_use]
    pub fn is_free_sub_region(&self, sub: FreeRegion, sup: FreeRegion) -> bool {
        sub == sup || self.relation.contains(&(sub, sup))
    }
}

/// The lexical scope tree of a function body.
///
/// Provided by the front end; consulted for variable extents and for the
/// sub-scope and sub-region tests that drive loan kill scopes and the
/// lifetime guarantee.
pub trait ScopeTree {
    /// The scope a binding's value lives for.
    fn variable_scope(&self, binding: BindingId) -> Scope;

    /// Whether `sub` is contained in (or equal to) `sup`.
    fn is_subscope_of(&self, sub: Scope, sup: Scope) -> bool;

    /// The scope an early-bound item parameter maps to.
    fn early_free_scope(&self, index: u32) -> Scope;

    /// The scope a free region maps to.
    fn free_scope(&self, region: FreeRegion) -> Scope;

    /// Outlives between two free regions beyond scope containment.
    fn free_sub_region(&self, sub: FreeRegion, sup: FreeRegion) -> bool {
        sub == sup
    }

    /// The scope a region denotes, for containment purposes.
    fn region_scope(&self, region: Region) -> Option<Scope> {
        match region {
            Region::Static => None,
            Region::Scope(scope) => Some(scope),
            Region::EarlyBound { index, .. } => Some(self.early_free_scope(index)),
            Region::Free(fr) => Some(self.free_scope(fr)),
        }
    }

    /// Whether `sub` is contained in `sup`.
    fn is_subregion_of(&self, sub: Region, sup: Region) -> bool {
        match (sub, sup) {
            (_, Region::Static) => true,
            (Region::Static, _) => false,
            (Region::Free(a), Region::Free(b)) if self.free_sub_region(a, b) => true,
            (sub, sup) => match (self.region_scope(sub), self.region_scope(sup)) {
                (Some(a), Some(b)) => self.is_subscope_of(a, b),
                _ => false,
            },
        }
    }
}

/// Table-backed [`ScopeTree`].
///
/// The compiler proper derives this from its region resolution pass; tests
/// record the handful of facts a body needs.
#[derive(Debug, Default)]
pub struct ScopeMap {
    parents: FxHashMap<Scope, Scope>,
    variable_scopes: FxHashMap<BindingId, Scope>,
    early_scopes: FxHashMap<u32, Scope>,
    free_scopes: FxHashMap<FreeRegion, Scope>,
    free_regions: FreeRegionMap,
}

impl ScopeMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_parent(&mut self, child: Scope, parent: Scope) {
        self.parents.insert(child, parent);
    }

    pub fn record_variable_scope(&mut self, binding: BindingId, scope: Scope) {
        self.variable_scopes.insert(binding, scope);
    }

    pub fn record_early_free_scope(&mut self, index: u32, scope: Scope) {
        self.early_scopes.insert(index, scope);
    }

    pub fn record_free_scope(&mut self, region: FreeRegion, scope: Scope) {
        self.free_scopes.insert(region, scope);
    }

    pub fn free_regions_mut(&mut self) -> &mut FreeRegionMap {
        &mut self.free_regions
    }
}

impl ScopeTree for ScopeMap {
    fn variable_scope(&self, binding: BindingId) -> Scope {
        self.variable_scopes
            .get(&binding)
            .copied()
            .unwrap_or(Scope(ElementId(binding.0)))
    }

    fn is_subscope_of(&self, sub: Scope, sup: Scope) -> bool {
        let mut cursor = sub;
        loop {
            if cursor == sup {
                return true;
            }
            match self.parents.get(&cursor) {
                Some(&parent) => cursor = parent,
                None => return false,
            }
        }
    }

    fn early_free_scope(&self, index: u32) -> Scope {
        self.early_scopes
            .get(&index)
            .copied()
            .unwrap_or(Scope(ElementId(u32::MAX)))
    }

    fn free_scope(&self, region: FreeRegion) -> Scope {
        self.free_scopes
            .get(&region)
            .copied()
            .unwrap_or(Scope(region.item))
    }

    fn free_sub_region(&self, sub: FreeRegion, sup: FreeRegion) -> bool {
        self.free_regions.is_free_sub_region(sub, sup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(n: u32) -> Scope {
        Scope(ElementId(n))
    }

    #[test]
    fn test_subscope_walks_parents() {
        let mut map = ScopeMap::new();
        map.record_parent(scope(3), scope(2));
        map.record_parent(scope(2), scope(1));

        assert!(map.is_subscope_of(scope(3), scope(1)));
        assert!(map.is_subscope_of(scope(2), scope(2)));
        assert!(!map.is_subscope_of(scope(1), scope(3)));
    }

    #[test]
    fn test_static_contains_everything() {
        let map = ScopeMap::new();
        assert!(map.is_subregion_of(Region::Scope(scope(5)), Region::Static));
        assert!(!map.is_subregion_of(Region::Static, Region::Scope(scope(5))));
    }

    #[test]
    fn test_free_region_relation() {
        let mut map = ScopeMap::new();
        let a = FreeRegion {
            item: ElementId(0),
            name: None,
        };
        let b = FreeRegion {
            item: ElementId(1),
            name: None,
        };
        assert!(!map.free_sub_region(a, b));
        map.free_regions_mut().relate(a, b);
        assert!(map.free_sub_region(a, b));
        assert!(map.is_subregion_of(Region::Free(a), Region::Free(b)));
    }
}
