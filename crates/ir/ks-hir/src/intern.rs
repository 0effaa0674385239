//! String interning for field, variant and type names.

pub use lasso::Spur as Symbol;

use lasso::Rodeo;

/// String interner handing out [`Symbol`]s.
///
/// Analysis state is local to one function body and never crosses threads,
/// so the interner is single-threaded.
pub struct Interner {
    rodeo: Rodeo,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rodeo: Rodeo::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        self.rodeo.get_or_intern(s)
    }

    /// Looks up a previously interned string without interning it.
    #[must_use]
    pub fn get(&self, s: &str) -> Option<Symbol> {
        self.rodeo.get(s)
    }

    #[must_use]
    pub fn resolve(&self, sym: Symbol) -> &str {
        self.rodeo.resolve(&sym)
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_round_trip() {
        let mut interner = Interner::new();
        let counter = interner.intern("counter");
        let again = interner.intern("counter");
        assert_eq!(counter, again);
        assert_eq!(interner.resolve(counter), "counter");
    }

    #[test]
    fn test_get_without_interning() {
        let mut interner = Interner::new();
        assert!(interner.get("d").is_none());
        let d = interner.intern("d");
        assert_eq!(interner.get("d"), Some(d));
    }
}
