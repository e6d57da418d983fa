//! String Interner
//!
//! Maps strings to compact integer [`Symbol`]s and back. The shader layer uses
//! it as the source-name table: `#line` markers carry the symbol index instead
//! of a file name, and compiler diagnostics are resolved back through it.
//!
//! Unlike a process-wide singleton, an [`Interner`] is owned by whoever needs
//! it and handed around explicitly.

use lasso::{Key, Spur, ThreadedRodeo};

/// Compact identifier of an interned string.
pub type Symbol = Spur;

/// Thread-safe string interner.
#[derive(Debug, Default)]
pub struct Interner {
    rodeo: ThreadedRodeo,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rodeo: ThreadedRodeo::new(),
        }
    }

    /// Interns a string, returning the existing symbol if it was seen before.
    #[inline]
    pub fn intern(&self, s: &str) -> Symbol {
        self.rodeo.get_or_intern(s)
    }

    /// Looks up a string without interning it.
    #[inline]
    #[must_use]
    pub fn get(&self, s: &str) -> Option<Symbol> {
        self.rodeo.get(s)
    }

    #[inline]
    #[must_use]
    pub fn resolve(&self, sym: Symbol) -> &str {
        self.rodeo.resolve(&sym)
    }

    /// Small integer form of a symbol, suitable for embedding in text.
    #[inline]
    #[must_use]
    pub fn index_of(sym: Symbol) -> usize {
        sym.into_usize()
    }

    /// Resolves the integer form produced by [`Interner::index_of`].
    #[must_use]
    pub fn resolve_index(&self, index: usize) -> Option<&str> {
        let sym = Spur::try_from_usize(index)?;
        self.rodeo.try_resolve(&sym)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let interner = Interner::new();
        let s1 = interner.intern("shaders/mesh.glsl");
        let s2 = interner.intern("shaders/mesh.glsl");
        let s3 = interner.intern("shaders/light.glsl");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);

        assert_eq!(interner.resolve(s1), "shaders/mesh.glsl");
        assert_eq!(interner.resolve(s3), "shaders/light.glsl");
    }

    #[test]
    fn test_index_round_trip() {
        let interner = Interner::new();
        let sym = interner.intern("common.glsl");
        let index = Interner::index_of(sym);
        assert_eq!(interner.resolve_index(index), Some("common.glsl"));
        assert_eq!(interner.resolve_index(index + 100), None);
    }

    #[test]
    fn test_get() {
        let interner = Interner::new();
        let _ = interner.intern("existing");

        assert!(interner.get("existing").is_some());
        assert!(interner.get("non_existing").is_none());
    }
}
