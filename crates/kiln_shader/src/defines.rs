//! Shader Macro Definitions
//!
//! [`ShaderDefines`] is an order-independent set of `(name, value)` pairs.
//! Pairs are kept sorted by name, so two sets built in different orders have
//! the same canonical text and the same hash.
//!
//! [`DefinesRegistry`] interns sets: every distinct set gets one small
//! [`DefinesId`], which is what shader variants are keyed by.
//!
//! ```rust,ignore
//! let mut a = ShaderDefines::new();
//! a.set("X", "1");
//! a.set("Y", "2");
//! let mut b = ShaderDefines::new();
//! b.set("Y", "2");
//! b.set("X", "1");
//! assert_eq!(registry.intern(&a), registry.intern(&b));
//! ```

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::{Arc, OnceLock};
use xxhash_rust::xxh3::xxh3_64;

/// Interned id of a [`ShaderDefines`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinesId(u32);

impl DefinesId {
    #[inline]
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Canonical {
    text: String,
    hash: u64,
}

/// A set of preprocessor symbols.
#[derive(Debug, Clone, Default)]
pub struct ShaderDefines {
    pairs: SmallVec<[(String, String); 8]>,
    canonical: OnceLock<Canonical>,
}

impl ShaderDefines {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from pairs. Later duplicates override earlier ones.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut defines = Self::new();
        for (name, value) in pairs {
            defines.set(name, value);
        }
        defines
    }

    /// Sets `name` to `value`, replacing any previous value.
    ///
    /// Surrounding whitespace is not significant and is stripped.
    pub fn set(&mut self, name: &str, value: &str) {
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            log::warn!("Ignoring shader define with an empty name");
            return;
        }
        match self.pairs.binary_search_by(|(k, _)| k.as_str().cmp(name)) {
            Ok(idx) => {
                if self.pairs[idx].1 == value {
                    return;
                }
                self.pairs[idx].1 = value.to_string();
            }
            Err(idx) => self.pairs.insert(idx, (name.to_string(), value.to_string())),
        }
        self.canonical.take();
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.pairs.binary_search_by(|(k, _)| k.as_str().cmp(name.trim())) {
            Ok(idx) => {
                self.pairs.remove(idx);
                self.canonical.take();
                true
            }
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .ok()
            .map(|idx| self.pairs[idx].1.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Overrides entries of `self` with the entries of `other`.
    pub fn merge(&mut self, other: &ShaderDefines) {
        for (name, value) in &other.pairs {
            self.set(name, value);
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pairs in canonical (name-sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `#define` block, one line per pair in canonical order.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.canonical().text
    }

    /// Content hash of the canonical text.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        self.canonical().hash
    }

    fn canonical(&self) -> &Canonical {
        self.canonical.get_or_init(|| {
            let mut text = String::new();
            for (name, value) in &self.pairs {
                text.push_str("#define ");
                text.push_str(name);
                if !value.is_empty() {
                    text.push(' ');
                    text.push_str(value);
                }
                text.push('\n');
            }
            let hash = xxh3_64(text.as_bytes());
            Canonical { text, hash }
        })
    }
}

impl PartialEq for ShaderDefines {
    fn eq(&self, other: &Self) -> bool {
        self.pairs == other.pairs
    }
}

impl Eq for ShaderDefines {}

impl std::hash::Hash for ShaderDefines {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.content_hash());
    }
}

#[derive(Default)]
struct RegistryInner {
    by_hash: FxHashMap<u64, SmallVec<[DefinesId; 1]>>,
    sets: Vec<Arc<ShaderDefines>>,
}

/// Intern table for [`ShaderDefines`].
#[derive(Default)]
pub struct DefinesRegistry {
    inner: RwLock<RegistryInner>,
}

impl DefinesRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `defines`, allocating one if the set was never seen.
    pub fn intern(&self, defines: &ShaderDefines) -> DefinesId {
        let hash = defines.content_hash();
        if let Some(id) = Self::lookup(&self.inner.read(), hash, defines) {
            return id;
        }

        let mut inner = self.inner.write();
        if let Some(id) = Self::lookup(&inner, hash, defines) {
            return id;
        }
        let id = DefinesId(u32::try_from(inner.sets.len()).unwrap_or(u32::MAX));
        inner.sets.push(Arc::new(defines.clone()));
        inner.by_hash.entry(hash).or_default().push(id);
        id
    }

    fn lookup(inner: &RegistryInner, hash: u64, defines: &ShaderDefines) -> Option<DefinesId> {
        // Equal hashes are confirmed by comparing the pairs
        inner
            .by_hash
            .get(&hash)?
            .iter()
            .copied()
            .find(|id| *inner.sets[id.0 as usize] == *defines)
    }

    #[must_use]
    pub fn get(&self, id: DefinesId) -> Option<Arc<ShaderDefines>> {
        self.inner.read().sets.get(id.0 as usize).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().sets.is_empty()
    }
}

impl std::fmt::Debug for DefinesRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinesRegistry")
            .field("sets", &self.len())
            .finish()
    }
}
