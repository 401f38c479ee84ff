//! Interned identifier names.
//!
//! The binder compares identifier names constantly (definition lookups,
//! reference resolution, global-set membership). Interning makes equality a
//! pointer comparison and cloning free.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{LazyLock, RwLock};

static POOL: LazyLock<RwLock<HashSet<&'static str>>> = LazyLock::new(|| RwLock::new(HashSet::new()));

/// An interned identifier name.
///
/// Two `Ident`s with the same content share one allocation, so equality is a
/// pointer check. Ordering and iteration are still by string content, which
/// keeps diagnostic output deterministic.
#[derive(Clone, Copy)]
pub struct Ident {
    inner: &'static str,
}

impl Ident {
    /// Intern a name.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();

        if let Some(&interned) = POOL.read().unwrap().get(name) {
            return Ident { inner: interned };
        }

        let mut pool = POOL.write().unwrap();
        // Re-check: another thread may have interned it between the locks.
        if let Some(&interned) = pool.get(name) {
            return Ident { inner: interned };
        }
        let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
        pool.insert(leaked);
        Ident { inner: leaked }
    }

    /// The underlying string slice.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.inner
    }
}

impl Deref for Ident {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        self.inner
    }
}

impl AsRef<str> for Ident {
    #[inline]
    fn as_ref(&self) -> &str {
        self.inner
    }
}

impl Borrow<str> for Ident {
    #[inline]
    fn borrow(&self) -> &str {
        self.inner
    }
}

impl PartialEq for Ident {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner, other.inner)
    }
}

impl Eq for Ident {}

impl PartialOrd for Ident {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ident {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(other.inner)
    }
}

impl Hash for Ident {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        // All equal idents share one address.
        std::ptr::hash(self.inner, state)
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.inner, f)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner, f)
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Ident::new(s)
    }
}

impl From<String> for Ident {
    fn from(s: String) -> Self {
        Ident::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interned_equality() {
        let a = Ident::new("assert");
        let b = Ident::new("assert");
        let c = Ident::new("DEBUG");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(std::ptr::eq(a.inner, b.inner));
    }

    #[test]
    fn test_borrow_lookup() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(Ident::new("window"), 1);
        assert_eq!(map.get(&Ident::new("window")), Some(&1));
    }

    #[test]
    fn test_content_ordering() {
        let mut names = vec![Ident::new("b"), Ident::new("a"), Ident::new("c")];
        names.sort();
        let strs: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        assert_eq!(strs, vec!["a", "b", "c"]);
    }
}
