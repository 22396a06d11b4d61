//! `Selector` interning for the Nest runtime.
//!
//! Each unique method name maps to exactly one interned record that lives for
//! the rest of the process. Comparing two selectors is a pointer comparison
//! and hashing one reuses a hash computed once at interning time.
//!
//! # Sharding
//!
//! The registry is split into `NUM_SHARDS` independent shards selected by
//! the low bits of the `FxHash` of the name. A cache hit takes the read lock
//! of one shard; a miss takes the write lock of one shard and re-checks
//! before inserting, so concurrent interning of the same name from several
//! threads yields the same record.

use crate::error::{Error, Result};
use fxhash::{FxHashMap, FxHasher};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Number of shards in the selector registry (power of 2 for fast masking).
const NUM_SHARDS: usize = 16;

/// Bit mask for shard selection.
const SHARD_MASK: usize = NUM_SHARDS - 1;

/// Interned selector record. Leaked on creation, never freed.
struct InternedSelector {
    name: Box<str>,
    hash: u64,
}

struct SelectorShard {
    names: RwLock<FxHashMap<&'static str, &'static InternedSelector>>,
}

static REGISTRY: OnceLock<[SelectorShard; NUM_SHARDS]> = OnceLock::new();

fn registry() -> &'static [SelectorShard; NUM_SHARDS] {
    REGISTRY.get_or_init(|| {
        std::array::from_fn(|_| SelectorShard {
            names: RwLock::new(FxHashMap::default()),
        })
    })
}

/// `Selector` represents a unique method name in the runtime.
///
/// # Example
///
/// ```rust
/// use nest_rt::Selector;
/// use std::str::FromStr;
///
/// let a = Selector::from_str("setName:").unwrap();
/// let b = Selector::from_str("setName:").unwrap();
///
/// assert_eq!(a, b);
/// assert_eq!(a.argument_count(), 1);
/// ```
#[derive(Clone, Copy)]
pub struct Selector {
    inner: &'static InternedSelector,
}

impl FromStr for Selector {
    type Err = Error;

    /// Returns the selector for `name`, interning it if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] if `name` is empty.
    ///
    /// # Panics
    ///
    /// Panics if a shard lock is poisoned.
    fn from_str(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidSelector);
        }

        let mut hasher = FxHasher::default();
        name.hash(&mut hasher);
        let hash = hasher.finish();

        #[allow(clippy::cast_possible_truncation)]
        let shard = &registry()[(hash as usize) & SHARD_MASK];

        // Fast path: read lock only
        if let Some(interned) = shard.names.read().unwrap().get(name) {
            return Ok(Selector { inner: interned });
        }

        let mut names = shard.names.write().unwrap();

        // Another thread may have interned it while we waited
        if let Some(interned) = names.get(name) {
            return Ok(Selector { inner: interned });
        }

        let interned: &'static InternedSelector =
            Box::leak(Box::new(InternedSelector {
                name: name.into(),
                hash,
            }));
        names.insert(&interned.name, interned);

        Ok(Selector { inner: interned })
    }
}

impl Selector {
    /// Returns the selector's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        &self.inner.name
    }

    /// Returns the precomputed hash of the name.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        self.inner.hash
    }

    /// Returns the number of arguments the selector takes (its colon count).
    ///
    /// ```rust
    /// use nest_rt::Selector;
    /// use std::str::FromStr;
    ///
    /// let sel = Selector::from_str("application:willFinishLaunchingWithOptions:").unwrap();
    /// assert_eq!(sel.argument_count(), 2);
    /// ```
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.inner.name.bytes().filter(|&b| b == b':').count()
    }

    /// Checks whether the name textually begins with `prefix`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.inner.name.starts_with(prefix)
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner, other.inner)
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash);
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Selector").field(&self.name()).finish()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_selector_interning() {
        let a = Selector::from_str("title").unwrap();
        let b = Selector::from_str("title").unwrap();
        let c = Selector::from_str("setTitle:").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    fn test_empty_selector_rejected() {
        assert_eq!(Selector::from_str(""), Err(Error::InvalidSelector));
    }

    #[test]
    fn test_argument_count_and_prefix() {
        let sel = Selector::from_str("_LaunchTask_configure:").unwrap();
        assert_eq!(sel.argument_count(), 1);
        assert!(sel.has_prefix("_LaunchTask_"));
        assert!(!sel.has_prefix("_Other_"));
    }

    #[test]
    fn test_concurrent_interning_yields_one_record() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    Selector::from_str("concurrentSelector:").unwrap()
                })
            })
            .collect();

        let selectors: Vec<Selector> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for sel in &selectors {
            assert_eq!(*sel, selectors[0]);
        }
    }
}
