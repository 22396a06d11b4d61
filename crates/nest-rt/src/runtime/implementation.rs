//! Accessor implementation registry.
//!
//! Accessor bodies are shared structurally: every property with the same
//! type encoding and ownership attributes uses the same getter and setter.
//! The registry maps an [`ImplementationKey`] built from those three parts to
//! the shared [`Imp`].
//!
//! Two insertion policies exist and are kept apart on purpose:
//!
//! - [`ImplementationRegistry::add`] is first-writer-wins. The process-wide
//!   registry uses it, so defaults cannot be replaced once registered.
//! - [`ImplementationRegistry::set`] always overwrites. Class descriptors use
//!   it for class-specific bodies.

use crate::runtime::property::AccessorAttributes;
use crate::runtime::Imp;
use fxhash::FxHashMap;
use std::fmt;
use std::sync::RwLock;

/// Encoding every object-typed accessor falls back to.
pub const GENERIC_OBJECT_ENCODING: &str = "@";

/// Whether an accessor reads or writes its property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorKind {
    Getter,
    Setter,
}

impl AccessorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AccessorKind::Getter => "getter",
            AccessorKind::Setter => "setter",
        }
    }
}

impl fmt::Display for AccessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity of an accessor body.
///
/// Formats as `{kind}:{encoding}:{flags}`, e.g. `setter:@:CN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImplementationKey {
    pub kind: AccessorKind,
    pub encoding: String,
    pub attributes: AccessorAttributes,
}

impl ImplementationKey {
    #[must_use]
    pub fn new(
        kind: AccessorKind,
        encoding: &str,
        attributes: AccessorAttributes,
    ) -> Self {
        ImplementationKey {
            kind,
            encoding: encoding.to_string(),
            attributes,
        }
    }

    /// Returns the key with the encoding replaced by the generic object
    /// encoding, if this key is for a specific object type such as
    /// `@"NSString"`.
    #[must_use]
    pub fn generic(&self) -> Option<Self> {
        (self.encoding.starts_with('@')
            && self.encoding != GENERIC_OBJECT_ENCODING)
            .then(|| ImplementationKey {
                kind: self.kind,
                encoding: GENERIC_OBJECT_ENCODING.to_string(),
                attributes: self.attributes,
            })
    }
}

impl fmt::Display for ImplementationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.kind,
            self.encoding,
            self.attributes.codes()
        )
    }
}

#[derive(Default)]
struct Tables {
    getters: FxHashMap<String, Imp>,
    setters: FxHashMap<String, Imp>,
}

impl Tables {
    fn table(&self, kind: AccessorKind) -> &FxHashMap<String, Imp> {
        match kind {
            AccessorKind::Getter => &self.getters,
            AccessorKind::Setter => &self.setters,
        }
    }

    fn table_mut(&mut self, kind: AccessorKind) -> &mut FxHashMap<String, Imp> {
        match kind {
            AccessorKind::Getter => &mut self.getters,
            AccessorKind::Setter => &mut self.setters,
        }
    }
}

/// Getter and setter bodies keyed by [`ImplementationKey`].
///
/// # Example
///
/// ```rust
/// use nest_rt::runtime::implementation::{
///     AccessorKind, ImplementationKey, ImplementationRegistry,
/// };
/// use nest_rt::runtime::property::AccessorAttributes;
/// use nest_rt::{Imp, Value};
///
/// let registry = ImplementationRegistry::new();
/// let key = ImplementationKey::new(AccessorKind::Getter, "@", AccessorAttributes::COPY);
/// let imp = Imp::new(|_, _| Ok(Value::Nil));
///
/// assert!(registry.add(&key, imp.clone()));
/// assert!(!registry.add(&key, Imp::new(|_, _| Ok(Value::Nil))));
/// assert_eq!(registry.get(&key), Some(imp));
/// ```
#[derive(Default)]
pub struct ImplementationRegistry {
    tables: RwLock<Tables>,
}

impl ImplementationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `imp` under `key` unless the key is already taken.
    ///
    /// Returns `false` and leaves the existing body in place on a clash.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn add(&self, key: &ImplementationKey, imp: Imp) -> bool {
        let mut tables = self.tables.write().unwrap();
        let table = tables.table_mut(key.kind);
        let id = key.to_string();
        if table.contains_key(&id) {
            return false;
        }
        table.insert(id, imp);
        true
    }

    /// Registers `imp` under `key`, replacing any existing body.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn set(&self, key: &ImplementationKey, imp: Imp) -> Option<Imp> {
        self.tables
            .write()
            .unwrap()
            .table_mut(key.kind)
            .insert(key.to_string(), imp)
    }

    /// Looks up the body for `key`, falling back to the generic object
    /// encoding for object-typed keys.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn get(&self, key: &ImplementationKey) -> Option<Imp> {
        let tables = self.tables.read().unwrap();
        let table = tables.table(key.kind);
        table.get(&key.to_string()).cloned().or_else(|| {
            key.generic()
                .and_then(|generic| table.get(&generic.to_string()).cloned())
        })
    }

    /// Returns the number of registered bodies.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        let tables = self.tables.read().unwrap();
        tables.getters.len() + tables.setters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Value;

    fn body() -> Imp {
        Imp::new(|_, _| Ok(Value::Nil))
    }

    #[test]
    fn test_key_format() {
        let key = ImplementationKey::new(
            AccessorKind::Setter,
            "@\"NSString\"",
            AccessorAttributes::COPY | AccessorAttributes::NONATOMIC,
        );
        assert_eq!(key.to_string(), "setter:@\"NSString\":CN");

        let plain =
            ImplementationKey::new(AccessorKind::Getter, "q", AccessorAttributes::NONE);
        assert_eq!(plain.to_string(), "getter:q:");
    }

    #[test]
    fn test_add_is_first_wins() {
        let registry = ImplementationRegistry::new();
        let key =
            ImplementationKey::new(AccessorKind::Getter, "q", AccessorAttributes::NONE);
        let first = body();

        assert!(registry.add(&key, first.clone()));
        assert!(!registry.add(&key, body()));
        assert_eq!(registry.get(&key), Some(first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_overwrites() {
        let registry = ImplementationRegistry::new();
        let key =
            ImplementationKey::new(AccessorKind::Setter, "d", AccessorAttributes::NONE);
        let first = body();
        let second = body();

        assert_eq!(registry.set(&key, first.clone()), None);
        assert_eq!(registry.set(&key, second.clone()), Some(first));
        assert_eq!(registry.get(&key), Some(second));
    }

    #[test]
    fn test_getters_and_setters_are_separate() {
        let registry = ImplementationRegistry::new();
        let getter =
            ImplementationKey::new(AccessorKind::Getter, "@", AccessorAttributes::RETAIN);
        let setter =
            ImplementationKey::new(AccessorKind::Setter, "@", AccessorAttributes::RETAIN);

        assert!(registry.add(&getter, body()));
        assert!(registry.get(&setter).is_none());
    }

    #[test]
    fn test_object_encoding_falls_back_to_generic() {
        let registry = ImplementationRegistry::new();
        let generic =
            ImplementationKey::new(AccessorKind::Getter, "@", AccessorAttributes::COPY);
        let specific = ImplementationKey::new(
            AccessorKind::Getter,
            "@\"NSString\"",
            AccessorAttributes::COPY,
        );
        let imp = body();
        registry.add(&generic, imp.clone());

        assert_eq!(registry.get(&specific), Some(imp.clone()));

        let bespoke = body();
        registry.add(&specific, bespoke.clone());
        assert_eq!(registry.get(&specific), Some(bespoke));
        assert_eq!(registry.get(&generic), Some(imp));
    }

    #[test]
    fn test_scalars_have_no_fallback() {
        let key =
            ImplementationKey::new(AccessorKind::Getter, "q", AccessorAttributes::NONE);
        assert!(key.generic().is_none());
    }
}
