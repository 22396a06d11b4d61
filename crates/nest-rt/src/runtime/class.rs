//! Classes, methods and the method table for the Nest runtime.
//!
//! This module defines the host-facing method table abstraction:
//!
//! - [`ClassId`]: index of a class in the class arena
//! - [`Imp`]: a shared, identity-comparable method implementation
//! - [`Method`]: selector, implementation and type encoding
//! - [`MethodTable`]: the interface the synthesizer, the launch task
//!   scheduler and the swizzles mutate and query
//! - [`ClassRegistry`]: the in-memory [`MethodTable`]
//!
//! # Architecture
//!
//! Classes live in an arena and are never removed. A class names its
//! superclass by [`ClassId`], and a superclass must already be registered,
//! so the hierarchy is an acyclic parent-pointer forest.
//!
//! Every mutation bumps a table-wide version. Method lookups are cached per
//! (class, selector, scope) together with the version they were computed
//! at; a cached entry from an older version is recomputed, which covers
//! swizzles, exchanges and installs anywhere in the hierarchy.
//!
//! # Thread Safety
//!
//! The arena and the lookup cache are each behind an `RwLock`. `install` is
//! first-install-wins under the write lock, so two threads racing to install
//! the same selector observe a single winner.

use crate::error::{Error, Result};
use crate::runtime::{Message, Selector, Value};
use fxhash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Identifier of a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    /// Creates an identifier from a raw arena index.
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        ClassId(index)
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Signature of a method body.
pub type ImpFn = dyn Fn(&Message<'_>, &[Value]) -> Result<Value> + Send + Sync;

/// Method implementation.
///
/// Cloning shares the body. Two `Imp`s are equal only if they share the same
/// body, which is what swizzle bookkeeping and idempotent installs compare.
///
/// # Example
///
/// ```rust
/// use nest_rt::{Imp, Value};
///
/// let imp = Imp::new(|_msg, args| Ok(args.first().cloned().unwrap_or_default()));
/// assert_eq!(imp, imp.clone());
/// assert_ne!(imp, Imp::new(|_msg, _args| Ok(Value::Nil)));
/// ```
#[derive(Clone)]
pub struct Imp(Arc<ImpFn>);

impl Imp {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Message<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Imp(Arc::new(body))
    }

    /// Runs the body.
    ///
    /// # Errors
    ///
    /// Returns whatever error the body returns.
    pub fn call(&self, message: &Message<'_>, args: &[Value]) -> Result<Value> {
        (self.0)(message, args)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Imp) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Imp {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Imp {}

impl fmt::Debug for Imp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Imp({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// `Method` representation with implementation and type encoding.
#[derive(Debug, Clone)]
pub struct Method {
    /// `Method` selector
    pub selector: Selector,
    /// Method body
    pub imp: Imp,
    /// Type encoding (e.g. `"v@:@"` for a setter taking an object)
    pub types: String,
}

impl Method {
    #[must_use]
    pub fn new(selector: Selector, imp: Imp, types: &str) -> Self {
        Method {
            selector,
            imp,
            types: types.to_string(),
        }
    }
}

/// Which method table of a class a method lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodScope {
    /// Methods sent to instances.
    Instance,
    /// Methods sent to the class itself.
    Class,
}

/// Outcome of [`MethodTable::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Installation {
    /// The method was added.
    Installed,
    /// The class already had an implementation for the selector; it is
    /// returned and left in place.
    AlreadyPresent(Imp),
}

/// The method table the runtime mutates and queries.
///
/// Implemented by [`ClassRegistry`]; a host embedding the runtime over
/// another object model implements it for that model.
pub trait MethodTable: Send + Sync {
    /// Returns the superclass of `class`, or `None` for a root class or an
    /// unknown identifier.
    fn superclass(&self, class: ClassId) -> Option<ClassId>;

    fn class_name(&self, class: ClassId) -> Option<String>;

    /// Returns every registered class in registration order.
    fn classes(&self) -> Vec<ClassId>;

    /// Returns the methods defined directly on `class`, sorted by selector
    /// name.
    fn methods(&self, class: ClassId, scope: MethodScope) -> Vec<Method>;

    /// Returns the method defined directly on `class`, ignoring ancestors.
    fn own_method(
        &self,
        class: ClassId,
        selector: &Selector,
        scope: MethodScope,
    ) -> Option<Method>;

    /// Adds `method` to `class` unless the class already defines the
    /// selector itself. Inherited methods do not block an install.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClass`] if `class` is not registered.
    fn install(
        &self,
        class: ClassId,
        method: Method,
        scope: MethodScope,
    ) -> Result<Installation>;

    /// Replaces the implementation `class` defines for `selector` and
    /// returns the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectorNotFound`] if the class itself does not
    /// define the selector.
    fn replace(
        &self,
        class: ClassId,
        selector: &Selector,
        scope: MethodScope,
        imp: Imp,
    ) -> Result<Imp>;

    /// Swaps the implementations of two selectors defined on `class`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectorNotFound`] if either selector is not defined
    /// on the class itself.
    fn exchange(
        &self,
        class: ClassId,
        a: &Selector,
        b: &Selector,
        scope: MethodScope,
    ) -> Result<()>;

    /// Returns a counter that increases on every mutation.
    fn version(&self) -> u64;

    /// Looks up `selector` on `class` and then its ancestors.
    fn lookup(
        &self,
        class: ClassId,
        selector: &Selector,
        scope: MethodScope,
    ) -> Option<Method> {
        let mut current = Some(class);
        while let Some(cls) = current {
            if let Some(method) = self.own_method(cls, selector, scope) {
                return Some(method);
            }
            current = self.superclass(cls);
        }
        None
    }

    /// Checks whether `class` is `ancestor` or inherits from it.
    fn is_subclass_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(cls) = current {
            if cls == ancestor {
                return true;
            }
            current = self.superclass(cls);
        }
        false
    }
}

struct ClassRecord {
    name: String,
    superclass: Option<ClassId>,
    instance_methods: FxHashMap<Selector, Method>,
    class_methods: FxHashMap<Selector, Method>,
}

impl ClassRecord {
    fn methods(&self, scope: MethodScope) -> &FxHashMap<Selector, Method> {
        match scope {
            MethodScope::Instance => &self.instance_methods,
            MethodScope::Class => &self.class_methods,
        }
    }

    fn methods_mut(
        &mut self,
        scope: MethodScope,
    ) -> &mut FxHashMap<Selector, Method> {
        match scope {
            MethodScope::Instance => &mut self.instance_methods,
            MethodScope::Class => &mut self.class_methods,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    records: Vec<ClassRecord>,
    names: FxHashMap<String, ClassId>,
}

impl RegistryInner {
    fn record(&self, class: ClassId) -> Result<&ClassRecord> {
        self.records
            .get(class.index())
            .ok_or(Error::UnknownClass { class })
    }

    fn record_mut(&mut self, class: ClassId) -> Result<&mut ClassRecord> {
        self.records
            .get_mut(class.index())
            .ok_or(Error::UnknownClass { class })
    }
}

type CacheKey = (ClassId, Selector, MethodScope);

/// In-memory class arena and method table.
///
/// # Example
///
/// ```rust
/// use nest_rt::{ClassRegistry, Imp, Method, MethodScope, MethodTable, Selector, Value};
/// use std::str::FromStr;
///
/// let registry = ClassRegistry::new();
/// let root = registry.add_class("Root", None).unwrap();
/// let child = registry.add_class("Child", Some(root)).unwrap();
///
/// let sel = Selector::from_str("ping").unwrap();
/// let method = Method::new(sel, Imp::new(|_, _| Ok(Value::Bool(true))), "B@:");
/// registry.add_method(root, method, MethodScope::Instance).unwrap();
///
/// assert!(registry.lookup(child, &sel, MethodScope::Instance).is_some());
/// ```
pub struct ClassRegistry {
    inner: RwLock<RegistryInner>,
    cache: RwLock<FxHashMap<CacheKey, (u64, Method)>>,
    version: AtomicU64,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        ClassRegistry {
            inner: RwLock::new(RegistryInner::default()),
            cache: RwLock::new(FxHashMap::default()),
            version: AtomicU64::new(0),
        }
    }

    /// Registers a class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassAlreadyExists`] if the name is taken, or
    /// [`Error::UnknownClass`] if `superclass` is not registered.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn add_class(
        &self,
        name: &str,
        superclass: Option<ClassId>,
    ) -> Result<ClassId> {
        let mut inner = self.inner.write().unwrap();

        if inner.names.contains_key(name) {
            return Err(Error::ClassAlreadyExists {
                name: name.to_string(),
            });
        }
        if let Some(parent) = superclass {
            inner.record(parent)?;
        }

        #[allow(clippy::cast_possible_truncation)]
        let class = ClassId(inner.records.len() as u32);

        inner.records.push(ClassRecord {
            name: name.to_string(),
            superclass,
            instance_methods: FxHashMap::default(),
            class_methods: FxHashMap::default(),
        });
        inner.names.insert(name.to_string(), class);
        self.bump();

        Ok(class)
    }

    /// Returns the class registered under `name`.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn class_named(&self, name: &str) -> Option<ClassId> {
        self.inner.read().unwrap().names.get(name).copied()
    }

    /// Checks whether `class` is registered.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn contains(&self, class: ClassId) -> bool {
        self.inner.read().unwrap().record(class).is_ok()
    }

    /// Adds or overwrites a method on `class`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClass`] if `class` is not registered.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn add_method(
        &self,
        class: ClassId,
        method: Method,
        scope: MethodScope,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .record_mut(class)?
            .methods_mut(scope)
            .insert(method.selector, method);
        self.bump();
        Ok(())
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

impl MethodTable for ClassRegistry {
    fn superclass(&self, class: ClassId) -> Option<ClassId> {
        self.inner
            .read()
            .unwrap()
            .record(class)
            .ok()
            .and_then(|record| record.superclass)
    }

    fn class_name(&self, class: ClassId) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .record(class)
            .ok()
            .map(|record| record.name.clone())
    }

    fn classes(&self) -> Vec<ClassId> {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.inner.read().unwrap().records.len() as u32;
        (0..count).map(ClassId).collect()
    }

    fn methods(&self, class: ClassId, scope: MethodScope) -> Vec<Method> {
        let inner = self.inner.read().unwrap();
        let Ok(record) = inner.record(class) else {
            return Vec::new();
        };
        let mut methods: Vec<Method> =
            record.methods(scope).values().cloned().collect();
        methods.sort_by(|a, b| a.selector.name().cmp(b.selector.name()));
        methods
    }

    fn own_method(
        &self,
        class: ClassId,
        selector: &Selector,
        scope: MethodScope,
    ) -> Option<Method> {
        self.inner
            .read()
            .unwrap()
            .record(class)
            .ok()
            .and_then(|record| record.methods(scope).get(selector).cloned())
    }

    fn install(
        &self,
        class: ClassId,
        method: Method,
        scope: MethodScope,
    ) -> Result<Installation> {
        let mut inner = self.inner.write().unwrap();
        let methods = inner.record_mut(class)?.methods_mut(scope);

        if let Some(existing) = methods.get(&method.selector) {
            return Ok(Installation::AlreadyPresent(existing.imp.clone()));
        }

        methods.insert(method.selector, method);
        self.bump();
        Ok(Installation::Installed)
    }

    fn replace(
        &self,
        class: ClassId,
        selector: &Selector,
        scope: MethodScope,
        imp: Imp,
    ) -> Result<Imp> {
        let mut inner = self.inner.write().unwrap();
        let method = inner
            .record_mut(class)?
            .methods_mut(scope)
            .get_mut(selector)
            .ok_or_else(|| Error::SelectorNotFound {
                selector: selector.name().to_string(),
            })?;

        let previous = std::mem::replace(&mut method.imp, imp);
        self.bump();
        Ok(previous)
    }

    fn exchange(
        &self,
        class: ClassId,
        a: &Selector,
        b: &Selector,
        scope: MethodScope,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let methods = inner.record_mut(class)?.methods_mut(scope);

        let not_found = |sel: &Selector| Error::SelectorNotFound {
            selector: sel.name().to_string(),
        };
        let imp_a = methods.get(a).ok_or_else(|| not_found(a))?.imp.clone();
        let imp_b = methods.get(b).ok_or_else(|| not_found(b))?.imp.clone();

        if let Some(method) = methods.get_mut(a) {
            method.imp = imp_b;
        }
        if let Some(method) = methods.get_mut(b) {
            method.imp = imp_a;
        }
        self.bump();
        Ok(())
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn lookup(
        &self,
        class: ClassId,
        selector: &Selector,
        scope: MethodScope,
    ) -> Option<Method> {
        let key = (class, *selector, scope);
        let version = self.version();

        // Fast path: cached at the current version
        if let Some((cached_version, method)) =
            self.cache.read().unwrap().get(&key)
        {
            if *cached_version == version {
                return Some(method.clone());
            }
        }

        // Slow path: walk the hierarchy under one read lock
        let found = {
            let inner = self.inner.read().unwrap();
            let mut current = Some(class);
            let mut found = None;
            while let Some(cls) = current {
                let Ok(record) = inner.record(cls) else { break };
                if let Some(method) = record.methods(scope).get(selector) {
                    found = Some(method.clone());
                    break;
                }
                current = record.superclass;
            }
            found
        };

        if let Some(method) = &found {
            self.cache
                .write()
                .unwrap()
                .insert(key, (version, method.clone()));
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn constant(value: i64) -> Imp {
        Imp::new(move |_, _| Ok(Value::Int(value)))
    }

    fn sel(name: &str) -> Selector {
        Selector::from_str(name).unwrap()
    }

    #[test]
    fn test_duplicate_class_name() {
        let registry = ClassRegistry::new();
        let first = registry.add_class("Dup", None).unwrap();
        assert_eq!(
            registry.add_class("Dup", None),
            Err(Error::ClassAlreadyExists {
                name: "Dup".to_string()
            })
        );
        assert_eq!(registry.class_named("Dup"), Some(first));
        assert_eq!(registry.class_named("Missing"), None);
    }

    #[test]
    fn test_unknown_superclass() {
        let registry = ClassRegistry::new();
        let bogus = ClassId::from_index(99);
        assert_eq!(
            registry.add_class("Orphan", Some(bogus)),
            Err(Error::UnknownClass { class: bogus })
        );
    }

    #[test]
    fn test_install_is_first_wins() {
        let registry = ClassRegistry::new();
        let class = registry.add_class("Installs", None).unwrap();
        let first = constant(1);

        let outcome = registry
            .install(
                class,
                Method::new(sel("value"), first.clone(), "q@:"),
                MethodScope::Instance,
            )
            .unwrap();
        assert_eq!(outcome, Installation::Installed);

        let outcome = registry
            .install(
                class,
                Method::new(sel("value"), constant(2), "q@:"),
                MethodScope::Instance,
            )
            .unwrap();
        assert_eq!(outcome, Installation::AlreadyPresent(first.clone()));

        let found = registry
            .lookup(class, &sel("value"), MethodScope::Instance)
            .unwrap();
        assert_eq!(found.imp, first);
    }

    #[test]
    fn test_lookup_cache_sees_replace() {
        let registry = ClassRegistry::new();
        let root = registry.add_class("CacheRoot", None).unwrap();
        let child = registry.add_class("CacheChild", Some(root)).unwrap();
        let original = constant(1);
        let replacement = constant(2);

        registry
            .add_method(
                root,
                Method::new(sel("cached"), original.clone(), "q@:"),
                MethodScope::Instance,
            )
            .unwrap();

        let before = registry
            .lookup(child, &sel("cached"), MethodScope::Instance)
            .unwrap();
        assert_eq!(before.imp, original);

        let previous = registry
            .replace(root, &sel("cached"), MethodScope::Instance, replacement.clone())
            .unwrap();
        assert_eq!(previous, original);

        let after = registry
            .lookup(child, &sel("cached"), MethodScope::Instance)
            .unwrap();
        assert_eq!(after.imp, replacement);
    }

    #[test]
    fn test_replace_requires_own_method() {
        let registry = ClassRegistry::new();
        let root = registry.add_class("ReplaceRoot", None).unwrap();
        let child = registry.add_class("ReplaceChild", Some(root)).unwrap();
        registry
            .add_method(
                root,
                Method::new(sel("inherited"), constant(1), "q@:"),
                MethodScope::Instance,
            )
            .unwrap();

        assert!(matches!(
            registry.replace(child, &sel("inherited"), MethodScope::Instance, constant(2)),
            Err(Error::SelectorNotFound { .. })
        ));
    }

    #[test]
    fn test_exchange_swaps_implementations() {
        let registry = ClassRegistry::new();
        let class = registry.add_class("Exchange", None).unwrap();
        let a = constant(1);
        let b = constant(2);
        registry
            .add_method(class, Method::new(sel("a"), a.clone(), "q@:"), MethodScope::Class)
            .unwrap();
        registry
            .add_method(class, Method::new(sel("b"), b.clone(), "q@:"), MethodScope::Class)
            .unwrap();

        registry
            .exchange(class, &sel("a"), &sel("b"), MethodScope::Class)
            .unwrap();

        assert_eq!(
            registry.own_method(class, &sel("a"), MethodScope::Class).unwrap().imp,
            b
        );
        assert_eq!(
            registry.own_method(class, &sel("b"), MethodScope::Class).unwrap().imp,
            a
        );
    }

    #[test]
    fn test_scopes_are_separate() {
        let registry = ClassRegistry::new();
        let class = registry.add_class("Scoped", None).unwrap();
        registry
            .add_method(
                class,
                Method::new(sel("shared"), constant(1), "q@:"),
                MethodScope::Class,
            )
            .unwrap();

        assert!(registry.lookup(class, &sel("shared"), MethodScope::Class).is_some());
        assert!(registry.lookup(class, &sel("shared"), MethodScope::Instance).is_none());
    }

    #[test]
    fn test_version_increases_on_mutation() {
        let registry = ClassRegistry::new();
        let before = registry.version();
        let class = registry.add_class("Versioned", None).unwrap();
        registry
            .add_method(class, Method::new(sel("v"), constant(0), "q@:"), MethodScope::Instance)
            .unwrap();
        assert!(registry.version() >= before + 2);
    }
}
