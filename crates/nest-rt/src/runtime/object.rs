//! Runtime objects and their primitive value store.
//!
//! An [`Object`] is a reference-counted instance of a class. Besides its
//! class it owns a keyed store of primitive values, which is where
//! synthesized accessors read and write property values. Entries are either
//! strong (the store keeps the value alive) or weak (the store observes an
//! object without keeping it alive; reading a dead entry yields `nil`).

use crate::runtime::{ClassId, Value};
use fxhash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

#[derive(Clone)]
enum Slot {
    Strong(Value),
    Weak(WeakObject),
}

struct ObjectInner {
    class: ClassId,
    storage: RwLock<FxHashMap<String, Slot>>,
    /// Held across an atomic accessor's read or write.
    accessor_lock: Mutex<()>,
}

/// A runtime object.
///
/// Cloning an `Object` clones the reference, not the instance; use
/// [`Object::copy`] for a new instance.
///
/// # Example
///
/// ```rust
/// use nest_rt::{Object, Value};
/// use nest_rt::runtime::ClassId;
///
/// let obj = Object::new(ClassId::from_index(0));
/// obj.set_primitive_value("title", Value::from("Nest"));
/// assert_eq!(obj.primitive_value("title"), Value::from("Nest"));
/// ```
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

/// A non-owning reference to an [`Object`].
#[derive(Clone)]
pub struct WeakObject {
    inner: Weak<ObjectInner>,
}

impl Object {
    /// Creates an instance of `class` with an empty store.
    ///
    /// This does not check that `class` is registered; use
    /// [`Runtime::instantiate`](crate::Runtime::instantiate) for that.
    #[must_use]
    pub fn new(class: ClassId) -> Self {
        Self::with_storage(class, FxHashMap::default())
    }

    fn with_storage(class: ClassId, storage: FxHashMap<String, Slot>) -> Self {
        Object {
            inner: Arc::new(ObjectInner {
                class,
                storage: RwLock::new(storage),
                accessor_lock: Mutex::new(()),
            }),
        }
    }

    /// Returns the class of this instance.
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.inner.class
    }

    /// Stores `value` under `key`, keeping it alive. Storing `nil` removes
    /// the entry.
    ///
    /// # Panics
    ///
    /// Panics if the storage lock is poisoned.
    pub fn set_primitive_value(&self, key: &str, value: Value) {
        let mut storage = self.inner.storage.write().unwrap();
        if value.is_nil() {
            storage.remove(key);
        } else {
            storage.insert(key.to_string(), Slot::Strong(value));
        }
    }

    /// Stores a weak reference to `object` under `key`.
    ///
    /// # Panics
    ///
    /// Panics if the storage lock is poisoned.
    pub fn set_weak_primitive_value(&self, key: &str, object: &Object) {
        self.inner
            .storage
            .write()
            .unwrap()
            .insert(key.to_string(), Slot::Weak(object.downgrade()));
    }

    /// Returns the value stored under `key`, or `nil` if there is none or
    /// the weakly referenced object is gone.
    ///
    /// # Panics
    ///
    /// Panics if the storage lock is poisoned.
    #[must_use]
    pub fn primitive_value(&self, key: &str) -> Value {
        match self.inner.storage.read().unwrap().get(key) {
            Some(Slot::Strong(value)) => value.clone(),
            Some(Slot::Weak(weak)) => weak.upgrade().into(),
            None => Value::Nil,
        }
    }

    /// Returns the keys currently present in the store, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the storage lock is poisoned.
    #[must_use]
    pub fn primitive_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> =
            self.inner.storage.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Creates a new instance of the same class with a copy of this store.
    ///
    /// Stored objects are shared with the original, not copied.
    ///
    /// # Panics
    ///
    /// Panics if the storage lock is poisoned.
    #[must_use]
    pub fn copy(&self) -> Object {
        let storage = self.inner.storage.read().unwrap().clone();
        Self::with_storage(self.inner.class, storage)
    }

    /// Checks whether both references point to the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates a weak reference to this instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Locks the per-instance accessor lock used by atomic accessors.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub(crate) fn accessor_lock(&self) -> MutexGuard<'_, ()> {
        self.inner.accessor_lock.lock().unwrap()
    }
}

impl WeakObject {
    /// Returns the object if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Object> {
        self.inner.upgrade().map(|inner| Object { inner })
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {:p}>", self.inner.class, Arc::as_ptr(&self.inner))
    }
}
