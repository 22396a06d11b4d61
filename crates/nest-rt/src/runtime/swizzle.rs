//! Self-aware swizzles.
//!
//! A [`SelfAwareSwizzle`] describes one method replacement and performs it
//! at most once, no matter how many times or from how many places it is
//! asked to. Two kinds exist:
//!
//! - an implementation swizzle replaces the body of a selector and hands the
//!   previous body to an [`OriginalSlot`] so the replacement can forward to
//!   it
//! - a selector exchange swaps the bodies of two selectors
//!
//! Swizzles are usually declared as class methods whose selector starts with
//! the self-aware swizzle prefix and that return a swizzle (or a list of
//! them) as opaque data. The launch task built by [`self_aware_swizzle_task`]
//! collects those at the launch checkpoint, drops duplicates and performs
//! the rest, ahead of every other launch task.
//!
//! # Example
//!
//! ```rust
//! use nest_rt::runtime::swizzle::{OriginalSlot, SelfAwareSwizzle};
//! use nest_rt::{ClassRegistry, Imp, Method, MethodScope, MethodTable, Selector, Value};
//! use std::str::FromStr;
//!
//! let registry = ClassRegistry::new();
//! let class = registry.add_class("Greeter", None).unwrap();
//! let greet = Selector::from_str("greet").unwrap();
//! let original = Imp::new(|_, _| Ok(Value::from("hello")));
//! registry
//!     .add_method(class, Method::new(greet, original.clone(), "@@:"), MethodScope::Instance)
//!     .unwrap();
//!
//! let slot = OriginalSlot::new();
//! let swizzle = SelfAwareSwizzle::implementation(
//!     class,
//!     greet,
//!     MethodScope::Instance,
//!     Imp::new(|_, _| Ok(Value::from("howdy"))),
//!     slot.clone(),
//! );
//!
//! assert_eq!(swizzle.perform(&registry), Ok(true));
//! assert_eq!(swizzle.perform(&registry), Ok(false));
//! assert_eq!(slot.get(), Some(original));
//! ```

use crate::error::{Error, Result};
use crate::runtime::launch::{
    ContextCleanup, LaunchContext, LaunchTaskInfo, LaunchTaskInvocation,
    TaskHandler,
};
use crate::runtime::{ClassId, Imp, MethodScope, MethodTable, Selector, Value};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

/// Receives the body a swizzle replaced.
///
/// Clones share the slot, so a replacement closure can hold one clone and
/// the swizzle another.
#[derive(Clone, Default)]
pub struct OriginalSlot(Arc<OnceLock<Imp>>);

impl OriginalSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the replaced body once the swizzle has run.
    #[must_use]
    pub fn get(&self) -> Option<Imp> {
        self.0.get().cloned()
    }

    fn fill(&self, imp: Imp) {
        if self.0.set(imp).is_err() {
            nest_log::warn!("original slot already filled; keeping the first body");
        }
    }
}

impl fmt::Debug for OriginalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OriginalSlot").field(&self.0.get()).finish()
    }
}

/// What a swizzle puts in place.
#[derive(Debug, Clone)]
pub enum SwizzleSource {
    /// Replace the body with `replacement`, handing the old one to
    /// `original`.
    Implementation {
        replacement: Imp,
        original: OriginalSlot,
    },
    /// Swap bodies with `swizzled`.
    Exchange { swizzled: Selector },
}

impl PartialEq for SwizzleSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                SwizzleSource::Implementation { replacement: a, .. },
                SwizzleSource::Implementation { replacement: b, .. },
            ) => a == b,
            (
                SwizzleSource::Exchange { swizzled: a },
                SwizzleSource::Exchange { swizzled: b },
            ) => a == b,
            _ => false,
        }
    }
}

/// A method replacement that runs at most once.
///
/// Clones share the once token. Equality compares the target and the
/// source, not the token, so two independently built swizzles of the same
/// replacement are equal.
#[derive(Debug, Clone)]
pub struct SelfAwareSwizzle {
    class: ClassId,
    selector: Selector,
    scope: MethodScope,
    source: SwizzleSource,
    performed: Arc<Mutex<bool>>,
}

impl SelfAwareSwizzle {
    /// Creates a swizzle replacing the body of `selector` on `class`.
    #[must_use]
    pub fn implementation(
        class: ClassId,
        selector: Selector,
        scope: MethodScope,
        replacement: Imp,
        original: OriginalSlot,
    ) -> Self {
        Self::with_source(
            class,
            selector,
            scope,
            SwizzleSource::Implementation {
                replacement,
                original,
            },
        )
    }

    /// Creates a swizzle exchanging the bodies of `original` and `swizzled`
    /// on `class`.
    #[must_use]
    pub fn exchange(
        class: ClassId,
        original: Selector,
        swizzled: Selector,
        scope: MethodScope,
    ) -> Self {
        Self::with_source(class, original, scope, SwizzleSource::Exchange { swizzled })
    }

    fn with_source(
        class: ClassId,
        selector: Selector,
        scope: MethodScope,
        source: SwizzleSource,
    ) -> Self {
        SelfAwareSwizzle {
            class,
            selector,
            scope,
            source,
            performed: Arc::new(Mutex::new(false)),
        }
    }

    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    #[must_use]
    pub fn selector(&self) -> Selector {
        self.selector
    }

    #[must_use]
    pub fn scope(&self) -> MethodScope {
        self.scope
    }

    #[must_use]
    pub fn source(&self) -> &SwizzleSource {
        &self.source
    }

    /// # Panics
    ///
    /// Panics if the once token is poisoned.
    #[must_use]
    pub fn is_performed(&self) -> bool {
        *self.performed.lock().unwrap()
    }

    /// Applies the swizzle to `classes` unless it already ran.
    ///
    /// A selector the class only inherits is first given its own copy of
    /// the inherited method, so the swizzle never changes the ancestor.
    ///
    /// Returns `Ok(true)` if this call applied it and `Ok(false)` if an
    /// earlier call did. A failed attempt leaves the swizzle unperformed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectorNotFound`] if a selector is not defined on
    /// the class or its ancestors, or [`Error::UnknownClass`] for an
    /// unregistered class.
    ///
    /// # Panics
    ///
    /// Panics if the once token is poisoned.
    pub fn perform(&self, classes: &dyn MethodTable) -> Result<bool> {
        let mut performed = self.performed.lock().unwrap();
        if *performed {
            return Ok(false);
        }

        match &self.source {
            SwizzleSource::Implementation {
                replacement,
                original,
            } => {
                self.own_copy(classes, &self.selector)?;
                let previous = classes.replace(
                    self.class,
                    &self.selector,
                    self.scope,
                    replacement.clone(),
                )?;
                original.fill(previous);
            }
            SwizzleSource::Exchange { swizzled } => {
                self.own_copy(classes, &self.selector)?;
                self.own_copy(classes, swizzled)?;
                classes.exchange(self.class, &self.selector, swizzled, self.scope)?;
            }
        }

        *performed = true;
        nest_log::debug!("performed swizzle {self}");
        Ok(true)
    }

    /// Makes sure the class defines `selector` itself, copying the
    /// inherited method if needed.
    fn own_copy(&self, classes: &dyn MethodTable, selector: &Selector) -> Result<()> {
        if classes.own_method(self.class, selector, self.scope).is_some() {
            return Ok(());
        }

        let inherited = classes
            .lookup(self.class, selector, self.scope)
            .ok_or_else(|| Error::SelectorNotFound {
                selector: selector.name().to_string(),
            })?;
        classes.install(self.class, inherited, self.scope)?;
        Ok(())
    }
}

impl PartialEq for SelfAwareSwizzle {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.selector == other.selector
            && self.scope == other.scope
            && self.source == other.source
    }
}

impl fmt::Display for SelfAwareSwizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sigil = match self.scope {
            MethodScope::Instance => '-',
            MethodScope::Class => '+',
        };
        write!(f, "[{} {sigil}{}", self.class, self.selector)?;
        if let SwizzleSource::Exchange { swizzled } = &self.source {
            write!(f, " <-> {sigil}{swizzled}")?;
        }
        f.write_str("]")
    }
}

/// Swizzles already performed by the swizzle launch task.
type SwizzleLedger = Mutex<Vec<SelfAwareSwizzle>>;

/// Builds the launch task that performs self-aware swizzles declared by
/// class methods starting with `prefix`.
///
/// The task runs at the highest priority. Matching methods must return a
/// [`SelfAwareSwizzle`] or a `Vec<SelfAwareSwizzle>` as [`Value::Opaque`],
/// or `nil`.
#[must_use]
pub fn self_aware_swizzle_task(prefix: &str) -> LaunchTaskInfo {
    let ledger: LaunchContext = Arc::new(SwizzleLedger::default());

    LaunchTaskInfo::new(prefix, TaskHandler::new(perform_declared_swizzles))
        .with_context(ledger)
        .with_cleanup(ContextCleanup::new(|context| {
            let performed = context
                .as_ref()
                .and_then(|context| context.downcast_ref::<SwizzleLedger>())
                .map_or(0, |ledger| ledger.lock().map_or(0, |swizzles| swizzles.len()));
            nest_log::debug!("self-aware swizzle task done, {performed} swizzles performed");
        }))
        .with_priority(i32::MAX)
}

fn perform_declared_swizzles(task: &LaunchTaskInvocation<'_>) -> Result<()> {
    let declared = task.invoke()?;
    let swizzles: Vec<SelfAwareSwizzle> =
        if let Some(swizzle) = declared.downcast_ref::<SelfAwareSwizzle>() {
            vec![swizzle.clone()]
        } else if let Some(list) = declared.downcast_ref::<Vec<SelfAwareSwizzle>>() {
            list.clone()
        } else if declared.is_nil() {
            Vec::new()
        } else {
            return Err(Error::LaunchTaskFailed {
                selector: task.selector().name().to_string(),
                reason: format!("expected a swizzle, got {}", declared.kind()),
            });
        };

    let ledger = task.context_as::<SwizzleLedger>();
    let classes = task.runtime().classes();

    for swizzle in swizzles {
        if let Some(ledger) = ledger {
            let mut seen = ledger.lock().unwrap();
            if seen.contains(&swizzle) {
                nest_log::debug!("skipping duplicate swizzle {swizzle}");
                continue;
            }
            if swizzle.perform(classes)? {
                seen.push(swizzle);
            }
        } else {
            swizzle.perform(classes)?;
        }
    }

    Ok(())
}

/// Wraps a swizzle so a class method can return it.
impl From<SelfAwareSwizzle> for Value {
    fn from(swizzle: SelfAwareSwizzle) -> Self {
        Value::from_opaque(swizzle)
    }
}

impl From<Vec<SelfAwareSwizzle>> for Value {
    fn from(swizzles: Vec<SelfAwareSwizzle>) -> Self {
        Value::from_opaque(swizzles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClassRegistry, Method};
    use std::str::FromStr;

    fn sel(name: &str) -> Selector {
        Selector::from_str(name).unwrap()
    }

    fn constant(value: i64) -> Imp {
        Imp::new(move |_, _| Ok(Value::Int(value)))
    }

    #[test]
    fn test_exchange_runs_once() {
        let registry = ClassRegistry::new();
        let class = registry.add_class("SwizzleExchange", None).unwrap();
        let a = constant(1);
        let b = constant(2);
        registry
            .add_method(class, Method::new(sel("left"), a.clone(), "q@:"), MethodScope::Instance)
            .unwrap();
        registry
            .add_method(class, Method::new(sel("right"), b.clone(), "q@:"), MethodScope::Instance)
            .unwrap();

        let swizzle =
            SelfAwareSwizzle::exchange(class, sel("left"), sel("right"), MethodScope::Instance);
        let twin = swizzle.clone();

        assert_eq!(swizzle.perform(&registry), Ok(true));
        assert_eq!(twin.perform(&registry), Ok(false));
        assert!(twin.is_performed());

        let left = registry
            .own_method(class, &sel("left"), MethodScope::Instance)
            .unwrap();
        assert_eq!(left.imp, b);
    }

    #[test]
    fn test_inherited_selector_gets_own_copy() {
        let registry = ClassRegistry::new();
        let root = registry.add_class("SwizzleRoot", None).unwrap();
        let child = registry.add_class("SwizzleChild", Some(root)).unwrap();
        let inherited = constant(1);
        let replacement = constant(2);
        registry
            .add_method(
                root,
                Method::new(sel("describe"), inherited.clone(), "@@:"),
                MethodScope::Class,
            )
            .unwrap();

        let slot = OriginalSlot::new();
        let swizzle = SelfAwareSwizzle::implementation(
            child,
            sel("describe"),
            MethodScope::Class,
            replacement.clone(),
            slot.clone(),
        );
        assert_eq!(swizzle.perform(&registry), Ok(true));

        assert_eq!(slot.get(), Some(inherited.clone()));
        assert_eq!(
            registry
                .own_method(child, &sel("describe"), MethodScope::Class)
                .unwrap()
                .imp,
            replacement
        );
        assert_eq!(
            registry
                .own_method(root, &sel("describe"), MethodScope::Class)
                .unwrap()
                .imp,
            inherited
        );
    }

    #[test]
    fn test_missing_selector_leaves_swizzle_pending() {
        let registry = ClassRegistry::new();
        let class = registry.add_class("SwizzleMissing", None).unwrap();
        let swizzle = SelfAwareSwizzle::implementation(
            class,
            sel("absent"),
            MethodScope::Instance,
            constant(0),
            OriginalSlot::new(),
        );

        assert!(matches!(
            swizzle.perform(&registry),
            Err(Error::SelectorNotFound { .. })
        ));
        assert!(!swizzle.is_performed());
    }

    #[test]
    fn test_equality_ignores_token_and_slot() {
        let class = ClassId::from_index(3);
        let replacement = constant(0);
        let a = SelfAwareSwizzle::implementation(
            class,
            sel("eq"),
            MethodScope::Instance,
            replacement.clone(),
            OriginalSlot::new(),
        );
        let b = SelfAwareSwizzle::implementation(
            class,
            sel("eq"),
            MethodScope::Instance,
            replacement,
            OriginalSlot::new(),
        );
        let c = SelfAwareSwizzle::implementation(
            class,
            sel("eq"),
            MethodScope::Class,
            constant(0),
            OriginalSlot::new(),
        );

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        let swizzle = SelfAwareSwizzle::exchange(
            ClassId::from_index(1),
            sel("viewDidLoad"),
            sel("nest_viewDidLoad"),
            MethodScope::Instance,
        );
        assert_eq!(
            swizzle.to_string(),
            "[class#1 -viewDidLoad <-> -nest_viewDidLoad]"
        );
    }
}
