//! Dynamic property synthesis.
//!
//! The [`Synthesizer`] ties the class descriptor table and the process-wide
//! implementation registry together. When a message to a dynamic accessor
//! misses the method table, [`Synthesizer::try_resolve_and_install`]:
//!
//! 1. finds the accessor description for the selector (preparing the class
//!    and searching ancestors),
//! 2. finds a body for the accessor's type encoding and ownership, first in
//!    class-specific registrations up the descriptor chain, then in the
//!    process-wide registry,
//! 3. installs the body on the class through [`MethodTable::install`].
//!
//! Installation is first-install-wins, so repeated or racing resolutions of
//! the same accessor all end up with the same body.
//!
//! A synthesized body is inherited like any other method. When a subclass
//! redeclares the property, [`Synthesizer::is_shadowed`] reports that the
//! inherited body belongs to the ancestor's declaration so the dispatcher
//! synthesizes the subclass's own accessor instead.

use crate::error::{Error, Result};
use crate::runtime::descriptor::{AccessorDescription, ClassDescriptorTable};
use crate::runtime::implementation::{
    AccessorKind, ImplementationKey, ImplementationRegistry,
};
use crate::runtime::property::{AccessorAttributes, PropertyAttribute, PropertyAttributes};
use crate::runtime::{ClassId, Imp, Installation, Method, MethodScope, MethodTable, Selector};
use fxhash::FxHashMap;
use std::sync::{Arc, RwLock};

/// Class descriptors plus the process-wide accessor bodies.
#[derive(Default)]
pub struct Synthesizer {
    descriptors: ClassDescriptorTable,
    implementations: ImplementationRegistry,
    /// Property each synthesized method was built for.
    installed: RwLock<FxHashMap<(ClassId, Selector), Arc<PropertyAttributes>>>,
}

impl Synthesizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn descriptors(&self) -> &ClassDescriptorTable {
        &self.descriptors
    }

    #[must_use]
    pub fn implementations(&self) -> &ImplementationRegistry {
        &self.implementations
    }

    /// Records a property declaration on `class`. Parsing is deferred until
    /// the class is next queried.
    pub fn class_did_add_property(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        raw_name: &str,
        attributes: &[PropertyAttribute],
    ) {
        self.descriptors
            .get_or_insert(classes, class)
            .append_property(raw_name, attributes);
    }

    /// Checks whether `class` has a descriptor with no queued declarations.
    #[must_use]
    pub fn is_class_prepared(&self, class: ClassId) -> bool {
        self.descriptors
            .get(class)
            .is_some_and(|descriptor| descriptor.is_prepared())
    }

    /// Checks whether `key` names a dynamic property of `class` or one of
    /// its ancestors.
    #[must_use]
    pub fn is_dynamic_property(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        key: &str,
    ) -> bool {
        self.descriptors
            .nearest(classes, class)
            .and_then(|descriptor| descriptor.property_for_key(key))
            .is_some()
    }

    /// Returns the accessor `selector` names on `class`.
    #[must_use]
    pub fn accessor_description(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        selector: &Selector,
    ) -> Option<AccessorDescription> {
        self.descriptors
            .nearest(classes, class)
            .and_then(|descriptor| descriptor.accessor_description(selector))
    }

    /// Returns the name of the property whose accessor `selector` is.
    #[must_use]
    pub fn property_name_for_selector(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        selector: &Selector,
    ) -> Option<String> {
        self.accessor_description(classes, class, selector)
            .map(|accessor| accessor.property.name.clone())
    }

    /// Registers a process-wide accessor body.
    ///
    /// Returns `false` if a body is already registered for the same kind,
    /// encoding and attributes; the existing body is kept.
    pub fn add_implementation(
        &self,
        imp: Imp,
        kind: AccessorKind,
        encoding: &str,
        attributes: AccessorAttributes,
    ) -> bool {
        let key = ImplementationKey::new(kind, encoding, attributes);
        let added = self.implementations.add(&key, imp);
        if !added {
            nest_log::debug!("implementation for {key} already registered");
        }
        added
    }

    /// Registers an accessor body for `class` and its descendants,
    /// replacing any earlier class-specific body for the same key.
    pub fn set_class_specific_implementation(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        imp: Imp,
        kind: AccessorKind,
        encoding: &str,
        attributes: AccessorAttributes,
    ) {
        let key = ImplementationKey::new(kind, encoding, attributes);
        self.descriptors
            .get_or_insert(classes, class)
            .set_implementation(&key, imp);
    }

    /// Finds the body for `accessor` as used by `class`: class-specific
    /// bodies up the descriptor chain first, then process-wide bodies.
    #[must_use]
    pub fn implementation_for(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        accessor: &AccessorDescription,
    ) -> Option<Imp> {
        let key = accessor.implementation_key();
        self.descriptors
            .nearest(classes, class)
            .and_then(|descriptor| descriptor.implementation(&key))
            .or_else(|| self.implementations.get(&key))
    }

    /// Resolves `selector` as a dynamic accessor of `class` and installs its
    /// body as an instance method of `class`.
    ///
    /// Returns the body now in place, which is the previously installed one
    /// if the class already had a method for `selector`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotDynamicAccessor`] if `selector` is not an accessor of a
    ///   dynamic property of `class` or its ancestors.
    /// - [`Error::MissingImplementation`] if no body is registered for the
    ///   accessor's type encoding and ownership.
    /// - [`Error::UnknownClass`] if `class` is not in `classes`.
    ///
    /// # Panics
    ///
    /// Panics if a lock is poisoned.
    pub fn try_resolve_and_install(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        selector: &Selector,
    ) -> Result<Imp> {
        let accessor = self
            .accessor_description(classes, class, selector)
            .ok_or_else(|| Error::NotDynamicAccessor {
                selector: selector.name().to_string(),
            })?;

        let Some(imp) = self.implementation_for(classes, class, &accessor) else {
            let class_name = classes
                .class_name(class)
                .unwrap_or_else(|| class.to_string());
            let key = accessor.implementation_key().to_string();
            nest_log::error!(
                "no implementation for {class_name} '{selector}' ({key})"
            );
            return Err(Error::MissingImplementation {
                class: class_name,
                selector: selector.name().to_string(),
                key,
            });
        };

        self.installed
            .write()
            .unwrap()
            .entry((class, *selector))
            .or_insert_with(|| Arc::clone(&accessor.property));

        let method = Method::new(*selector, imp.clone(), &accessor.encoding);
        match classes.install(class, method, MethodScope::Instance)? {
            Installation::Installed => {
                nest_log::debug!(
                    "{class}: synthesized {} '{selector}' for '{}'",
                    accessor.kind,
                    accessor.property.name
                );
                Ok(imp)
            }
            Installation::AlreadyPresent(existing) => Ok(existing),
        }
    }

    /// Checks whether the instance method `class` inherits for `selector`
    /// was synthesized for a declaration that `class` or a nearer ancestor
    /// redeclares.
    ///
    /// Returns `false` when `class` defines `selector` itself, when the
    /// inherited method was not synthesized, or when it was synthesized for
    /// the declaration `class` sees.
    ///
    /// # Panics
    ///
    /// Panics if a lock is poisoned.
    #[must_use]
    pub fn is_shadowed(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        selector: &Selector,
    ) -> bool {
        let origin = {
            let installed = self.installed.read().unwrap();
            if installed.is_empty() {
                return false;
            }
            let defining = std::iter::successors(Some(class), |c| classes.superclass(*c))
                .find(|c| classes.own_method(*c, selector, MethodScope::Instance).is_some());
            match defining {
                Some(defining) if defining != class => {
                    match installed.get(&(defining, *selector)) {
                        Some(property) => Arc::clone(property),
                        None => return false,
                    }
                }
                _ => return false,
            }
        };

        self.accessor_description(classes, class, selector)
            .is_some_and(|accessor| !Arc::ptr_eq(&accessor.property, &origin))
    }

    /// Boolean form of [`Synthesizer::try_resolve_and_install`].
    pub fn resolve_and_install(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
        selector: &Selector,
    ) -> bool {
        self.try_resolve_and_install(classes, class, selector).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::property::parse_attribute_string;
    use crate::runtime::{ClassRegistry, Value};
    use std::str::FromStr;

    fn sel(name: &str) -> Selector {
        Selector::from_str(name).unwrap()
    }

    fn body() -> Imp {
        Imp::new(|_, _| Ok(Value::Nil))
    }

    #[test]
    fn test_unknown_selector_is_not_an_accessor() {
        let registry = ClassRegistry::new();
        let class = registry.add_class("SynthPlain", None).unwrap();
        let synth = Synthesizer::new();

        assert_eq!(
            synth.try_resolve_and_install(&registry, class, &sel("missing")),
            Err(Error::NotDynamicAccessor {
                selector: "missing".to_string()
            })
        );
        assert!(!synth.resolve_and_install(&registry, class, &sel("missing")));
    }

    #[test]
    fn test_missing_implementation() {
        let registry = ClassRegistry::new();
        let class = registry.add_class("SynthGap", None).unwrap();
        let synth = Synthesizer::new();
        synth.class_did_add_property(
            &registry,
            class,
            "point",
            &parse_attribute_string("T{CGPoint=dd},D"),
        );

        let result = synth.try_resolve_and_install(&registry, class, &sel("point"));
        assert!(matches!(result, Err(Error::MissingImplementation { .. })));
        assert!(registry
            .own_method(class, &sel("point"), MethodScope::Instance)
            .is_none());
    }

    #[test]
    fn test_shadowed_only_for_synthesized_inherited_accessors() {
        let registry = ClassRegistry::new();
        let base = registry.add_class("SynthBase", None).unwrap();
        let derived = registry.add_class("SynthDerived", Some(base)).unwrap();
        let plain = registry.add_class("SynthPlainChild", Some(base)).unwrap();
        let synth = Synthesizer::new();
        for attributes in [AccessorAttributes::NONATOMIC, AccessorAttributes::RETAIN | AccessorAttributes::NONATOMIC] {
            synth.add_implementation(body(), AccessorKind::Getter, "@", attributes);
        }
        synth.class_did_add_property(&registry, base, "owner", &parse_attribute_string("T@,N,D"));
        synth.class_did_add_property(&registry, derived, "owner", &parse_attribute_string("T@,&,N,D"));

        assert!(!synth.is_shadowed(&registry, derived, &sel("owner")));
        synth.try_resolve_and_install(&registry, base, &sel("owner")).unwrap();

        assert!(!synth.is_shadowed(&registry, base, &sel("owner")));
        assert!(!synth.is_shadowed(&registry, plain, &sel("owner")));
        assert!(synth.is_shadowed(&registry, derived, &sel("owner")));

        synth.try_resolve_and_install(&registry, derived, &sel("owner")).unwrap();
        assert!(!synth.is_shadowed(&registry, derived, &sel("owner")));

        // Hand-written methods are never shadowed
        registry
            .add_method(base, Method::new(sel("label"), body(), "@@:"), MethodScope::Instance)
            .unwrap();
        synth.class_did_add_property(&registry, derived, "label", &parse_attribute_string("T@,N,D"));
        assert!(!synth.is_shadowed(&registry, derived, &sel("label")));
    }

    #[test]
    fn test_install_is_idempotent() {
        let registry = ClassRegistry::new();
        let class = registry.add_class("SynthTwice", None).unwrap();
        let synth = Synthesizer::new();
        let imp = body();
        synth.add_implementation(
            imp.clone(),
            AccessorKind::Getter,
            "q",
            AccessorAttributes::NONATOMIC,
        );
        synth.class_did_add_property(
            &registry,
            class,
            "count",
            &parse_attribute_string("Tq,N,D"),
        );

        let first = synth.try_resolve_and_install(&registry, class, &sel("count"));
        let second = synth.try_resolve_and_install(&registry, class, &sel("count"));
        assert_eq!(first, Ok(imp.clone()));
        assert_eq!(second, Ok(imp));
        assert_eq!(synth.implementations().len(), 1);

        let method = registry
            .own_method(class, &sel("count"), MethodScope::Instance)
            .unwrap();
        assert_eq!(method.types, "q@:");
    }

    #[test]
    fn test_class_specific_wins_over_global() {
        let registry = ClassRegistry::new();
        let root = registry.add_class("SynthRoot", None).unwrap();
        let child = registry.add_class("SynthChild", Some(root)).unwrap();
        let synth = Synthesizer::new();
        let global = body();
        let bespoke = body();

        synth.add_implementation(
            global.clone(),
            AccessorKind::Getter,
            "@",
            AccessorAttributes::RETAIN,
        );
        synth.set_class_specific_implementation(
            &registry,
            root,
            bespoke.clone(),
            AccessorKind::Getter,
            "@",
            AccessorAttributes::RETAIN,
        );
        synth.class_did_add_property(
            &registry,
            child,
            "owner",
            &parse_attribute_string("T@,&,D"),
        );

        let installed = synth
            .try_resolve_and_install(&registry, child, &sel("owner"))
            .unwrap();
        assert_eq!(installed, bespoke);
    }

    #[test]
    fn test_dynamic_property_queries() {
        let registry = ClassRegistry::new();
        let root = registry.add_class("SynthQueryRoot", None).unwrap();
        let child = registry.add_class("SynthQueryChild", Some(root)).unwrap();
        let synth = Synthesizer::new();
        synth.class_did_add_property(
            &registry,
            root,
            "name",
            &parse_attribute_string("T@\"NSString\",C,N,D"),
        );

        assert!(!synth.is_class_prepared(root));
        assert!(synth.is_dynamic_property(&registry, child, "name"));
        assert!(synth.is_class_prepared(root));
        assert!(!synth.is_dynamic_property(&registry, child, "other"));
        assert_eq!(
            synth.property_name_for_selector(&registry, child, &sel("setName:")),
            Some("name".to_string())
        );
    }
}
