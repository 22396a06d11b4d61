//! Class descriptors: per-class records of dynamic properties.
//!
//! A [`ClassDescriptor`] collects the property declarations of one class.
//! Declarations are queued as they arrive and parsed lazily the first time
//! the descriptor is asked about an accessor ("prepare"). Preparation runs
//! at every query, so a property declared after first use is picked up by
//! the next query that needs it.
//!
//! Descriptors form a parent-pointer forest mirroring the class hierarchy:
//! each descriptor links to the descriptor of its nearest ancestor that has
//! one. Accessor queries walk that chain iteratively, so a subclass that
//! redeclares a property shadows the ancestor's declaration.

use crate::runtime::implementation::{
    AccessorKind, ImplementationKey, ImplementationRegistry,
};
use crate::runtime::property::{PropertyAttribute, PropertyAttributes};
use crate::runtime::{ClassId, Imp, MethodTable, Selector};
use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};

/// A getter or setter of one dynamic property.
#[derive(Debug, Clone)]
pub struct AccessorDescription {
    pub kind: AccessorKind,
    pub property: Arc<PropertyAttributes>,
    /// Type encoding of the accessor method, e.g. `@@:` or `v@:q`.
    pub encoding: String,
}

impl AccessorDescription {
    #[must_use]
    pub fn new(kind: AccessorKind, property: Arc<PropertyAttributes>) -> Self {
        let value = if property.type_encoding.is_empty() {
            "?"
        } else {
            property.type_encoding.as_str()
        };
        let encoding = match kind {
            AccessorKind::Getter => format!("{value}@:"),
            AccessorKind::Setter => format!("v@:{value}"),
        };
        AccessorDescription {
            kind,
            property,
            encoding,
        }
    }

    /// Returns the selector name this accessor answers to.
    #[must_use]
    pub fn selector_name(&self) -> &str {
        match self.kind {
            AccessorKind::Getter => &self.property.getter_name,
            AccessorKind::Setter => &self.property.setter_name,
        }
    }

    /// Returns the key accessor bodies are registered under.
    #[must_use]
    pub fn implementation_key(&self) -> ImplementationKey {
        ImplementationKey::new(
            self.kind,
            &self.property.type_encoding,
            self.property.accessor_attributes(),
        )
    }
}

#[derive(Default)]
struct DescriptorState {
    prepared: bool,
    pending: VecDeque<(String, Vec<PropertyAttribute>)>,
    properties: Vec<Arc<PropertyAttributes>>,
    accessors: FxHashMap<Selector, AccessorDescription>,
    by_key: FxHashMap<String, Arc<PropertyAttributes>>,
}

impl DescriptorState {
    fn prepare(&mut self, class: ClassId) {
        if self.prepared {
            return;
        }

        while let Some((raw_name, attributes)) = self.pending.pop_front() {
            let property = PropertyAttributes::parse(&raw_name, &attributes);
            if !property.is_dynamic {
                nest_log::trace!(
                    "{class}: skipping non-dynamic property '{raw_name}'"
                );
                continue;
            }
            self.process(class, Arc::new(property));
        }

        self.prepared = true;
    }

    fn process(&mut self, class: ClassId, property: Arc<PropertyAttributes>) {
        // A redeclaration in the same class replaces the earlier one
        if let Some(previous) = self.by_key.remove(&property.name) {
            self.properties.retain(|p| !Arc::ptr_eq(p, &previous));
            self.accessors
                .retain(|_, accessor| !Arc::ptr_eq(&accessor.property, &previous));
        }

        let mut kinds = vec![AccessorKind::Getter];
        if !property.is_read_only {
            kinds.push(AccessorKind::Setter);
        }

        for kind in kinds {
            let accessor = AccessorDescription::new(kind, Arc::clone(&property));
            match Selector::from_str(accessor.selector_name()) {
                Ok(selector) => {
                    self.accessors.insert(selector, accessor);
                }
                Err(err) => {
                    nest_log::warn!(
                        "{class}: property '{}' has no usable {kind} name: {err}",
                        property.name
                    );
                }
            }
        }

        nest_log::debug!(
            "{class}: prepared dynamic property '{}' ({})",
            property.name,
            property.accessor_attributes()
        );
        self.by_key.insert(property.name.clone(), Arc::clone(&property));
        self.properties.push(property);
    }
}

/// Dynamic property record of one class.
pub struct ClassDescriptor {
    class: ClassId,
    state: Mutex<DescriptorState>,
    parent: RwLock<Option<Arc<ClassDescriptor>>>,
    implementations: ImplementationRegistry,
}

impl ClassDescriptor {
    #[must_use]
    pub fn new(class: ClassId) -> Self {
        ClassDescriptor {
            class,
            state: Mutex::new(DescriptorState::default()),
            parent: RwLock::new(None),
            implementations: ImplementationRegistry::new(),
        }
    }

    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Queues a property declaration for the next preparation.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    pub fn append_property(&self, raw_name: &str, attributes: &[PropertyAttribute]) {
        let mut state = self.state.lock().unwrap();
        state
            .pending
            .push_back((raw_name.to_string(), attributes.to_vec()));
        state.prepared = false;
    }

    /// Parses every queued declaration. Does nothing if nothing is queued.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    pub fn prepare_if_needed(&self) {
        self.state.lock().unwrap().prepare(self.class);
    }

    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.state.lock().unwrap().prepared
    }

    /// Returns the dynamic properties declared on this class, in
    /// declaration order.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn properties(&self) -> Vec<Arc<PropertyAttributes>> {
        let mut state = self.state.lock().unwrap();
        state.prepare(self.class);
        state.properties.clone()
    }

    fn own_accessor(&self, selector: &Selector) -> Option<AccessorDescription> {
        let mut state = self.state.lock().unwrap();
        state.prepare(self.class);
        state.accessors.get(selector).cloned()
    }

    fn own_property(&self, key: &str) -> Option<Arc<PropertyAttributes>> {
        let mut state = self.state.lock().unwrap();
        state.prepare(self.class);
        state.by_key.get(key).cloned()
    }

    /// Returns the accessor `selector` names on this class or the nearest
    /// ancestor declaring it.
    ///
    /// # Panics
    ///
    /// Panics if a lock is poisoned.
    #[must_use]
    pub fn accessor_description(
        self: &Arc<Self>,
        selector: &Selector,
    ) -> Option<AccessorDescription> {
        self.ancestry()
            .find_map(|descriptor| descriptor.own_accessor(selector))
    }

    /// Returns the dynamic property named `key` on this class or the
    /// nearest ancestor declaring it.
    ///
    /// # Panics
    ///
    /// Panics if a lock is poisoned.
    #[must_use]
    pub fn property_for_key(
        self: &Arc<Self>,
        key: &str,
    ) -> Option<Arc<PropertyAttributes>> {
        self.ancestry().find_map(|descriptor| descriptor.own_property(key))
    }

    /// Returns the accessor description for `key` and `kind`, searching
    /// ancestors.
    #[must_use]
    pub fn accessor_description_for_key(
        self: &Arc<Self>,
        key: &str,
        kind: AccessorKind,
    ) -> Option<AccessorDescription> {
        let property = self.property_for_key(key)?;
        if kind == AccessorKind::Setter && property.is_read_only {
            return None;
        }
        Some(AccessorDescription::new(kind, property))
    }

    /// Registers a body used only by this class and its descendants,
    /// replacing any earlier one for the same key.
    pub fn set_implementation(&self, key: &ImplementationKey, imp: Imp) {
        self.implementations.set(key, imp);
    }

    /// Returns the class-specific body for `key` registered on this class
    /// or the nearest ancestor.
    #[must_use]
    pub fn implementation(self: &Arc<Self>, key: &ImplementationKey) -> Option<Imp> {
        self.ancestry()
            .find_map(|descriptor| descriptor.implementations.get(key))
    }

    /// # Panics
    ///
    /// Panics if the parent lock is poisoned.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<ClassDescriptor>> {
        self.parent.read().unwrap().clone()
    }

    fn set_parent(&self, parent: Option<Arc<ClassDescriptor>>) {
        *self.parent.write().unwrap() = parent;
    }

    /// Iterates over this descriptor and its ancestors, nearest first.
    fn ancestry(self: &Arc<Self>) -> impl Iterator<Item = Arc<ClassDescriptor>> {
        std::iter::successors(Some(Arc::clone(self)), |descriptor| {
            descriptor.parent()
        })
    }
}

/// Class descriptors by class.
#[derive(Default)]
pub struct ClassDescriptorTable {
    descriptors: RwLock<FxHashMap<ClassId, Arc<ClassDescriptor>>>,
}

impl ClassDescriptorTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor of `class` itself.
    ///
    /// # Panics
    ///
    /// Panics if the table lock is poisoned.
    #[must_use]
    pub fn get(&self, class: ClassId) -> Option<Arc<ClassDescriptor>> {
        self.descriptors.read().unwrap().get(&class).cloned()
    }

    /// Returns the descriptor of `class`, creating it if needed.
    ///
    /// A new descriptor links to the descriptor of its nearest described
    /// ancestor, and descriptors of descendants that linked past `class`
    /// are re-linked to it.
    ///
    /// # Panics
    ///
    /// Panics if the table lock is poisoned.
    pub fn get_or_insert(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
    ) -> Arc<ClassDescriptor> {
        if let Some(existing) = self.get(class) {
            return existing;
        }

        let mut descriptors = self.descriptors.write().unwrap();
        if let Some(existing) = descriptors.get(&class) {
            return Arc::clone(existing);
        }

        let descriptor = Arc::new(ClassDescriptor::new(class));
        descriptor.set_parent(nearest_ancestor(&descriptors, classes, class));
        descriptors.insert(class, Arc::clone(&descriptor));

        for (other, existing) in descriptors.iter() {
            if *other != class && classes.is_subclass_of(*other, class) {
                existing.set_parent(nearest_ancestor(&descriptors, classes, *other));
            }
        }

        nest_log::debug!("created class descriptor for {class}");
        descriptor
    }

    /// Returns the descriptor of `class` or of its nearest described
    /// ancestor.
    ///
    /// # Panics
    ///
    /// Panics if the table lock is poisoned.
    #[must_use]
    pub fn nearest(
        &self,
        classes: &dyn MethodTable,
        class: ClassId,
    ) -> Option<Arc<ClassDescriptor>> {
        let descriptors = self.descriptors.read().unwrap();
        let mut current = Some(class);
        while let Some(cls) = current {
            if let Some(descriptor) = descriptors.get(&cls) {
                return Some(Arc::clone(descriptor));
            }
            current = classes.superclass(cls);
        }
        None
    }

    /// # Panics
    ///
    /// Panics if the table lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Nearest strict ancestor of `class` that has a descriptor.
fn nearest_ancestor(
    descriptors: &FxHashMap<ClassId, Arc<ClassDescriptor>>,
    classes: &dyn MethodTable,
    class: ClassId,
) -> Option<Arc<ClassDescriptor>> {
    let mut current = classes.superclass(class);
    while let Some(cls) = current {
        if let Some(descriptor) = descriptors.get(&cls) {
            return Some(Arc::clone(descriptor));
        }
        current = classes.superclass(cls);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::property::parse_attribute_string;
    use crate::runtime::ClassRegistry;

    fn sel(name: &str) -> Selector {
        Selector::from_str(name).unwrap()
    }

    #[test]
    fn test_accessor_encodings() {
        let property =
            Arc::new(PropertyAttributes::from_attribute_string("count", "Tq,D"));
        let getter = AccessorDescription::new(AccessorKind::Getter, Arc::clone(&property));
        let setter = AccessorDescription::new(AccessorKind::Setter, property);
        assert_eq!(getter.encoding, "q@:");
        assert_eq!(setter.encoding, "v@:q");
        assert_eq!(getter.selector_name(), "count");
        assert_eq!(setter.selector_name(), "setCount:");

        let untyped = Arc::new(PropertyAttributes::from_attribute_string("x", "D"));
        let getter = AccessorDescription::new(AccessorKind::Getter, untyped);
        assert_eq!(getter.encoding, "?@:");
    }

    #[test]
    fn test_prepare_is_lazy_and_repeatable() {
        let descriptor = Arc::new(ClassDescriptor::new(ClassId::from_index(0)));
        descriptor.append_property("title", &parse_attribute_string("T@,C,D"));
        assert!(!descriptor.is_prepared());

        assert!(descriptor.accessor_description(&sel("title")).is_some());
        assert!(descriptor.is_prepared());

        descriptor.prepare_if_needed();
        assert!(descriptor.is_prepared());

        descriptor.append_property("subtitle", &parse_attribute_string("T@,C,D"));
        assert!(!descriptor.is_prepared());
        assert!(descriptor.accessor_description(&sel("setSubtitle:")).is_some());
        assert_eq!(descriptor.properties().len(), 2);
    }

    #[test]
    fn test_non_dynamic_properties_are_dropped() {
        let descriptor = Arc::new(ClassDescriptor::new(ClassId::from_index(0)));
        descriptor.append_property("stored", &parse_attribute_string("Tq,V_stored"));
        assert!(descriptor.accessor_description(&sel("stored")).is_none());
        assert!(descriptor.property_for_key("stored").is_none());
        assert!(descriptor.properties().is_empty());
    }

    #[test]
    fn test_read_only_has_no_setter() {
        let descriptor = Arc::new(ClassDescriptor::new(ClassId::from_index(0)));
        descriptor.append_property("identifier", &parse_attribute_string("T@,R,D"));
        assert!(descriptor.accessor_description(&sel("identifier")).is_some());
        assert!(descriptor
            .accessor_description(&sel("setIdentifier:"))
            .is_none());
        assert!(descriptor
            .accessor_description_for_key("identifier", AccessorKind::Setter)
            .is_none());
    }

    #[test]
    fn test_redeclaration_replaces() {
        let descriptor = Arc::new(ClassDescriptor::new(ClassId::from_index(0)));
        descriptor.append_property("value", &parse_attribute_string("T@,C,D"));
        descriptor.append_property("value", &parse_attribute_string("T@,&,D"));

        let getter = descriptor.accessor_description(&sel("value")).unwrap();
        assert!(getter.property.is_retain);
        assert_eq!(descriptor.properties().len(), 1);
    }

    #[test]
    fn test_parent_links_follow_insertion() {
        let registry = ClassRegistry::new();
        let root = registry.add_class("DescRoot", None).unwrap();
        let middle = registry.add_class("DescMiddle", Some(root)).unwrap();
        let leaf = registry.add_class("DescLeaf", Some(middle)).unwrap();
        let table = ClassDescriptorTable::new();

        let leaf_desc = table.get_or_insert(&registry, leaf);
        assert!(leaf_desc.parent().is_none());

        let root_desc = table.get_or_insert(&registry, root);
        assert_eq!(leaf_desc.parent().unwrap().class(), root);
        assert!(root_desc.parent().is_none());

        table.get_or_insert(&registry, middle);
        assert_eq!(leaf_desc.parent().unwrap().class(), middle);
        assert_eq!(table.get(middle).unwrap().parent().unwrap().class(), root);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_nearest_descriptor() {
        let registry = ClassRegistry::new();
        let root = registry.add_class("NearRoot", None).unwrap();
        let child = registry.add_class("NearChild", Some(root)).unwrap();
        let table = ClassDescriptorTable::new();

        assert!(table.nearest(&registry, child).is_none());
        table.get_or_insert(&registry, root);
        assert_eq!(table.nearest(&registry, child).unwrap().class(), root);
    }

    #[test]
    fn test_class_specific_implementation_inherits() {
        let registry = ClassRegistry::new();
        let root = registry.add_class("ImplRoot", None).unwrap();
        let child = registry.add_class("ImplChild", Some(root)).unwrap();
        let table = ClassDescriptorTable::new();
        let root_desc = table.get_or_insert(&registry, root);
        let child_desc = table.get_or_insert(&registry, child);

        let key = ImplementationKey::new(
            AccessorKind::Getter,
            "@",
            crate::runtime::property::AccessorAttributes::NONE,
        );
        let imp = Imp::new(|_, _| Ok(crate::runtime::Value::Nil));
        root_desc.set_implementation(&key, imp.clone());

        assert_eq!(child_desc.implementation(&key), Some(imp));
    }
}
