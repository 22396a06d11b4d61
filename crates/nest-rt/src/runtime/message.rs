//! Message context handed to method implementations.

use crate::error::{Error, Result};
use crate::runtime::{ClassId, MethodScope, Object, Runtime, Selector};

/// Target of a message send: an instance, or a class for class methods.
#[derive(Debug, Clone)]
pub enum Receiver {
    Object(Object),
    Class(ClassId),
}

impl Receiver {
    /// Returns the class whose method tables are searched.
    #[must_use]
    pub fn class(&self) -> ClassId {
        match self {
            Receiver::Object(object) => object.class(),
            Receiver::Class(class) => *class,
        }
    }

    /// Returns the method table the receiver dispatches through.
    #[must_use]
    pub const fn scope(&self) -> MethodScope {
        match self {
            Receiver::Object(_) => MethodScope::Instance,
            Receiver::Class(_) => MethodScope::Class,
        }
    }

    #[must_use]
    pub const fn object(&self) -> Option<&Object> {
        match self {
            Receiver::Object(object) => Some(object),
            Receiver::Class(_) => None,
        }
    }
}

impl From<Object> for Receiver {
    fn from(object: Object) -> Self {
        Receiver::Object(object)
    }
}

impl From<&Object> for Receiver {
    fn from(object: &Object) -> Self {
        Receiver::Object(object.clone())
    }
}

impl From<ClassId> for Receiver {
    fn from(class: ClassId) -> Self {
        Receiver::Class(class)
    }
}

/// The `self` and `_cmd` of a running method, plus the runtime it runs in.
pub struct Message<'a> {
    runtime: &'a Runtime,
    receiver: &'a Receiver,
    selector: Selector,
}

impl<'a> Message<'a> {
    #[must_use]
    pub fn new(
        runtime: &'a Runtime,
        receiver: &'a Receiver,
        selector: Selector,
    ) -> Self {
        Message {
            runtime,
            receiver,
            selector,
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    #[must_use]
    pub fn receiver(&self) -> &'a Receiver {
        self.receiver
    }

    #[must_use]
    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// Returns the receiving instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectorNotFound`] when the message was sent to a
    /// class, since instance bodies cannot run without an instance.
    pub fn object(&self) -> Result<&'a Object> {
        self.receiver.object().ok_or_else(|| Error::SelectorNotFound {
            selector: self.selector.name().to_string(),
        })
    }

    /// Returns the name of the dynamic property the running accessor
    /// belongs to.
    ///
    /// Accessor bodies are shared between every property with the same type
    /// and ownership, so this is how a body finds the storage key it
    /// operates on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotDynamicAccessor`] if the selector is not an
    /// accessor of a dynamic property of the receiver's class.
    pub fn property_key(&self) -> Result<String> {
        self.runtime
            .property_name_for_selector(self.receiver.class(), &self.selector)
            .ok_or_else(|| Error::NotDynamicAccessor {
                selector: self.selector.name().to_string(),
            })
    }
}
