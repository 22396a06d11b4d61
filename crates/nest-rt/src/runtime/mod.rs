//! Nest runtime module.
//!
//! This module provides the object model the runtime operates on and the
//! two engines built on it:
//!
//! - [`selector`], [`class`], [`object`], [`value`], [`message`]: selectors,
//!   the class arena and [`MethodTable`], objects and message contexts
//! - [`property`], [`descriptor`], [`implementation`], [`synthesizer`],
//!   [`accessors`]: dynamic property synthesis
//! - [`launch`], [`swizzle`], [`entry`]: launch tasks, self-aware swizzles
//!   and the entry-point injection that fires them
//!
//! # Runtime context
//!
//! All process-wide tables live in a [`Runtime`]. Tests and embedders build
//! fresh contexts with [`Runtime::new`]; code that wants a single shared
//! context uses [`Runtime::global`], which is built on first use and never
//! torn down.
//!
//! # Example
//!
//! ```rust
//! use nest_rt::runtime::property::parse_attribute_string;
//! use nest_rt::{Runtime, RuntimeConfig, Value};
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let person = runtime.add_class("Person", None).unwrap();
//! runtime
//!     .declare_property(person, "name", &parse_attribute_string("T@\"NSString\",C,N,D"))
//!     .unwrap();
//!
//! let alice = runtime.instantiate(person).unwrap();
//! runtime.send_message(&alice, "setName:", &[Value::from("Alice")]).unwrap();
//! assert_eq!(runtime.send_message(&alice, "name", &[]).unwrap(), Value::from("Alice"));
//! ```

pub mod accessors;
pub mod class;
pub mod descriptor;
pub mod entry;
pub mod implementation;
pub mod launch;
pub mod message;
pub mod object;
pub mod property;
pub mod selector;
pub mod swizzle;
pub mod synthesizer;
pub mod value;

pub use class::{
    ClassId, ClassRegistry, Imp, ImpFn, Installation, Method, MethodScope,
    MethodTable,
};
pub use descriptor::{AccessorDescription, ClassDescriptor, ClassDescriptorTable};
pub use implementation::{AccessorKind, ImplementationKey, ImplementationRegistry};
pub use launch::{
    ContextCleanup, LaunchContext, LaunchReport, LaunchTaskId, LaunchTaskInfo,
    LaunchTaskInvocation, LaunchTaskScheduler, TaskHandler,
};
pub use message::{Message, Receiver};
pub use object::{Object, WeakObject};
pub use property::{AccessorAttributes, PropertyAttribute, PropertyAttributes};
pub use selector::Selector;
pub use swizzle::{OriginalSlot, SelfAwareSwizzle, SwizzleSource};
pub use synthesizer::Synthesizer;
pub use value::Value;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use fxhash::FxHashSet;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock, RwLock};

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// Process-wide runtime state: classes, property descriptors, accessor
/// bodies and launch tasks.
pub struct Runtime {
    config: RuntimeConfig,
    classes: ClassRegistry,
    synthesizer: Synthesizer,
    launch_tasks: LaunchTaskScheduler,
    /// Delegate classes the launch performer was injected into.
    injected: Mutex<FxHashSet<ClassId>>,
    /// Bodies installed as launch performers.
    performers: RwLock<Vec<Imp>>,
}

impl Runtime {
    /// Builds a fresh context.
    ///
    /// Registers the default accessor bodies and the default and swizzle
    /// launch tasks, as configured.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        if let Some(level) = config.log_level {
            nest_log::set_level(level);
        }

        let runtime = Runtime {
            classes: ClassRegistry::new(),
            synthesizer: Synthesizer::new(),
            launch_tasks: LaunchTaskScheduler::new(config.launch_task_prefix_limit),
            injected: Mutex::new(FxHashSet::default()),
            performers: RwLock::new(Vec::new()),
            config,
        };

        if runtime.config.install_default_accessors {
            accessors::install_defaults(&runtime.synthesizer);
        }
        if let Some(prefix) = &runtime.config.self_aware_swizzle_prefix {
            runtime
                .launch_tasks
                .register(swizzle::self_aware_swizzle_task(prefix));
        }
        if let Some(prefix) = &runtime.config.default_launch_task_prefix {
            runtime.launch_tasks.register(LaunchTaskInfo::new(
                prefix,
                launch::default_task_handler(),
            ));
        }

        nest_log::info!("runtime initialized");
        runtime
    }

    /// Returns the process-wide context, building it from
    /// [`RuntimeConfig::from_env`] on first use.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| Runtime::new(RuntimeConfig::from_env()))
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    #[must_use]
    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    #[must_use]
    pub fn launch_tasks(&self) -> &LaunchTaskScheduler {
        &self.launch_tasks
    }

    /// Registers a class.
    ///
    /// # Errors
    ///
    /// See [`ClassRegistry::add_class`].
    pub fn add_class(&self, name: &str, superclass: Option<ClassId>) -> Result<ClassId> {
        self.classes.add_class(name, superclass)
    }

    /// Adds or overwrites a method and returns its selector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] for an empty name or
    /// [`Error::UnknownClass`] for an unregistered class.
    pub fn add_method(
        &self,
        class: ClassId,
        name: &str,
        types: &str,
        scope: MethodScope,
        imp: Imp,
    ) -> Result<Selector> {
        let selector = Selector::from_str(name)?;
        self.classes
            .add_method(class, Method::new(selector, imp, types), scope)?;
        Ok(selector)
    }

    /// Creates an instance of `class`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClass`] if `class` is not registered.
    pub fn instantiate(&self, class: ClassId) -> Result<Object> {
        if !self.classes.contains(class) {
            return Err(Error::UnknownClass { class });
        }
        Ok(Object::new(class))
    }

    /// Declares a property on `class`. Only properties with the dynamic
    /// (`D`) attribute get synthesized accessors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClass`] if `class` is not registered.
    pub fn declare_property(
        &self,
        class: ClassId,
        name: &str,
        attributes: &[PropertyAttribute],
    ) -> Result<()> {
        if !self.classes.contains(class) {
            return Err(Error::UnknownClass { class });
        }
        self.synthesizer
            .class_did_add_property(&self.classes, class, name, attributes);
        Ok(())
    }

    /// Registers a process-wide accessor body. See
    /// [`Synthesizer::add_implementation`].
    pub fn add_implementation(
        &self,
        imp: Imp,
        kind: AccessorKind,
        encoding: &str,
        attributes: AccessorAttributes,
    ) -> bool {
        self.synthesizer
            .add_implementation(imp, kind, encoding, attributes)
    }

    /// Registers an accessor body for `class` and its descendants. See
    /// [`Synthesizer::set_class_specific_implementation`].
    pub fn set_class_specific_implementation(
        &self,
        class: ClassId,
        imp: Imp,
        kind: AccessorKind,
        encoding: &str,
        attributes: AccessorAttributes,
    ) {
        self.synthesizer.set_class_specific_implementation(
            &self.classes,
            class,
            imp,
            kind,
            encoding,
            attributes,
        );
    }

    /// Synthesizes the dynamic accessor `selector` on `class`, if it is one.
    pub fn resolve_instance_method(&self, class: ClassId, selector: &Selector) -> bool {
        self.synthesizer
            .resolve_and_install(&self.classes, class, selector)
    }

    /// Returns the property whose accessor `selector` is, on `class` or an
    /// ancestor.
    #[must_use]
    pub fn property_name_for_selector(
        &self,
        class: ClassId,
        selector: &Selector,
    ) -> Option<String> {
        self.synthesizer
            .property_name_for_selector(&self.classes, class, selector)
    }

    /// Sends `selector` to `receiver`.
    ///
    /// A miss on an instance is offered to the synthesizer; if it installs
    /// a dynamic accessor, the send is retried. An inherited accessor that
    /// was synthesized for a declaration the receiver's class redeclares
    /// counts as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectorNotFound`] if the receiver does not respond
    /// to `selector`, or whatever error the method body returns.
    pub fn send(
        &self,
        receiver: impl Into<Receiver>,
        selector: &Selector,
        args: &[Value],
    ) -> Result<Value> {
        let receiver = receiver.into();
        let class = receiver.class();
        let scope = receiver.scope();

        let found = self
            .classes
            .lookup(class, selector, scope)
            .filter(|_| {
                scope != MethodScope::Instance
                    || !self.synthesizer.is_shadowed(&self.classes, class, selector)
            });

        let method = match found {
            Some(method) => method,
            None if scope == MethodScope::Instance => {
                match self
                    .synthesizer
                    .try_resolve_and_install(&self.classes, class, selector)
                {
                    Ok(_) => self
                        .classes
                        .lookup(class, selector, scope)
                        .ok_or_else(|| not_found(selector))?,
                    Err(
                        Error::NotDynamicAccessor { .. }
                        | Error::MissingImplementation { .. },
                    ) => return Err(not_found(selector)),
                    Err(err) => return Err(err),
                }
            }
            None => return Err(not_found(selector)),
        };

        let message = Message::new(self, &receiver, *selector);
        method.imp.call(&message, args)
    }

    /// [`Runtime::send`] with the selector given by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] for an empty name, otherwise see
    /// [`Runtime::send`].
    pub fn send_message(
        &self,
        receiver: impl Into<Receiver>,
        name: &str,
        args: &[Value],
    ) -> Result<Value> {
        let selector = Selector::from_str(name)?;
        self.send(receiver, &selector, args)
    }

    /// Registers a launch task; rejections are logged and reported as
    /// `false`.
    pub fn register_launch_task(&self, info: LaunchTaskInfo) -> bool {
        self.launch_tasks.register(info)
    }

    /// Registers a launch task.
    ///
    /// # Errors
    ///
    /// See [`LaunchTaskScheduler::try_register`].
    pub fn try_register_launch_task(&self, info: LaunchTaskInfo) -> Result<LaunchTaskId> {
        self.launch_tasks.try_register(info)
    }

    /// Fires the launch checkpoint, forwarding `args` to every task.
    ///
    /// Returns `None` if the checkpoint already fired.
    pub fn perform_launch_tasks(&self, args: &[Value]) -> Option<LaunchReport> {
        self.launch_tasks.perform_all(self, args)
    }
}

fn not_found(selector: &Selector) -> Error {
    Error::SelectorNotFound {
        selector: selector.name().to_string(),
    }
}
