//! Nest: launch tasks, self-aware swizzling and dynamic property synthesis
//! for an Objective-C style object runtime.
//!
//! Nest provides two engines on top of a small dynamic object model:
//!
//! - **Launch tasks**: run-once, priority-ordered initialization callbacks
//!   fired at a single launch checkpoint, independent of load order. The
//!   self-aware swizzle is built on them.
//! - **Dynamic property synthesis**: properties declared as dynamic get
//!   their getters and setters on first use, chosen by type encoding and
//!   ownership attributes and shared between every property of the same
//!   shape.
//!
//! # Architecture
//!
//! - [`runtime`]: object model, [`Runtime`] context and both engines
//! - [`config`]: [`RuntimeConfig`]
//! - [`error`]: the crate-wide [`Error`]
//!
//! The object model is reached through the [`MethodTable`] trait, which
//! [`ClassRegistry`] implements in memory.
//!
//! # Example
//!
//! ```rust
//! use nest_rt::runtime::launch::{LaunchTaskInfo, TaskHandler};
//! use nest_rt::{MethodScope, Imp, Runtime, RuntimeConfig, Value};
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let app = runtime.add_class("App", None).unwrap();
//! runtime
//!     .add_method(app, "_Setup_prepare", "v@:", MethodScope::Class, Imp::new(|_, _| Ok(Value::Nil)))
//!     .unwrap();
//!
//! assert!(runtime.register_launch_task(LaunchTaskInfo::new(
//!     "_Setup_",
//!     TaskHandler::new(|task| task.invoke().map(|_| ())),
//! )));
//!
//! let report = runtime.perform_launch_tasks(&[]).unwrap();
//! assert_eq!(report.invocations, 1);
//! assert!(runtime.perform_launch_tasks(&[]).is_none());
//! ```

pub mod config;
pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use runtime::{
    AccessorAttributes, AccessorKind, ClassId, ClassRegistry, Imp,
    Installation, LaunchReport, LaunchTaskInfo, Message, Method, MethodScope,
    MethodTable, Object, PropertyAttribute, PropertyAttributes, Receiver,
    Runtime, SelfAwareSwizzle, Selector, Synthesizer, TaskHandler, Value,
};
