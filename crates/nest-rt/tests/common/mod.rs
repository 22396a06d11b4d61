// Common test utilities for integration tests
//
// Shared fixtures: fresh runtimes, unique class names and recording
// launch task handlers.

#![allow(dead_code)]

use nest_rt::runtime::launch::{ContextCleanup, TaskHandler};
use nest_rt::runtime::property::parse_attribute_string;
use nest_rt::{ClassId, Imp, MethodScope, MethodTable, Runtime, RuntimeConfig, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

static CLASS_ID: AtomicUsize = AtomicUsize::new(0);

/// Returns `prefix` with a process-unique suffix
pub fn unique_name(prefix: &str) -> String {
    let id = CLASS_ID.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}_{id}")
}

/// Creates a runtime with default settings
pub fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default())
}

/// Creates a runtime without the built-in launch tasks
pub fn bare_runtime() -> Runtime {
    Runtime::new(
        RuntimeConfig::default()
            .with_default_launch_task_prefix(None)
            .with_self_aware_swizzle_prefix(None),
    )
}

/// Registers a class under a unique name
pub fn create_class(runtime: &Runtime, prefix: &str, parent: Option<ClassId>) -> ClassId {
    runtime
        .add_class(&unique_name(prefix), parent)
        .expect("Failed to create test class")
}

/// Declares a property from an attribute string such as `T@,C,N,D`
pub fn declare(runtime: &Runtime, class: ClassId, name: &str, attributes: &str) {
    runtime
        .declare_property(class, name, &parse_attribute_string(attributes))
        .expect("Failed to declare property");
}

/// Adds a class method returning `nil`
pub fn add_noop_class_method(runtime: &Runtime, class: ClassId, name: &str) {
    runtime
        .add_method(
            class,
            name,
            "v@:",
            MethodScope::Class,
            Imp::new(|_, _| Ok(Value::Nil)),
        )
        .expect("Failed to add class method");
}

/// Ordered record of launch task activity
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Handler appending `"{tag}:{class name}+{selector}"` for each match
pub fn recording_handler(tag: &str, journal: &Journal) -> TaskHandler {
    let tag = tag.to_string();
    let journal = Arc::clone(journal);
    TaskHandler::new(move |task| {
        let class_name = task
            .runtime()
            .classes()
            .class_name(task.owner())
            .unwrap_or_default();
        journal
            .lock()
            .unwrap()
            .push(format!("{tag}:{class_name}+{}", task.selector()));
        Ok(())
    })
}

/// Cleanup appending `"{tag}:cleanup"`
pub fn recording_cleanup(tag: &str, journal: &Journal) -> ContextCleanup {
    let tag = tag.to_string();
    let journal = Arc::clone(journal);
    ContextCleanup::new(move |_| {
        journal.lock().unwrap().push(format!("{tag}:cleanup"));
    })
}
