//! Launch tasks: run-once, priority-ordered deferred initialization.
//!
//! A launch task is a selector prefix plus a handler. When the launch
//! checkpoint fires, every class method whose selector starts with a
//! registered prefix is handed to that prefix's handler. This gives code
//! that cannot rely on load order a single, well-defined point to do one-off
//! work such as swizzling.
//!
//! # Ordering
//!
//! Tasks run by priority, highest first, and by registration order within
//! one priority. Each task scans every class registered at the time it runs.
//! Matching methods are visited in class registration order and, within a
//! class, by selector name.
//!
//! # Single fire
//!
//! [`LaunchTaskScheduler::perform_all`] fires at most once per scheduler.
//! Registrations after it fired are rejected. A failing or panicking handler
//! or cleanup is logged and skipped; it never stops the pass.
//!
//! # Contexts
//!
//! A task may carry a shared context and a cleanup. Once the task has
//! visited every matching method, the cleanup receives the context, exactly
//! once. A task that never runs releases its context when the scheduler is
//! dropped.

use crate::error::{Error, Result};
use crate::runtime::{
    ClassId, Message, Method, MethodScope, MethodTable, Receiver, Runtime,
    Selector, Value,
};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shared data handed to every invocation of one task's handler.
pub type LaunchContext = Arc<dyn Any + Send + Sync>;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CLEANUP_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`TaskHandler`], issued on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Identity of a [`ContextCleanup`], issued on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupId(u64);

type HandlerFn = dyn Fn(&LaunchTaskInvocation<'_>) -> Result<()> + Send + Sync;

/// Handler of one launch task kind.
///
/// Clones share the body and the [`HandlerId`]; two handlers built from the
/// same closure source are still distinct.
#[derive(Clone)]
pub struct TaskHandler {
    id: HandlerId,
    body: Arc<HandlerFn>,
}

impl TaskHandler {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&LaunchTaskInvocation<'_>) -> Result<()> + Send + Sync + 'static,
    {
        TaskHandler {
            id: HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed)),
            body: Arc::new(body),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    fn call(&self, invocation: &LaunchTaskInvocation<'_>) -> Result<()> {
        (self.body)(invocation)
    }
}

impl fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandler").field(&self.id).finish()
    }
}

type CleanupFn = dyn Fn(Option<LaunchContext>) + Send + Sync;

/// Releases a task's context once the task is done.
#[derive(Clone)]
pub struct ContextCleanup {
    id: CleanupId,
    body: Arc<CleanupFn>,
}

impl ContextCleanup {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(Option<LaunchContext>) + Send + Sync + 'static,
    {
        ContextCleanup {
            id: CleanupId(NEXT_CLEANUP_ID.fetch_add(1, Ordering::Relaxed)),
            body: Arc::new(body),
        }
    }

    #[must_use]
    pub fn id(&self) -> CleanupId {
        self.id
    }
}

impl fmt::Debug for ContextCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextCleanup").field(&self.id).finish()
    }
}

/// A context together with the cleanup that must see it exactly once.
///
/// The cleanup runs on [`ScopedContext::release`] or on drop, whichever
/// comes first.
pub struct ScopedContext {
    context: Option<LaunchContext>,
    cleanup: Option<ContextCleanup>,
    released: bool,
}

impl ScopedContext {
    #[must_use]
    pub fn new(
        context: Option<LaunchContext>,
        cleanup: Option<ContextCleanup>,
    ) -> Self {
        ScopedContext {
            context,
            cleanup,
            released: false,
        }
    }

    #[must_use]
    pub fn context(&self) -> Option<&LaunchContext> {
        self.context.as_ref()
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Hands the context to the cleanup. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns the panic message if the cleanup panicked. The context
    /// counts as released either way.
    pub fn release(&mut self) -> std::result::Result<(), String> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let context = self.context.take();
        match self.cleanup.take() {
            Some(cleanup) => panic::catch_unwind(AssertUnwindSafe(|| (cleanup.body)(context)))
                .map_err(|payload| panic_reason(payload.as_ref())),
            None => Ok(()),
        }
    }
}

impl Drop for ScopedContext {
    fn drop(&mut self) {
        if let Err(reason) = self.release() {
            nest_log::warn!("context cleanup panicked on drop: {reason}");
        }
    }
}

/// A launch task registration.
///
/// # Example
///
/// ```rust
/// use nest_rt::runtime::launch::{LaunchTaskInfo, TaskHandler};
///
/// let info = LaunchTaskInfo::new("_Warmup_", TaskHandler::new(|task| {
///     task.invoke().map(|_| ())
/// }))
/// .with_priority(10);
///
/// assert_eq!(info.prefix(), "_Warmup_");
/// assert_eq!(info.priority(), 10);
/// ```
#[derive(Debug)]
pub struct LaunchTaskInfo {
    prefix: String,
    handler: TaskHandler,
    context: Option<LaunchContext>,
    cleanup: Option<ContextCleanup>,
    priority: i32,
}

impl LaunchTaskInfo {
    #[must_use]
    pub fn new(prefix: &str, handler: TaskHandler) -> Self {
        LaunchTaskInfo {
            prefix: prefix.to_string(),
            handler,
            context: None,
            cleanup: None,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: LaunchContext) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn with_cleanup(mut self, cleanup: ContextCleanup) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Sets the priority. Higher runs earlier; the default is 0.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn handler(&self) -> &TaskHandler {
        &self.handler
    }

    fn is_duplicate_of(&self, task: &PendingTask) -> bool {
        self.prefix == task.prefix
            && self.handler.id() == task.handler.id()
            && self.cleanup.as_ref().map(ContextCleanup::id) == task.cleanup_id
    }
}

/// Registration handle returned by [`LaunchTaskScheduler::try_register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LaunchTaskId(u64);

/// One matched method handed to a task handler.
pub struct LaunchTaskInvocation<'a> {
    runtime: &'a Runtime,
    selector: Selector,
    owner: ClassId,
    method: &'a Method,
    arguments: &'a [Value],
    context: Option<&'a LaunchContext>,
}

impl<'a> LaunchTaskInvocation<'a> {
    #[must_use]
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    #[must_use]
    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// Returns the class whose class method matched.
    #[must_use]
    pub fn owner(&self) -> ClassId {
        self.owner
    }

    #[must_use]
    pub fn method(&self) -> &'a Method {
        self.method
    }

    /// Returns the arguments of the entry-point call that fired the
    /// checkpoint.
    #[must_use]
    pub fn arguments(&self) -> &'a [Value] {
        self.arguments
    }

    #[must_use]
    pub fn context(&self) -> Option<&'a LaunchContext> {
        self.context
    }

    /// Borrows the task context as `T`.
    #[must_use]
    pub fn context_as<T: Any>(&self) -> Option<&'a T> {
        self.context.and_then(|context| context.downcast_ref::<T>())
    }

    /// Calls the matched class method on its owner with the entry-point
    /// arguments.
    ///
    /// # Errors
    ///
    /// Returns whatever error the method returns.
    pub fn invoke(&self) -> Result<Value> {
        let receiver = Receiver::Class(self.owner);
        let message = Message::new(self.runtime, &receiver, self.selector);
        self.method.imp.call(&message, self.arguments)
    }
}

/// Outcome of a checkpoint fire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    /// Tasks that ran, in execution order.
    pub tasks: Vec<String>,
    /// Matched methods handed to a handler.
    pub invocations: usize,
    /// Handler failures, in the order they happened.
    pub failures: Vec<Error>,
}

impl LaunchReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct PendingTask {
    id: LaunchTaskId,
    prefix: String,
    handler: TaskHandler,
    cleanup_id: Option<CleanupId>,
    priority: i32,
    context: ScopedContext,
}

#[derive(Default)]
struct SchedulerState {
    performed: bool,
    next_id: u64,
    tasks: Vec<PendingTask>,
}

/// Registry of launch tasks and the single-fire checkpoint that runs them.
pub struct LaunchTaskScheduler {
    prefix_limit: usize,
    state: Mutex<SchedulerState>,
}

impl LaunchTaskScheduler {
    /// Creates a scheduler accepting prefixes of at most `prefix_limit`
    /// bytes.
    #[must_use]
    pub fn new(prefix_limit: usize) -> Self {
        LaunchTaskScheduler {
            prefix_limit,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Registers a task.
    ///
    /// On error the task is dropped without running its cleanup; the
    /// context stays with the caller's other references.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSelector`] for an empty prefix.
    /// - [`Error::PrefixTooLong`] if the prefix is longer than the limit.
    ///   Length is measured in UTF-8 bytes.
    /// - [`Error::LaunchTasksAlreadyPerformed`] once the checkpoint fired.
    /// - [`Error::DuplicateLaunchTask`] if a task with the same prefix,
    ///   handler and cleanup is registered.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    pub fn try_register(&self, info: LaunchTaskInfo) -> Result<LaunchTaskId> {
        if info.prefix.is_empty() {
            return Err(Error::InvalidSelector);
        }
        if info.prefix.len() > self.prefix_limit {
            return Err(Error::PrefixTooLong {
                len: info.prefix.len(),
                max: self.prefix_limit,
            });
        }

        let mut state = self.state.lock().unwrap();
        if state.performed {
            return Err(Error::LaunchTasksAlreadyPerformed);
        }
        if state.tasks.iter().any(|task| info.is_duplicate_of(task)) {
            return Err(Error::DuplicateLaunchTask {
                prefix: info.prefix,
            });
        }

        let id = LaunchTaskId(state.next_id);
        state.next_id += 1;

        let LaunchTaskInfo {
            prefix,
            handler,
            context,
            cleanup,
            priority,
        } = info;
        nest_log::debug!("registered launch task '{prefix}' at priority {priority}");
        state.tasks.push(PendingTask {
            id,
            prefix,
            handler,
            cleanup_id: cleanup.as_ref().map(ContextCleanup::id),
            priority,
            context: ScopedContext::new(context, cleanup),
        });

        Ok(id)
    }

    /// Boolean form of [`LaunchTaskScheduler::try_register`]; rejections
    /// are logged.
    pub fn register(&self, info: LaunchTaskInfo) -> bool {
        match self.try_register(info) {
            Ok(_) => true,
            Err(err) => {
                nest_log::warn!("launch task rejected: {err}");
                false
            }
        }
    }

    /// Checks whether the checkpoint already fired.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn is_performed(&self) -> bool {
        self.state.lock().unwrap().performed
    }

    /// Returns the number of tasks waiting for the checkpoint.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fires the checkpoint: runs every registered task against the class
    /// methods of `runtime`, forwarding `arguments` to each invocation.
    ///
    /// Returns `None` if the checkpoint already fired.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    pub fn perform_all(
        &self,
        runtime: &Runtime,
        arguments: &[Value],
    ) -> Option<LaunchReport> {
        let mut tasks = {
            let mut state = self.state.lock().unwrap();
            if state.performed {
                return None;
            }
            state.performed = true;
            std::mem::take(&mut state.tasks)
        };

        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        nest_log::info!("performing {} launch tasks", tasks.len());

        let mut report = LaunchReport::default();
        for mut task in tasks {
            run_task(runtime, &task, arguments, &mut report);
            if let Err(reason) = task.context.release() {
                nest_log::warn!("launch task '{}' cleanup panicked: {reason}", task.prefix);
                report.failures.push(Error::LaunchTaskFailed {
                    selector: task.prefix.clone(),
                    reason,
                });
            }
            report.tasks.push(task.prefix);
        }

        Some(report)
    }
}

fn run_task(
    runtime: &Runtime,
    task: &PendingTask,
    arguments: &[Value],
    report: &mut LaunchReport,
) {
    let classes = runtime.classes();

    for owner in classes.classes() {
        for method in classes.methods(owner, MethodScope::Class) {
            if !method.selector.has_prefix(&task.prefix) {
                continue;
            }

            nest_log::trace!("launch task '{}' matched {owner} +{}", task.prefix, method.selector);
            let invocation = LaunchTaskInvocation {
                runtime,
                selector: method.selector,
                owner,
                method: &method,
                arguments,
                context: task.context.context(),
            };
            report.invocations += 1;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                task.handler.call(&invocation)
            }));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => panic_reason(payload.as_ref()),
            };

            nest_log::warn!(
                "launch task '{}' skipped +{}: {failure}",
                task.prefix,
                method.selector
            );
            report.failures.push(Error::LaunchTaskFailed {
                selector: method.selector.name().to_string(),
                reason: failure,
            });
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

/// Handler of the default launch task: invokes the matched class method
/// and ignores its return value.
#[must_use]
pub fn default_task_handler() -> TaskHandler {
    TaskHandler::new(|task| task.invoke().map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop() -> TaskHandler {
        TaskHandler::new(|_| Ok(()))
    }

    #[test]
    fn test_prefix_bounds() {
        let scheduler = LaunchTaskScheduler::new(255);
        let long = "p".repeat(256);

        assert_eq!(
            scheduler.try_register(LaunchTaskInfo::new(&long, noop())),
            Err(Error::PrefixTooLong { len: 256, max: 255 })
        );
        assert!(scheduler.register(LaunchTaskInfo::new(&"p".repeat(255), noop())));

        let narrow = LaunchTaskScheduler::new(4);
        assert_eq!(
            narrow.try_register(LaunchTaskInfo::new("é_é", noop())),
            Err(Error::PrefixTooLong { len: 5, max: 4 })
        );
        assert!(narrow.register(LaunchTaskInfo::new("é_", noop())));
        assert_eq!(
            scheduler.try_register(LaunchTaskInfo::new("", noop())),
            Err(Error::InvalidSelector)
        );
    }

    #[test]
    fn test_duplicate_detection_uses_handles() {
        let scheduler = LaunchTaskScheduler::new(255);
        let handler = noop();
        let cleanup = ContextCleanup::new(|_| {});

        assert!(scheduler.register(
            LaunchTaskInfo::new("_Dup_", handler.clone()).with_cleanup(cleanup.clone())
        ));
        assert_eq!(
            scheduler.try_register(
                LaunchTaskInfo::new("_Dup_", handler.clone())
                    .with_cleanup(cleanup.clone())
                    .with_priority(5)
            ),
            Err(Error::DuplicateLaunchTask {
                prefix: "_Dup_".to_string()
            })
        );

        // A different cleanup, a different handler or no cleanup is a new task
        assert!(scheduler.register(
            LaunchTaskInfo::new("_Dup_", handler.clone())
                .with_cleanup(ContextCleanup::new(|_| {}))
        ));
        assert!(scheduler.register(LaunchTaskInfo::new("_Dup_", noop())));
        assert!(scheduler.register(LaunchTaskInfo::new("_Dup_", handler)));
        assert_eq!(scheduler.len(), 4);
    }

    #[test]
    fn test_scoped_context_releases_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cleanup = ContextCleanup::new(move |context| {
            assert!(context.is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut scoped = ScopedContext::new(Some(Arc::new(5u8)), Some(cleanup));
        assert_eq!(scoped.context().and_then(|c| c.downcast_ref::<u8>()), Some(&5));
        assert_eq!(scoped.release(), Ok(()));
        assert_eq!(scoped.release(), Ok(()));
        assert!(scoped.is_released());
        drop(scoped);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_cleanup_is_contained() {
        let mut scoped = ScopedContext::new(
            None,
            Some(ContextCleanup::new(|_| panic!("cleanup exploded"))),
        );
        assert_eq!(scoped.release(), Err("cleanup exploded".to_string()));
        assert!(scoped.is_released());
        assert_eq!(scoped.release(), Ok(()));
    }

    #[test]
    fn test_unperformed_task_releases_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        {
            let scheduler = LaunchTaskScheduler::new(255);
            scheduler.register(
                LaunchTaskInfo::new("_Dropped_", noop()).with_cleanup(ContextCleanup::new(
                    move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    },
                )),
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_reason() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_reason(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_reason(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_reason(payload.as_ref()), "panicked");
    }
}
