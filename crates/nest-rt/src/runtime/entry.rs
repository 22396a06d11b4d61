//! Entry-point injection.
//!
//! The launch checkpoint is the first call of the application delegate's
//! entry point (`application:willFinishLaunchingWithOptions:` by default).
//! [`Runtime::inject_launch_performer`] puts a performer in front of that
//! entry point: the performer fires the checkpoint with the entry point's
//! arguments and then carries on with whatever the delegate did before.
//!
//! Injection is self-aware. Asking twice for the same delegate, or for a
//! subclass whose entry point is already a performer, changes nothing.

use crate::error::Result;
use crate::runtime::swizzle::{OriginalSlot, SelfAwareSwizzle};
use crate::runtime::{ClassId, Imp, Method, MethodScope, MethodTable, Runtime, Selector, Value};
use std::str::FromStr;

/// Type encoding of a performer installed where no entry point existed.
const PERFORMER_TYPES: &str = "B@:@@";

impl Runtime {
    /// Injects the launch performer into `delegate`'s entry point.
    ///
    /// If the delegate responds to the entry point, that body is swizzled
    /// to a performer that fires the checkpoint and forwards the call.
    /// Otherwise a performer that fires the checkpoint and returns `true` is
    /// installed.
    ///
    /// Returns `Ok(true)` if a performer was put in place and `Ok(false)` if
    /// one already guards the delegate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`](crate::Error::InvalidSelector) if
    /// the configured entry point is empty, or
    /// [`Error::UnknownClass`](crate::Error::UnknownClass) if `delegate` is
    /// not registered.
    ///
    /// # Panics
    ///
    /// Panics if an injection lock is poisoned.
    pub fn inject_launch_performer(&self, delegate: ClassId) -> Result<bool> {
        let selector = Selector::from_str(&self.config().entry_point_selector)?;
        let mut injected = self.injected.lock().unwrap();

        if injected.contains(&delegate) {
            nest_log::debug!("{delegate}: launch performer already injected");
            return Ok(false);
        }

        let existing = self
            .classes()
            .lookup(delegate, &selector, MethodScope::Instance);

        if let Some(method) = &existing {
            if self.is_performer(&method.imp) {
                nest_log::debug!("{delegate}: entry point already performs launch tasks");
                injected.insert(delegate);
                return Ok(false);
            }
        }

        let performer = if existing.is_some() {
            let original = OriginalSlot::new();
            let performer = forwarding_performer(original.clone());
            SelfAwareSwizzle::implementation(
                delegate,
                selector,
                MethodScope::Instance,
                performer.clone(),
                original,
            )
            .perform(self.classes())?;
            performer
        } else {
            let performer = Imp::new(|msg, args| {
                msg.runtime().perform_launch_tasks(args);
                Ok(Value::Bool(true))
            });
            self.classes().install(
                delegate,
                Method::new(selector, performer.clone(), PERFORMER_TYPES),
                MethodScope::Instance,
            )?;
            performer
        };

        self.performers.write().unwrap().push(performer);
        injected.insert(delegate);
        nest_log::info!("{delegate}: injected launch performer into '{selector}'");
        Ok(true)
    }

    fn is_performer(&self, imp: &Imp) -> bool {
        self.performers.read().unwrap().contains(imp)
    }
}

/// Fires the checkpoint, then calls the body the swizzle replaced.
fn forwarding_performer(original: OriginalSlot) -> Imp {
    Imp::new(move |msg, args| {
        msg.runtime().perform_launch_tasks(args);
        match original.get() {
            Some(imp) => imp.call(msg, args),
            None => Ok(Value::Bool(true)),
        }
    })
}
