//! Per-operation context: the origin namespace, read-only mode, task
//! identity, and cooperative cancellation, threaded through every resolve,
//! open, create, and stat call without leaking between tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::OpError;
use crate::fs::FileService;

/// A cheap, clonable cancellation flag. Checked between resolver hops and at
/// I/O suspension points; never itself causes a suspension.
#[derive(Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Cancel(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `CANCELLED` if this flag has been set, otherwise `Ok(())`.
    /// Callers thread this in at every suspension point they own.
    pub fn check(&self, op: &'static str, path: impl Into<String>) -> Result<(), OpError> {
        if self.is_cancelled() {
            Err(OpError::cancelled(op, path))
        } else {
            Ok(())
        }
    }
}

/// Numeric identity of the task on whose behalf an operation runs, if any.
/// Absent for operations issued outside any task (e.g. host bootstrap).
pub type TaskId = u64;

/// Carried through every resolve/open/create/stat call.
///
/// `origin` always refers to the namespace the *current* operation
/// originated from; nested calls must propagate it unchanged unless they are
/// deliberately switching origin (e.g. the task service dispatching into a
/// different task's namespace), per the namespace-isolation invariant.
#[derive(Clone)]
pub struct Ctx {
    origin: std::sync::Weak<dyn FileService>,
    read_only: bool,
    task: Option<TaskId>,
    cancel: Cancel,
}

impl Ctx {
    pub fn new(origin: &Arc<dyn FileService>) -> Self {
        Ctx {
            origin: Arc::downgrade(origin),
            read_only: false,
            task: None,
            cancel: Cancel::new(),
        }
    }

    /// A context with no originating namespace, for bootstrap calls made
    /// before any namespace exists (tests, host wiring).
    pub fn detached() -> Self {
        Ctx {
            origin: std::sync::Weak::new(),
            read_only: false,
            task: None,
            cancel: Cancel::new(),
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn origin(&self) -> Option<Arc<dyn FileService>> {
        self.origin.upgrade()
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    pub fn cancel(&self) -> &Cancel {
        &self.cancel
    }

    pub fn check_cancelled(&self, op: &'static str, path: impl Into<String>) -> Result<(), OpError> {
        self.cancel.check(op, path)
    }

    /// A context that overrides the origin to a different namespace while
    /// keeping task identity and cancellation, for collaborators that
    /// deliberately cross namespace boundaries (the task service opening
    /// into a sibling task's own namespace).
    pub fn with_origin(mut self, origin: &Arc<dyn FileService>) -> Self {
        self.origin = Arc::downgrade(origin);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_cooperative_and_shared() {
        let c = Cancel::new();
        let c2 = c.clone();
        assert!(c.check("op", ".").is_ok());
        c2.cancel();
        assert!(c.is_cancelled());
        assert!(c.check("op", ".").is_err());
    }

    #[test]
    fn detached_ctx_has_no_origin() {
        let ctx = Ctx::detached();
        assert!(ctx.origin().is_none());
        assert!(!ctx.read_only());
        assert_eq!(ctx.task(), None);
    }
}
