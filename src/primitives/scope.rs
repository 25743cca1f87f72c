// ============================================================================
// spark-reflect - Dispose Scope
//
// The disposal protocol: any object may carry a lazily attached scope that
// collects teardown hooks and runs them exactly once.
// ============================================================================
//
// Key features:
// - on_dispose(fn) - Append a hook, preserving every hook already registered
// - stop() - Run all hooks in registration order, once
// - Hooks registered after stop() run immediately
// - Dropping the last handle stops the scope
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

// =============================================================================
// CLEANUP TYPE
// =============================================================================

/// A teardown hook.
pub type DisposeFn = Box<dyn FnOnce()>;

// =============================================================================
// DISPOSE SCOPE INNER
// =============================================================================

struct DisposeScopeInner {
    /// Whether the scope is still active (not stopped)
    active: Cell<bool>,

    /// Hooks to run on stop, in registration order
    hooks: RefCell<Vec<DisposeFn>>,
}

impl DisposeScopeInner {
    fn new() -> Self {
        Self {
            active: Cell::new(true),
            hooks: RefCell::new(Vec::new()),
        }
    }

    fn stop(&self) {
        if !self.active.replace(false) {
            return;
        }

        // A hook may register further hooks on this scope; those run inline
        // because the scope is no longer active.
        let hooks: Vec<_> = self.hooks.borrow_mut().drain(..).collect();
        for hook in hooks {
            run_hook(hook);
        }
    }
}

impl Drop for DisposeScopeInner {
    fn drop(&mut self) {
        if self.active.get() {
            self.stop();
        }
    }
}

fn run_hook(hook: DisposeFn) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook)).is_err() {
        tracing::warn!("dispose hook panicked; continuing teardown");
    }
}

// =============================================================================
// DISPOSE SCOPE (Public wrapper)
// =============================================================================

/// A set of teardown hooks run together.
///
/// Cloning yields another handle to the same scope.
///
/// # Example
///
/// ```
/// use spark_reflect::DisposeScope;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let ran = Rc::new(Cell::new(0));
/// let scope = DisposeScope::new();
///
/// let r = ran.clone();
/// scope.on_dispose(move || r.set(r.get() + 1));
///
/// scope.stop();
/// scope.stop();
/// assert_eq!(ran.get(), 1);
/// ```
#[derive(Clone)]
pub struct DisposeScope {
    inner: Rc<DisposeScopeInner>,
}

impl DisposeScope {
    /// Create an empty, active scope.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DisposeScopeInner::new()),
        }
    }

    /// Whether the scope has not been stopped yet.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Number of hooks waiting to run.
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.borrow().len()
    }

    /// Append a teardown hook.
    ///
    /// Existing hooks are kept; this one runs after them. If the scope has
    /// already stopped, the hook runs right away.
    pub fn on_dispose<F: FnOnce() + 'static>(&self, f: F) {
        if self.inner.active.get() {
            self.inner.hooks.borrow_mut().push(Box::new(f));
        } else {
            run_hook(Box::new(f));
        }
    }

    /// Run every hook once. Later calls are no-ops.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether two handles refer to the same scope.
    pub fn ptr_eq(&self, other: &DisposeScope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for DisposeScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DisposeScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeScope")
            .field("active", &self.is_active())
            .field("hooks", &self.hook_count())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
