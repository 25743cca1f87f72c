// ============================================================================
// spark-reflect - Subscriptions
// Ordered listener registries and their cancellation handles
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::scope::DisposeFn;

// =============================================================================
// LISTENER SET
// =============================================================================

type Slots<F> = RefCell<Vec<(u64, Rc<F>)>>;

/// Listeners kept in registration order.
///
/// `F` is usually a `dyn Fn(..)`. Notification clones the current list first,
/// so a listener may subscribe or unsubscribe while being called.
pub(crate) struct ListenerSet<F: ?Sized> {
    slots: Rc<Slots<F>>,
    next_id: Cell<u64>,
}

impl<F: ?Sized + 'static> ListenerSet<F> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(0),
        }
    }

    /// Register a listener and return the handle that removes it.
    pub(crate) fn add(&self, listener: Rc<F>) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.slots.borrow_mut().push((id, listener));

        let slots: Weak<Slots<F>> = Rc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = slots.upgrade() {
                slots.borrow_mut().retain(|(slot_id, _)| *slot_id != id);
            }
        })
    }

    /// Current listeners, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Rc<F>> {
        self.slots.borrow().iter().map(|(_, l)| l.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.borrow().len()
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle that detaches one listener.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`]
/// or hand it to a dispose scope via [`Subscription::into_dispose_fn`].
#[derive(Clone)]
pub struct Subscription {
    cancel: Rc<RefCell<Option<DisposeFn>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Rc::new(RefCell::new(Some(Box::new(cancel)))),
        }
    }

    /// A subscription that is already cancelled.
    pub fn empty() -> Self {
        Self {
            cancel: Rc::new(RefCell::new(None)),
        }
    }

    /// Detach the listener. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.borrow_mut().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether the listener is still attached.
    pub fn is_active(&self) -> bool {
        self.cancel.borrow().is_some()
    }

    /// Turn the handle into a dispose hook.
    pub fn into_dispose_fn(self) -> DisposeFn {
        Box::new(move || self.unsubscribe())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let set: ListenerSet<dyn Fn() -> u8> = ListenerSet::new();
        let a = set.add(Rc::new(|| 1));
        let _b = set.add(Rc::new(|| 2));
        assert_eq!(set.len(), 2);

        a.unsubscribe();
        a.unsubscribe();
        assert!(!a.is_active());

        let values: Vec<u8> = set.snapshot().iter().map(|f| f()).collect();
        assert_eq!(values, vec![2]);
    }

    #[test]
    fn unsubscribe_after_set_dropped_is_harmless() {
        let set: ListenerSet<dyn Fn()> = ListenerSet::new();
        let sub = set.add(Rc::new(|| {}));
        drop(set);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn dispose_fn_cancels() {
        let set: ListenerSet<dyn Fn()> = ListenerSet::new();
        let sub = set.add(Rc::new(|| {}));
        let probe = sub.clone();

        (sub.into_dispose_fn())();
        assert!(!probe.is_active());
        assert_eq!(set.len(), 0);
    }
}
