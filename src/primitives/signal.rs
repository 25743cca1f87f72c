// ============================================================================
// spark-reflect - Signal Primitive
// A single reactive reference with ordered change listeners
// ============================================================================

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::subscription::{ListenerSet, Subscription};

/// Equality used to suppress redundant notifications.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

type ChangeListener<T> = dyn Fn(&T, &T);

// =============================================================================
// SIGNAL INNER
// =============================================================================

pub(crate) struct SignalInner<T> {
    value: RefCell<T>,
    equals: EqualsFn<T>,
    listeners: ListenerSet<ChangeListener<T>>,
}

// =============================================================================
// SIGNAL<T> - The public signal handle
// =============================================================================

/// A reactive value. Writers call [`Signal::set`]; listeners registered with
/// [`Signal::subscribe`] receive `(new, old)` after each effective change.
///
/// # Example
///
/// ```
/// use spark_reflect::signal;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = signal(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let s = seen.clone();
/// let _sub = count.subscribe(move |new, _old| s.set(*new));
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_equals(value, |a, b| a == b)
    }

    /// Create a new signal with a custom equality function.
    pub fn new_with_equals(value: T, equals: EqualsFn<T>) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(value),
                equals,
                listeners: ListenerSet::new(),
            }),
        }
    }

    /// Get the current value (cloning).
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Access the current value with a closure (avoids cloning).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.value.borrow())
    }

    /// Set the signal's value.
    ///
    /// Returns true if the value changed. Listeners only run on a change.
    pub fn set(&self, value: T) -> bool {
        let old = {
            let mut slot = self.inner.value.borrow_mut();
            if (self.inner.equals)(&*slot, &value) {
                return false;
            }
            std::mem::replace(&mut *slot, value)
        };
        self.notify(&old);
        true
    }

    /// Update the value in place and notify with the previous value.
    pub fn update(&self, f: impl FnOnce(&mut T))
    where
        T: Clone,
    {
        let old = {
            let mut slot = self.inner.value.borrow_mut();
            let old = slot.clone();
            f(&mut *slot);
            if (self.inner.equals)(&old, &*slot) {
                return;
            }
            old
        };
        self.notify(&old);
    }

    /// Register a `(new, old)` listener.
    pub fn subscribe(&self, listener: impl Fn(&T, &T) + 'static) -> Subscription {
        self.inner.listeners.add(Rc::new(listener))
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Reference identity of this signal (shared by all clones).
    pub fn ptr_key(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    /// Whether two handles point at the same signal.
    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn notify(&self, old: &T) {
        let listeners = self.inner.listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        let value = self.inner.value.borrow();
        for listener in listeners {
            listener(&*value, old);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Non-owning signal handle.
pub struct WeakSignal<T> {
    inner: Weak<SignalInner<T>>,
}

impl<T> Clone for WeakSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WeakSignal<T> {
    pub fn upgrade(&self) -> Option<Signal<T>> {
        self.inner.upgrade().map(|inner| Signal { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

// =============================================================================
// SIGNAL CREATION FUNCTIONS
// =============================================================================

/// Create a new reactive signal.
pub fn signal<T>(value: T) -> Signal<T>
where
    T: PartialEq + 'static,
{
    Signal::new(value)
}

// =============================================================================
// TESTS
// =============================================================================
