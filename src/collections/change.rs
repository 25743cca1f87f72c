// ============================================================================
// spark-reflect - Change Streams
// The observable collection protocol shared by vec, set and map
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::types::{Change, IntoSource, Source};
use crate::primitives::scope::DisposeScope;
use crate::primitives::subscription::{ListenerSet, Subscription};
use crate::view::commands::Behavior;

// =============================================================================
// IDENTITY + POLICY
// =============================================================================

/// Identity of one collection instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(u64);

thread_local! {
    static NEXT_COLLECTION_ID: Cell<u64> = const { Cell::new(1) };
}

impl CollectionId {
    pub(crate) fn next() -> Self {
        NEXT_COLLECTION_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            CollectionId(id)
        })
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// When a view flushes its command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushPolicy {
    /// After every event (structural list operations).
    PerEvent,
    /// Once per delivered batch (property-style writes).
    PerBatch,
}

/// Listener for one delivered batch of changes, in application order.
pub type ChangeListener<T> = dyn Fn(&[Change<T>]);

// =============================================================================
// PROTOCOL
// =============================================================================

/// A collection a view can render and follow.
pub trait ObservableCollection {
    type Item: IntoSource + Clone + 'static;

    fn collection_id(&self) -> CollectionId;

    /// Current items, in order.
    fn snapshot(&self) -> Vec<Self::Item>;

    fn subscribe(&self, listener: impl Fn(&[Change<Self::Item>]) + 'static) -> Subscription;

    fn flush_policy(&self) -> FlushPolicy;

    /// Set-backed collections dedupe primitive values.
    fn is_set_like(&self) -> bool {
        false
    }

    fn behavior(&self) -> Option<Rc<dyn Behavior>>;

    /// Append a teardown hook. Runs immediately if already disposed.
    fn on_dispose(&self, f: impl FnOnce() + 'static);

    /// Run the teardown hooks once; later writes are still applied but no
    /// longer delivered.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;

    /// Type-erased weak handle used by views.
    fn erased(&self) -> Weak<dyn ErasedCollection>;
}

/// What a view needs from a collection without knowing its item type.
pub trait ErasedCollection {
    fn sources(&self) -> Vec<Source>;

    fn behavior(&self) -> Option<Rc<dyn Behavior>>;
}

// =============================================================================
// CHANGE STREAM
// =============================================================================

/// Listener registry plus batching for one collection.
pub(crate) struct ChangeStream<T> {
    id: CollectionId,
    listeners: ListenerSet<ChangeListener<T>>,
    batch_depth: Cell<usize>,
    queued: RefCell<Vec<Change<T>>>,
    behavior: RefCell<Option<Rc<dyn Behavior>>>,
    scope: DisposeScope,
}

impl<T: 'static> ChangeStream<T> {
    pub(crate) fn new() -> Self {
        Self {
            id: CollectionId::next(),
            listeners: ListenerSet::new(),
            batch_depth: Cell::new(0),
            queued: RefCell::new(Vec::new()),
            behavior: RefCell::new(None),
            scope: DisposeScope::new(),
        }
    }

    pub(crate) fn id(&self) -> CollectionId {
        self.id
    }

    pub(crate) fn subscribe(&self, listener: Rc<ChangeListener<T>>) -> Subscription {
        if !self.scope.is_active() {
            return Subscription::empty();
        }
        self.listeners.add(listener)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver now, or queue when inside a batch.
    ///
    /// Callers must not hold a borrow of their data while emitting.
    pub(crate) fn emit(&self, changes: Vec<Change<T>>) {
        if changes.is_empty() || !self.scope.is_active() {
            return;
        }
        if self.batch_depth.get() > 0 {
            self.queued.borrow_mut().extend(changes);
            return;
        }
        self.deliver(&changes);
    }

    fn deliver(&self, changes: &[Change<T>]) {
        for listener in self.listeners.snapshot() {
            listener(changes);
        }
    }

    pub(crate) fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.batch_depth.set(self.batch_depth.get() + 1);
        let result = f();
        let depth = self.batch_depth.get() - 1;
        self.batch_depth.set(depth);
        if depth == 0 {
            let queued = std::mem::take(&mut *self.queued.borrow_mut());
            if !queued.is_empty() && self.scope.is_active() {
                self.deliver(&queued);
            }
        }
        result
    }

    pub(crate) fn behavior(&self) -> Option<Rc<dyn Behavior>> {
        self.behavior.borrow().clone()
    }

    pub(crate) fn set_behavior(&self, behavior: Option<Rc<dyn Behavior>>) {
        *self.behavior.borrow_mut() = behavior;
    }

    pub(crate) fn on_dispose(&self, f: impl FnOnce() + 'static) {
        self.scope.on_dispose(f);
    }

    pub(crate) fn dispose(&self) {
        self.scope.stop();
    }

    pub(crate) fn is_disposed(&self) -> bool {
        !self.scope.is_active()
    }
}

/// Implements the shared half of [`ObservableCollection`] by delegating to a
/// `stream` field on the inner type.
macro_rules! delegate_stream {
    () => {
        fn collection_id(&self) -> $crate::collections::CollectionId {
            self.inner.stream.id()
        }

        fn behavior(&self) -> Option<std::rc::Rc<dyn $crate::view::commands::Behavior>> {
            self.inner.stream.behavior()
        }

        fn on_dispose(&self, f: impl FnOnce() + 'static) {
            self.inner.stream.on_dispose(f);
        }

        fn dispose(&self) {
            self.inner.stream.dispose();
        }

        fn is_disposed(&self) -> bool {
            self.inner.stream.is_disposed()
        }
    };
}

pub(crate) use delegate_stream;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Op;

    fn recording(stream: &ChangeStream<i32>) -> (Rc<RefCell<Vec<Vec<Change<i32>>>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let sub = stream.subscribe(Rc::new(move |changes: &[Change<i32>]| {
            l.borrow_mut().push(changes.to_vec());
        }));
        (log, sub)
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(CollectionId::next(), CollectionId::next());
    }

    #[test]
    fn batch_delivers_once_in_order() {
        let stream = ChangeStream::new();
        let (log, _sub) = recording(&stream);

        stream.batch(|| {
            stream.emit(vec![Change::add(0, 1)]);
            stream.batch(|| stream.emit(vec![Change::add(1, 2)]));
            assert!(log.borrow().is_empty());
            stream.emit(vec![Change::remove(0, 1)]);
        });

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        let ops: Vec<Op> = log[0].iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![Op::Add, Op::Add, Op::Remove]);
    }

    #[test]
    fn dispose_stops_delivery_and_runs_hooks() {
        let stream = ChangeStream::new();
        let (log, _sub) = recording(&stream);
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        stream.on_dispose(move || r.set(true));

        stream.dispose();
        stream.emit(vec![Change::add(0, 1)]);

        assert!(ran.get());
        assert!(stream.is_disposed());
        assert!(log.borrow().is_empty());
        assert!(!stream.subscribe(Rc::new(|_: &[Change<i32>]| {})).is_active());
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let stream = ChangeStream::new();
        let (log, sub) = recording(&stream);
        sub.unsubscribe();
        stream.emit(vec![Change::add(0, 1)]);
        assert!(log.borrow().is_empty());
        assert_eq!(stream.listener_count(), 0);
    }
}
