// ============================================================================
// spark-reflect - ObservableSet
// An insertion-ordered set that reports insertions and removals
// ============================================================================

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use super::change::{
    delegate_stream, ChangeStream, ErasedCollection, FlushPolicy, ObservableCollection,
};
use crate::core::types::{Change, IntoSource, Source};
use crate::primitives::subscription::Subscription;
use crate::view::commands::Behavior;

struct SetInner<T> {
    data: RefCell<IndexSet<T>>,
    stream: ChangeStream<T>,
}

/// A shared, observable set.
///
/// Items keep insertion order, which is the order views render them in.
/// Change indices are positions in that order. Views treat set-backed
/// collections as value-deduped: equal primitives share one node.
///
/// # Example
///
/// ```
/// use spark_reflect::ObservableSet;
///
/// let tags = ObservableSet::new();
/// assert!(tags.insert("rust"));
/// assert!(!tags.insert("rust"));
/// tags.insert("ui");
/// assert!(tags.remove(&"rust"));
/// assert_eq!(tags.to_vec(), vec!["ui"]);
/// ```
pub struct ObservableSet<T> {
    inner: Rc<SetInner<T>>,
}

impl<T> Clone for ObservableSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Eq + Hash + Clone + 'static> ObservableSet<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SetInner {
                data: RefCell::new(IndexSet::new()),
                stream: ChangeStream::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, item: &T) -> bool {
        self.inner.data.borrow().contains(item)
    }

    /// Position of `item` in insertion order.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.inner.data.borrow().get_index_of(item)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.data.borrow().iter().cloned().collect()
    }

    /// Returns false if the item was already present.
    pub fn insert(&self, item: T) -> bool {
        let index = {
            let mut data = self.inner.data.borrow_mut();
            let (index, added) = data.insert_full(item.clone());
            if !added {
                return false;
            }
            index
        };
        self.inner.stream.emit(vec![Change::add(index, item)]);
        true
    }

    pub fn remove(&self, item: &T) -> bool {
        let removed = self.inner.data.borrow_mut().shift_remove_full(item);
        match removed {
            Some((index, value)) => {
                self.inner.stream.emit(vec![Change::remove(index, value)]);
                true
            }
            None => false,
        }
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.batch(|| {
            for item in items {
                self.insert(item);
            }
        });
    }

    /// Remove everything, reported from the last item back.
    pub fn clear(&self) {
        let changes: Vec<Change<T>> = {
            let mut data = self.inner.data.borrow_mut();
            let drained: Vec<T> = data.drain(..).collect();
            drained
                .into_iter()
                .enumerate()
                .rev()
                .map(|(index, value)| Change::remove(index, value))
                .collect()
        };
        self.inner.stream.emit(changes);
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.stream.batch(f)
    }

    pub fn set_behavior(&self, behavior: impl Behavior + 'static) {
        self.inner.stream.set_behavior(Some(Rc::new(behavior)));
    }

    pub fn clear_behavior(&self) {
        self.inner.stream.set_behavior(None);
    }
}

impl<T: Eq + Hash + Clone + 'static> Default for ObservableSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone + 'static> FromIterator<T> for ObservableSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let set = Self::new();
        set.inner.data.borrow_mut().extend(iter);
        set
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for ObservableSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableSet")
            .field("id", &self.inner.stream.id())
            .field("data", &*self.inner.data.borrow())
            .finish()
    }
}

impl<T: IntoSource + Clone + 'static> ErasedCollection for SetInner<T> {
    fn sources(&self) -> Vec<Source> {
        self.data.borrow().iter().map(IntoSource::to_source).collect()
    }

    fn behavior(&self) -> Option<Rc<dyn Behavior>> {
        self.stream.behavior()
    }
}

impl<T: IntoSource + Eq + Hash + Clone + 'static> ObservableCollection for ObservableSet<T> {
    type Item = T;

    delegate_stream!();

    fn snapshot(&self) -> Vec<T> {
        self.to_vec()
    }

    fn subscribe(&self, listener: impl Fn(&[Change<T>]) + 'static) -> Subscription {
        self.inner.stream.subscribe(Rc::new(listener))
    }

    fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::PerEvent
    }

    fn is_set_like(&self) -> bool {
        true
    }

    fn erased(&self) -> Weak<dyn ErasedCollection> {
        let weak: Weak<SetInner<T>> = Rc::downgrade(&self.inner);
        weak
    }
}
