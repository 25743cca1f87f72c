// ============================================================================
// spark-reflect - ObservableVec
// A shared Vec that reports every structural change in application order
// ============================================================================

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use super::change::{
    delegate_stream, ChangeStream, ErasedCollection, FlushPolicy, ObservableCollection,
};
use crate::core::types::{Change, IntoSource, Source};
use crate::primitives::subscription::Subscription;
use crate::view::commands::Behavior;

// =============================================================================
// OBSERVABLE VEC
// =============================================================================

struct VecInner<T> {
    data: RefCell<Vec<T>>,
    stream: ChangeStream<T>,
}

/// A shared, observable Vec.
///
/// Clones share the same storage. Every write emits [`Change`] events whose
/// indices are valid at the moment each change is applied, so replaying them
/// in order against a copy of the old contents reproduces the new contents.
///
/// # Example
///
/// ```
/// use spark_reflect::{ObservableCollection, ObservableVec, Op};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let items = ObservableVec::from(vec!["a", "b"]);
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let s = seen.clone();
/// let _sub = items.subscribe(move |changes| {
///     s.borrow_mut().extend(changes.iter().map(|c| (c.op, c.index)));
/// });
///
/// items.push("c");
/// items.remove(0);
/// assert_eq!(*seen.borrow(), vec![(Op::Add, 2), (Op::Remove, 0)]);
/// assert_eq!(items.to_vec(), vec!["b", "c"]);
/// ```
pub struct ObservableVec<T> {
    inner: Rc<VecInner<T>>,
}

impl<T> Clone for ObservableVec<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> ObservableVec<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            inner: Rc::new(VecInner {
                data: RefCell::new(data),
                stream: ChangeStream::new(),
            }),
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.data.borrow().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.data.borrow().clone()
    }

    /// Borrow the contents. Writing to this vec from `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.data.borrow())
    }

    pub fn listener_count(&self) -> usize {
        self.inner.stream.listener_count()
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    pub fn push(&self, value: T) {
        let index = {
            let mut data = self.inner.data.borrow_mut();
            data.push(value.clone());
            data.len() - 1
        };
        self.inner.stream.emit(vec![Change::add(index, value)]);
    }

    pub fn pop(&self) -> Option<T> {
        let (index, value) = {
            let mut data = self.inner.data.borrow_mut();
            let value = data.pop()?;
            (data.len(), value)
        };
        self.inner.stream.emit(vec![Change::remove(index, value.clone())]);
        Some(value)
    }

    /// Insert at `index`, clamped to the end.
    pub fn insert(&self, index: usize, value: T) {
        let index = {
            let mut data = self.inner.data.borrow_mut();
            let index = index.min(data.len());
            data.insert(index, value.clone());
            index
        };
        self.inner.stream.emit(vec![Change::add(index, value)]);
    }

    pub fn remove(&self, index: usize) -> Option<T> {
        let value = {
            let mut data = self.inner.data.borrow_mut();
            if index >= data.len() {
                return None;
            }
            data.remove(index)
        };
        self.inner.stream.emit(vec![Change::remove(index, value.clone())]);
        Some(value)
    }

    /// Overwrite `index`, returning the old value. Writing one past the end
    /// appends; further out is ignored.
    pub fn set(&self, index: usize, value: T) -> Option<T> {
        let change = {
            let mut data = self.inner.data.borrow_mut();
            match index.cmp(&data.len()) {
                Ordering::Less => {
                    let old = std::mem::replace(&mut data[index], value.clone());
                    Change::set(index, old, value)
                }
                Ordering::Equal => {
                    data.push(value.clone());
                    Change::add(index, value)
                }
                Ordering::Greater => return None,
            }
        };
        let old = change.old.clone();
        self.inner.stream.emit(vec![change]);
        old
    }

    /// Remove `index` by moving the last element into its place.
    ///
    /// Reported as the removal of the last element followed by a set.
    pub fn swap_remove(&self, index: usize) -> Option<T> {
        let (removed, changes) = {
            let mut data = self.inner.data.borrow_mut();
            if index >= data.len() {
                return None;
            }
            let last = data.len() - 1;
            let removed = data.swap_remove(index);
            let changes = if index == last {
                vec![Change::remove(index, removed.clone())]
            } else {
                let moved = data[index].clone();
                vec![
                    Change::remove(last, moved.clone()),
                    Change::set(index, removed.clone(), moved),
                ]
            };
            (removed, changes)
        };
        self.inner.stream.emit(changes);
        Some(removed)
    }

    /// Remove `delete_count` items at `start` and insert `items` there.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = T>,
    ) -> Vec<T> {
        let inserted: Vec<T> = items.into_iter().collect();
        let (removed, changes) = {
            let mut data = self.inner.data.borrow_mut();
            let start = start.min(data.len());
            let end = start.saturating_add(delete_count).min(data.len());
            let removed: Vec<T> = data
                .splice(start..end, inserted.iter().cloned())
                .collect();

            let mut changes = Vec::with_capacity(removed.len() + inserted.len());
            for (offset, value) in removed.iter().enumerate().rev() {
                changes.push(Change::remove(start + offset, value.clone()));
            }
            for (offset, value) in inserted.into_iter().enumerate() {
                changes.push(Change::add(start + offset, value));
            }
            (removed, changes)
        };
        self.inner.stream.emit(changes);
        removed
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        let changes = {
            let mut data = self.inner.data.borrow_mut();
            let mut changes = Vec::new();
            for value in items {
                changes.push(Change::add(data.len(), value.clone()));
                data.push(value);
            }
            changes
        };
        self.inner.stream.emit(changes);
    }

    pub fn clear(&self) {
        self.truncate(0);
    }

    /// Keep the first `len` items. Removals are reported from the end.
    pub fn truncate(&self, len: usize) {
        let changes = {
            let mut data = self.inner.data.borrow_mut();
            if len >= data.len() {
                return;
            }
            let tail = data.split_off(len);
            tail.into_iter()
                .enumerate()
                .rev()
                .map(|(offset, value)| Change::remove(len + offset, value))
                .collect()
        };
        self.inner.stream.emit(changes);
    }

    /// Keep the items matching `keep`. Removals are reported from the end.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) {
        let changes = {
            let mut data = self.inner.data.borrow_mut();
            let mut changes = Vec::new();
            let mut index = data.len();
            while index > 0 {
                index -= 1;
                if !keep(&data[index]) {
                    changes.push(Change::remove(index, data.remove(index)));
                }
            }
            changes
        };
        self.inner.stream.emit(changes);
    }

    pub fn sort(&self)
    where
        T: Ord,
    {
        self.reorder(|data| data.sort());
    }

    pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> Ordering) {
        self.reorder(|data| data.sort_by(compare));
    }

    pub fn reverse(&self) {
        self.reorder(|data| data.reverse());
    }

    /// Apply an in-place reorder, reported as removing every item (from the
    /// end) and adding the new order.
    fn reorder(&self, f: impl FnOnce(&mut Vec<T>)) {
        let changes = {
            let mut data = self.inner.data.borrow_mut();
            if data.len() < 2 {
                return;
            }
            let mut changes: Vec<Change<T>> = data
                .iter()
                .enumerate()
                .rev()
                .map(|(index, value)| Change::remove(index, value.clone()))
                .collect();
            f(&mut data);
            changes.extend(
                data.iter()
                    .enumerate()
                    .map(|(index, value)| Change::add(index, value.clone())),
            );
            changes
        };
        self.inner.stream.emit(changes);
    }

    // =========================================================================
    // BATCHING + BEHAVIOR
    // =========================================================================

    /// Deliver every change made inside `f` as one slice.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.stream.batch(f)
    }

    /// Install the flush hook views of this collection hand their commands to.
    pub fn set_behavior(&self, behavior: impl Behavior + 'static) {
        self.inner.stream.set_behavior(Some(Rc::new(behavior)));
    }

    pub fn clear_behavior(&self) {
        self.inner.stream.set_behavior(None);
    }
}

impl<T: Clone + 'static> Default for ObservableVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> From<Vec<T>> for ObservableVec<T> {
    fn from(data: Vec<T>) -> Self {
        Self::from_vec(data)
    }
}

impl<T: Clone + 'static> FromIterator<T> for ObservableVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for ObservableVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableVec")
            .field("id", &self.inner.stream.id())
            .field("data", &*self.inner.data.borrow())
            .finish()
    }
}

// =============================================================================
// PROTOCOL
// =============================================================================

impl<T: IntoSource + Clone + 'static> ErasedCollection for VecInner<T> {
    fn sources(&self) -> Vec<Source> {
        self.data.borrow().iter().map(IntoSource::to_source).collect()
    }

    fn behavior(&self) -> Option<Rc<dyn Behavior>> {
        self.stream.behavior()
    }
}

impl<T: IntoSource + Clone + 'static> ObservableCollection for ObservableVec<T> {
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

    fn erased(&self) -> Weak<dyn ErasedCollection> {
        let weak: Weak<VecInner<T>> = Rc::downgrade(&self.inner);
        weak
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Op;

    /// Replays every change against a mirror of the contents.
    fn mirrored(vec: &ObservableVec<i32>) -> (Rc<RefCell<Vec<i32>>>, Subscription) {
        let mirror = Rc::new(RefCell::new(vec.to_vec()));
        let m = mirror.clone();
        let sub = vec.subscribe(move |changes| {
            let mut m = m.borrow_mut();
            for c in changes {
                match c.op {
                    Op::Add => m.insert(c.index, c.new.unwrap()),
                    Op::Remove => {
                        assert_eq!(Some(m.remove(c.index)), c.old);
                    }
                    Op::Set => {
                        assert_eq!(Some(m[c.index]), c.old);
                        m[c.index] = c.new.unwrap();
                    }
                    Op::Get => {}
                }
            }
        });
        (mirror, sub)
    }

    #[test]
    fn every_write_replays_exactly() {
        let vec = ObservableVec::from(vec![5, 3, 8, 1]);
        let (mirror, _sub) = mirrored(&vec);

        vec.push(9);
        vec.insert(1, 7);
        vec.set(0, 4);
        vec.set(vec.len(), 10);
        vec.swap_remove(1);
        vec.splice(1, 2, [20, 21, 22]);
        vec.retain(|v| v % 2 == 0);
        vec.sort();
        vec.reverse();
        vec.extend([1, 2]);
        vec.truncate(3);
        vec.pop();

        assert_eq!(*mirror.borrow(), vec.to_vec());
        vec.clear();
        assert!(mirror.borrow().is_empty());
    }

    #[test]
    fn out_of_range_writes_are_ignored() {
        let vec = ObservableVec::from(vec![1]);
        let (mirror, _sub) = mirrored(&vec);
        assert_eq!(vec.remove(5), None);
        assert_eq!(vec.set(5, 0), None);
        assert_eq!(vec.swap_remove(5), None);
        vec.truncate(4);
        assert_eq!(*mirror.borrow(), vec![1]);
    }

    #[test]
    fn swap_remove_reports_remove_then_set() {
        let vec = ObservableVec::from(vec![1, 2, 3]);
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let _sub = vec.subscribe(move |changes| l.borrow_mut().extend_from_slice(changes));

        assert_eq!(vec.swap_remove(0), Some(1));
        assert_eq!(
            *log.borrow(),
            vec![Change::remove(2, 3), Change::set(0, 1, 3)]
        );
    }

    #[test]
    fn batch_delivers_one_slice() {
        let vec = ObservableVec::new();
        let slices = Rc::new(RefCell::new(Vec::new()));
        let s = slices.clone();
        let _sub = vec.subscribe(move |changes| s.borrow_mut().push(changes.len()));

        vec.batch(|| {
            vec.push(1);
            vec.push(2);
            vec.remove(0);
        });
        assert_eq!(*slices.borrow(), vec![3]);
    }

    #[test]
    fn dropping_the_last_handle_disposes() {
        let vec: ObservableVec<i32> = ObservableVec::new();
        let disposed = Rc::new(std::cell::Cell::new(false));
        let d = disposed.clone();
        vec.on_dispose(move || d.set(true));

        let erased = vec.erased();
        let clone = vec.clone();
        drop(vec);
        assert!(!disposed.get());
        drop(clone);
        assert!(disposed.get());
        assert!(erased.upgrade().is_none());
    }

    #[test]
    fn erased_view_sees_current_items() {
        let vec = ObservableVec::from(vec!["x", "y"]);
        let erased = vec.erased().upgrade().unwrap();
        vec.push("z");
        let texts: Vec<String> = erased
            .sources()
            .iter()
            .filter_map(|s| s.as_primitive().map(|p| p.to_text()))
            .collect();
        assert_eq!(texts, vec!["x", "y", "z"]);
    }
}
