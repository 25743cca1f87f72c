// ============================================================================
// spark-reflect - ObservableMap
// An insertion-ordered map rendered by value, flushed once per batch
// ============================================================================

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::change::{
    delegate_stream, ChangeStream, ErasedCollection, FlushPolicy, ObservableCollection,
};
use crate::core::types::{Change, IntoSource, Source};
use crate::primitives::subscription::Subscription;
use crate::view::commands::Behavior;

struct MapInner<K, V> {
    data: RefCell<IndexMap<K, V>>,
    stream: ChangeStream<V>,
}

/// A shared, observable key-value record.
///
/// Views render the values in key insertion order. A write to an existing key
/// is a `Set` at that key's position; a new key is an `Add` at the end.
/// Property-style writes usually come several at a time, so views flush once
/// per delivered batch ([`ObservableMap::assign`] batches for you).
///
/// # Example
///
/// ```
/// use spark_reflect::ObservableMap;
///
/// let record = ObservableMap::new();
/// record.insert("first", "Ada");
/// record.assign([("last", "Lovelace"), ("first", "Augusta")]);
/// assert_eq!(record.values(), vec!["Augusta", "Lovelace"]);
/// ```
pub struct ObservableMap<K, V> {
    inner: Rc<MapInner<K, V>>,
}

impl<K, V> Clone for ObservableMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> ObservableMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Rc::new(MapInner {
                data: RefCell::new(IndexMap::new()),
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

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.data.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.data.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.data.borrow().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.data.borrow().values().cloned().collect()
    }

    /// Write one property, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let change = {
            let mut data = self.inner.data.borrow_mut();
            match data.get_index_of(&key) {
                Some(index) => {
                    let old = std::mem::replace(&mut data[index], value.clone());
                    Change::set(index, old, value)
                }
                None => {
                    data.insert(key, value.clone());
                    Change::add(data.len() - 1, value)
                }
            }
        };
        let old = change.old.clone();
        self.inner.stream.emit(vec![change]);
        old
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let (index, _, value) = self.inner.data.borrow_mut().shift_remove_full(key)?;
        self.inner.stream.emit(vec![Change::remove(index, value.clone())]);
        Some(value)
    }

    /// Write several properties as one batch.
    pub fn assign(&self, entries: impl IntoIterator<Item = (K, V)>) {
        self.batch(|| {
            for (key, value) in entries {
                self.insert(key, value);
            }
        });
    }

    pub fn clear(&self) {
        let changes: Vec<Change<V>> = {
            let mut data = self.inner.data.borrow_mut();
            let drained: Vec<V> = data.drain(..).map(|(_, v)| v).collect();
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

impl<K, V> Default for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::new();
        map.inner.data.borrow_mut().extend(iter);
        map
    }
}

impl<K, V> std::fmt::Debug for ObservableMap<K, V>
where
    K: std::fmt::Debug + 'static,
    V: std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableMap")
            .field("id", &self.inner.stream.id())
            .field("data", &*self.inner.data.borrow())
            .finish()
    }
}

impl<K: 'static, V: IntoSource + Clone + 'static> ErasedCollection for MapInner<K, V> {
    fn sources(&self) -> Vec<Source> {
        self.data.borrow().values().map(IntoSource::to_source).collect()
    }

    fn behavior(&self) -> Option<Rc<dyn Behavior>> {
        self.stream.behavior()
    }
}

impl<K, V> ObservableCollection for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: IntoSource + Clone + 'static,
{
    type Item = V;

    delegate_stream!();

    fn snapshot(&self) -> Vec<V> {
        self.values()
    }

    fn subscribe(&self, listener: impl Fn(&[Change<V>]) + 'static) -> Subscription {
        self.inner.stream.subscribe(Rc::new(listener))
    }

    fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::PerBatch
    }

    fn erased(&self) -> Weak<dyn ErasedCollection> {
        let weak: Weak<MapInner<K, V>> = Rc::downgrade(&self.inner);
        weak
    }
}
