// ============================================================================
// spark-reflect - Type Definitions
// Source values, primitives, change events, and the mapper contract
// ============================================================================

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use super::context::RenderContext;
use crate::primitives::signal::{Signal, WeakSignal};
use crate::tree::NodeId;

// =============================================================================
// PRIMITIVES
// =============================================================================

/// A value rendered as a text node.
///
/// Equality and hashing are by value; numbers compare by bit pattern so the
/// type can key the unique-primitives map.
#[derive(Clone, Debug)]
pub enum Primitive {
    Str(Rc<str>),
    Number(f64),
    Bool(bool),
}

impl Primitive {
    /// Text shown for this value. Integral numbers print without a fraction.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Str(s) => f.write_str(s),
            Primitive::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Primitive::Number(n) => write!(f, "{n}"),
            Primitive::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Primitive::Str(a), Primitive::Str(b)) => a == b,
            (Primitive::Number(a), Primitive::Number(b)) => a.to_bits() == b.to_bits(),
            (Primitive::Bool(a), Primitive::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Primitive {}

impl Hash for Primitive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Primitive::Str(s) => s.hash(state),
            Primitive::Number(n) => n.to_bits().hash(state),
            Primitive::Bool(b) => b.hash(state),
        }
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::Str(value.into())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::Str(value.into())
    }
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        Primitive::Bool(value)
    }
}

macro_rules! number_primitive {
    ($($t:ty),*) => {
        $(impl From<$t> for Primitive {
            fn from(value: $t) -> Self {
                Primitive::Number(value as f64)
            }
        })*
    };
}

number_primitive!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

// =============================================================================
// CHANGE EVENTS
// =============================================================================

/// Kind of a collection change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Set,
    Remove,
    /// Read notification; ignored by the reconciler.
    Get,
}

/// One change notification: `(new, index, old, op)`.
///
/// `index` is the position at the moment the change was applied. Earlier
/// changes in the same batch may already have shifted later positions.
#[derive(Clone, Debug, PartialEq)]
pub struct Change<T> {
    pub new: Option<T>,
    pub index: usize,
    pub old: Option<T>,
    pub op: Op,
}

impl<T> Change<T> {
    pub fn add(index: usize, new: T) -> Self {
        Self {
            new: Some(new),
            index,
            old: None,
            op: Op::Add,
        }
    }

    pub fn set(index: usize, old: T, new: T) -> Self {
        Self {
            new: Some(new),
            index,
            old: Some(old),
            op: Op::Set,
        }
    }

    pub fn remove(index: usize, old: T) -> Self {
        Self {
            new: None,
            index,
            old: Some(old),
            op: Op::Remove,
        }
    }

    /// Convert the payloads, keeping index and op.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Change<U> {
        Change {
            new: self.new.as_ref().map(&mut f),
            index: self.index,
            old: self.old.as_ref().map(&mut f),
            op: self.op,
        }
    }
}

// =============================================================================
// NODE-LIKE VALUES
// =============================================================================

/// A value that stands for a node it manages itself.
pub trait NodeLike {
    /// The node this value currently renders.
    fn element(&self, ctx: &RenderContext) -> Option<NodeId>;

    /// A node suitable for insertion under `candidate`.
    ///
    /// Called when the current node already lives under a different parent;
    /// implementations may return a separate node instead of letting the
    /// caller move the shared one.
    fn element_for_potential_parent(
        &self,
        ctx: &RenderContext,
        candidate: NodeId,
    ) -> Option<NodeId> {
        let _ = candidate;
        self.element(ctx)
    }

    /// The caller is about to insert the current node under `candidate`.
    ///
    /// Wrappers that bind to their parent lazily use this to start waiting
    /// for the insertion; nothing is required of other implementations.
    fn expect_parent(&self, ctx: &RenderContext, candidate: NodeId) {
        let _ = (ctx, candidate);
    }
}

// =============================================================================
// SOURCE VALUES
// =============================================================================

/// Reference identity of a source value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceKey(usize);

impl SourceKey {
    fn of<T: ?Sized>(rc: &Rc<T>) -> Self {
        SourceKey(Rc::as_ptr(rc) as *const () as usize)
    }
}

/// Shared reference to an arbitrary object, compared by identity.
#[derive(Clone)]
pub struct ObjectRef(Rc<dyn Any>);

impl ObjectRef {
    pub fn new<T: Any>(value: Rc<T>) -> Self {
        ObjectRef(value)
    }

    pub fn key(&self) -> SourceKey {
        SourceKey::of(&self.0)
    }

    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        self.0.clone().downcast::<T>().ok()
    }
}

/// Zero-argument producer of another source.
#[derive(Clone)]
pub struct Thunk(Rc<dyn Fn() -> Source>);

impl Thunk {
    pub fn new(f: impl Fn() -> Source + 'static) -> Self {
        Thunk(Rc::new(f))
    }

    pub fn call(&self) -> Source {
        (self.0)()
    }

    pub fn key(&self) -> SourceKey {
        SourceKey::of(&self.0)
    }
}

/// Anything a view can be asked to render.
#[derive(Clone, Default)]
pub enum Source {
    /// Renders nothing.
    #[default]
    Null,
    /// An already resolved node.
    Node(NodeId),
    /// A wrapper that manages its own node.
    NodeLike(Rc<dyn NodeLike>),
    /// A primitive whose text follows the signal.
    Reactive(Signal<Primitive>),
    /// A producer invoked at resolution time.
    Thunk(Thunk),
    /// A plain value rendered as text.
    Primitive(Primitive),
    /// An object rendered through a mapper or the identity cache.
    Object(ObjectRef),
}

impl Source {
    pub fn object<T: Any>(value: Rc<T>) -> Self {
        Source::Object(ObjectRef::new(value))
    }

    pub fn thunk(f: impl Fn() -> Source + 'static) -> Self {
        Source::Thunk(Thunk::new(f))
    }

    pub fn node_like(value: impl NodeLike + 'static) -> Self {
        Source::NodeLike(Rc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Source::Null)
    }

    /// Same value: primitives by value, nodes by id, the rest by reference.
    pub fn same_as(&self, other: &Source) -> bool {
        match (self, other) {
            (Source::Null, Source::Null) => true,
            (Source::Node(a), Source::Node(b)) => a == b,
            (Source::Primitive(a), Source::Primitive(b)) => a == b,
            _ => match (self.identity_key(), other.identity_key()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Source::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Downcast an object source.
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        match self {
            Source::Object(obj) => obj.downcast(),
            _ => None,
        }
    }

    /// Reference identity, for sources that have one.
    ///
    /// Primitives, nodes and null have no reference identity.
    pub fn identity_key(&self) -> Option<SourceKey> {
        match self {
            Source::Object(obj) => Some(obj.key()),
            Source::Thunk(t) => Some(t.key()),
            Source::NodeLike(n) => Some(SourceKey::of(n)),
            Source::Reactive(s) => Some(SourceKey(s.ptr_key())),
            Source::Null | Source::Node(_) | Source::Primitive(_) => None,
        }
    }

    /// Non-owning handle used to tell whether the source is still alive.
    pub fn downgrade(&self) -> Option<WeakSource> {
        match self {
            Source::Object(obj) => Some(WeakSource::Object(Rc::downgrade(&obj.0))),
            Source::Thunk(t) => Some(WeakSource::Thunk(Rc::downgrade(&t.0))),
            Source::NodeLike(n) => Some(WeakSource::NodeLike(Rc::downgrade(n))),
            Source::Reactive(s) => Some(WeakSource::Reactive(s.downgrade())),
            Source::Null | Source::Node(_) | Source::Primitive(_) => None,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Null => f.write_str("Null"),
            Source::Node(id) => f.debug_tuple("Node").field(id).finish(),
            Source::NodeLike(_) => f.write_str("NodeLike(..)"),
            Source::Reactive(s) => f.debug_tuple("Reactive").field(&s.get()).finish(),
            Source::Thunk(_) => f.write_str("Thunk(..)"),
            Source::Primitive(p) => f.debug_tuple("Primitive").field(p).finish(),
            Source::Object(o) => f.debug_tuple("Object").field(&o.key()).finish(),
        }
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Source) -> bool {
        self.same_as(other)
    }
}

/// Weak counterpart of a reference-identity [`Source`].
///
/// Holding it keeps the allocation address reserved, so a [`SourceKey`] is
/// never reused while the entry that recorded it exists.
#[derive(Clone)]
pub enum WeakSource {
    Object(Weak<dyn Any>),
    Thunk(Weak<dyn Fn() -> Source>),
    NodeLike(Weak<dyn NodeLike>),
    Reactive(WeakSignal<Primitive>),
}

impl WeakSource {
    pub fn is_alive(&self) -> bool {
        match self {
            WeakSource::Object(w) => w.strong_count() > 0,
            WeakSource::Thunk(w) => w.strong_count() > 0,
            WeakSource::NodeLike(w) => w.strong_count() > 0,
            WeakSource::Reactive(w) => w.is_alive(),
        }
    }
}

// =============================================================================
// CONVERSION INTO SOURCES
// =============================================================================

/// Collection items that can be rendered.
pub trait IntoSource {
    fn to_source(&self) -> Source;
}

impl IntoSource for Source {
    fn to_source(&self) -> Source {
        self.clone()
    }
}

impl IntoSource for Primitive {
    fn to_source(&self) -> Source {
        Source::Primitive(self.clone())
    }
}

impl IntoSource for NodeId {
    fn to_source(&self) -> Source {
        Source::Node(*self)
    }
}

impl IntoSource for Signal<Primitive> {
    fn to_source(&self) -> Source {
        Source::Reactive(self.clone())
    }
}

impl<T: Any> IntoSource for Rc<T> {
    fn to_source(&self) -> Source {
        Source::Object(ObjectRef::new(self.clone()))
    }
}

impl<T: IntoSource> IntoSource for Option<T> {
    fn to_source(&self) -> Source {
        self.as_ref().map_or(Source::Null, IntoSource::to_source)
    }
}

macro_rules! primitive_source {
    ($($t:ty),*) => {
        $(impl IntoSource for $t {
            fn to_source(&self) -> Source {
                Source::Primitive(Primitive::from(self.clone()))
            }
        })*
    };
}

primitive_source!(String, &'static str, bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

// =============================================================================
// MAPPER
// =============================================================================

type MapFn = dyn Fn(&RenderContext, &Source, usize) -> Source;

/// Caller-supplied `(source, index) -> renderable` function.
///
/// Compared by reference: views are memoized per (collection, mapper), so a
/// mapper should be created once and cloned, not rebuilt per call.
#[derive(Clone)]
pub struct Mapper(Rc<MapFn>);

impl Mapper {
    pub fn new(f: impl Fn(&RenderContext, &Source, usize) -> Source + 'static) -> Self {
        Mapper(Rc::new(f))
    }

    /// Pass every source through unchanged; primitives become text nodes.
    pub fn identity() -> Self {
        Mapper::new(|_, source, _| source.clone())
    }

    /// Create a fresh text node for each primitive.
    pub fn text_nodes() -> Self {
        Mapper::new(|ctx, source, _| match source {
            Source::Primitive(p) => Source::Node(ctx.create_text(p.to_text())),
            other => other.clone(),
        })
    }

    pub fn call(&self, ctx: &RenderContext, source: &Source, index: usize) -> Source {
        (self.0)(ctx, source, index)
    }

    /// Reference identity of the mapper (shared by clones).
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mapper").field(&self.key()).finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn primitive_text_coercion() {
        assert_eq!(Primitive::from(3).to_text(), "3");
        assert_eq!(Primitive::from(2.5).to_text(), "2.5");
        assert_eq!(Primitive::from(true).to_text(), "true");
        assert_eq!(Primitive::from("hi").to_text(), "hi");
    }

    #[test]
    fn primitive_equality_is_by_value() {
        let mut set = HashSet::new();
        set.insert(Primitive::from("a"));
        set.insert(Primitive::from(String::from("a")));
        set.insert(Primitive::from(1));
        set.insert(Primitive::from(1.0));
        set.insert(Primitive::from(f64::NAN));
        set.insert(Primitive::from(f64::NAN));
        assert_eq!(set.len(), 3);
        assert_ne!(Primitive::from(1), Primitive::from("1"));
    }

    #[test]
    fn object_identity_follows_the_rc() {
        let a = Rc::new(5u8);
        let b = Rc::new(5u8);
        assert_eq!(a.to_source().identity_key(), a.clone().to_source().identity_key());
        assert_ne!(a.to_source().identity_key(), b.to_source().identity_key());
        assert_eq!(a.to_source().downcast::<u8>().as_deref(), Some(&5));
        assert!(a.to_source().downcast::<i32>().is_none());
    }

    #[test]
    fn primitives_have_no_identity() {
        assert!("x".to_source().identity_key().is_none());
        assert!(Source::Null.identity_key().is_none());
        assert!(Source::Null.downgrade().is_none());
    }

    #[test]
    fn weak_source_tracks_liveness() {
        let obj = Rc::new(String::from("obj"));
        let weak = obj.to_source().downgrade().unwrap();
        assert!(weak.is_alive());
        drop(obj);
        assert!(!weak.is_alive());
    }

    #[test]
    fn same_as_follows_identity_rules() {
        let obj = Rc::new(1u8);
        assert!(obj.to_source().same_as(&obj.clone().to_source()));
        assert!(!obj.to_source().same_as(&Rc::new(1u8).to_source()));
        assert!("a".to_source().same_as(&Source::Primitive(Primitive::from("a"))));
        assert!(Source::Null.same_as(&Source::Null));
        assert!(!Source::Null.same_as(&"".to_source()));
    }

    #[test]
    fn change_map_keeps_shape() {
        let change = Change::set(2, 1, 10);
        let mapped = change.map(|v| v * 2);
        assert_eq!(mapped, Change::set(2, 2, 20));
        assert_eq!(Change::remove(0, "a").op, Op::Remove);
    }

    #[test]
    fn mapper_identity_survives_clone() {
        let m = Mapper::identity();
        assert_eq!(m.key(), m.clone().key());
        assert_ne!(m.key(), Mapper::identity().key());
    }
}
