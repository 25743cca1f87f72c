// ============================================================================
// spark-reflect - Changeable View
// One reactive value rendered as one swappable node
// ============================================================================
//
// Lifecycle:
//
//   detached --element()--> holds its node in a fragment
//   pending  --commit()-->  attached (node observed under the candidate)
//   attached --value set--> old node replaced in place
//
// The view subscribes to its signal only once attached. Until then a pending
// view sits on the context's commit queue; `RenderContext::run_commit_phase`
// (run by mapped views after every flush) promotes it when its node has
// landed under the candidate parent.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::core::constants::{has_flag, ATTACHED, DISPOSED, PENDING};
use crate::core::context::{RenderContext, ViewKey, WeakContext};
use crate::core::types::{IntoSource, Mapper, NodeLike, Op, Source};
use crate::primitives::signal::Signal;
use crate::primitives::subscription::Subscription;
use crate::resolve::resolve;
use crate::tree::NodeId;

use super::commands::CommandBuffer;
use super::updater::{self, ChildUpdate};

type ReadFn = Rc<dyn Fn() -> Option<Source>>;
type ConnectFn = Rc<dyn Fn(WeakChangeable) -> Subscription>;

#[derive(Default)]
struct ChangeableState {
    /// Last value rendered; `None` before the first render.
    rendered: Option<Source>,
    old_node: Option<NodeId>,
    /// Sibling that followed the node when the value last rendered nothing.
    slot_anchor: Option<NodeId>,
    parent: Option<NodeId>,
    fragment: Option<NodeId>,
    candidate: Option<NodeId>,
    forks: HashMap<NodeId, Changeable>,
}

pub(crate) struct ChangeableInner {
    this: Weak<ChangeableInner>,
    ctx: WeakContext,
    key: ViewKey,
    read: ReadFn,
    connect: ConnectFn,
    mapper: Option<Mapper>,
    is_fork: bool,
    flags: Cell<u32>,
    state: RefCell<ChangeableState>,
    buffer: CommandBuffer,
    subscription: RefCell<Subscription>,
}

/// Where a pending view stands during the commit phase.
enum Landing {
    Commit(NodeId),
    Wait,
    Abandon,
}

// =============================================================================
// CHANGEABLE
// =============================================================================

/// Live rendering of one reactive value.
///
/// Usable directly, or as an item of a collection (it is a [`NodeLike`]), in
/// which case the mapped view negotiates its parent.
///
/// # Example
///
/// ```
/// use spark_reflect::{signal, Changeable, Primitive, RenderContext};
///
/// let ctx = RenderContext::new();
/// let label = signal(Primitive::from("draft"));
/// let view = Changeable::bind(&ctx, &label, None);
///
/// let header = ctx.create_element("h1");
/// assert!(view.commit_parent(header));
/// assert_eq!(ctx.child_texts(header), vec!["draft"]);
///
/// label.set(Primitive::from("final"));
/// assert_eq!(ctx.child_texts(header), vec!["final"]);
/// ```
#[derive(Clone)]
pub struct Changeable {
    inner: Rc<ChangeableInner>,
}

impl Changeable {
    /// View of `signal` through `mapper`, shared per (signal, mapper) pair.
    pub fn bind<T>(ctx: &RenderContext, signal: &Signal<T>, mapper: Option<&Mapper>) -> Changeable
    where
        T: IntoSource + 'static,
    {
        let key = ViewKey {
            source: signal.ptr_key(),
            mapper: mapper.map_or(0, Mapper::key),
        };
        if let Some(existing) = ctx.changeable(key) {
            if !existing.is_disposed() {
                return existing;
            }
        }

        let weak = signal.downgrade();
        let read: ReadFn = Rc::new(move || weak.upgrade().map(|s| s.with(IntoSource::to_source)));

        let weak = signal.downgrade();
        let connect: ConnectFn = Rc::new(move |view: WeakChangeable| match weak.upgrade() {
            Some(signal) => signal.subscribe(move |value: &T, _| {
                if let Some(view) = view.upgrade() {
                    view.on_value(value.to_source());
                }
            }),
            None => Subscription::empty(),
        });

        let view = Self::build(ctx, key, read, connect, mapper.cloned(), false);
        ctx.remember_changeable(key, view.clone());
        tracing::debug!(signal = key.source, "changeable view created");
        view
    }

    fn build(
        ctx: &RenderContext,
        key: ViewKey,
        read: ReadFn,
        connect: ConnectFn,
        mapper: Option<Mapper>,
        is_fork: bool,
    ) -> Changeable {
        Changeable {
            inner: Rc::new_cyclic(|this| ChangeableInner {
                this: this.clone(),
                ctx: ctx.downgrade(),
                key,
                read,
                connect,
                mapper,
                is_fork,
                flags: Cell::new(0),
                state: RefCell::new(ChangeableState::default()),
                buffer: CommandBuffer::new(),
                subscription: RefCell::new(Subscription::empty()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakChangeable {
        WeakChangeable(Rc::downgrade(&self.inner))
    }

    fn ctx(&self) -> Option<RenderContext> {
        self.inner.ctx.upgrade()
    }

    fn has(&self, flag: u32) -> bool {
        has_flag(self.inner.flags.get(), flag)
    }

    fn set_flags(&self, on: u32, off: u32) {
        self.inner.flags.set((self.inner.flags.get() | on) & !off);
    }

    // =========================================================================
    // STATE
    // =========================================================================

    pub fn is_pending(&self) -> bool {
        self.has(PENDING)
    }

    pub fn is_attached(&self) -> bool {
        self.has(ATTACHED)
    }

    pub fn is_disposed(&self) -> bool {
        self.has(DISPOSED)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.inner.state.borrow().parent
    }

    /// Parent this view is waiting to land under.
    pub fn candidate(&self) -> Option<NodeId> {
        self.inner.state.borrow().candidate
    }

    pub fn ptr_eq(&self, other: &Changeable) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // NODE ACCESS
    // =========================================================================

    /// The current node, rendering the value on first use.
    ///
    /// Before a parent is known the node is held in a detached fragment.
    pub fn element(&self) -> Option<NodeId> {
        if self.is_disposed() {
            return None;
        }
        let ctx = self.ctx()?;
        {
            let state = self.inner.state.borrow();
            if state.rendered.is_some() {
                return state.old_node.filter(|n| ctx.contains(*n));
            }
        }

        let value = (self.inner.read)().unwrap_or_default();
        let parent = self.parent();
        let node = resolve(&ctx, &value, self.inner.mapper.as_ref(), 0, parent);

        let mut fragment = None;
        if let Some(node) = node {
            if parent.is_none() && ctx.parent(node).is_none() {
                let holder = ctx.create_fragment();
                if ctx.append_child(holder, node).is_ok() {
                    fragment = Some(holder);
                }
            }
        }

        let mut state = self.inner.state.borrow_mut();
        state.rendered = Some(value);
        state.old_node = node;
        if fragment.is_some() {
            state.fragment = fragment;
        }
        node
    }

    /// A node for insertion under `candidate`.
    ///
    /// If the current node already lives under another container, a fork of
    /// this view scoped to `candidate` supplies a separate node. Otherwise the
    /// current node is returned and the view waits (pending) until it is
    /// observed under `candidate`.
    pub fn element_for_potential_parent(&self, candidate: NodeId) -> Option<NodeId> {
        let node = self.element()?;
        let ctx = self.ctx()?;

        let owned_elsewhere = ctx.with_tree(|t| {
            t.parent(node).is_some_and(|current| {
                !t.is_fragment(current) && !t.is_descendant(node, candidate)
            })
        });
        if owned_elsewhere && !self.inner.is_fork {
            let fork = self.fork_for(&ctx, candidate);
            return fork.element_for_potential_parent(candidate);
        }

        self.expect(&ctx, candidate);
        Some(node)
    }

    fn fork_for(&self, ctx: &RenderContext, candidate: NodeId) -> Changeable {
        let mut state = self.inner.state.borrow_mut();
        if let Some(fork) = state.forks.get(&candidate) {
            if !fork.is_disposed() {
                return fork.clone();
            }
        }
        let fork = Self::build(
            ctx,
            self.inner.key,
            self.inner.read.clone(),
            self.inner.connect.clone(),
            self.inner.mapper.clone(),
            true,
        );
        state.forks.insert(candidate, fork.clone());
        tracing::debug!(?candidate, "changeable forked for a second parent");
        fork
    }

    /// Wait for the node to land under `candidate`; commits right away when
    /// it already has.
    fn expect(&self, ctx: &RenderContext, candidate: NodeId) {
        if self.is_disposed() || self.parent() == Some(candidate) {
            return;
        }
        if !ctx.with_tree(|t| t.is_valid_container(candidate)) {
            return;
        }
        self.inner.state.borrow_mut().candidate = Some(candidate);
        self.set_flags(PENDING, 0);
        if !self.commit() {
            ctx.enqueue_commit(self.downgrade());
        }
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Promote a pending view whose node has landed under its candidate.
    ///
    /// A fragment candidate commits to whatever real container the node ends
    /// up in. Returns true when the view attached.
    pub fn commit(&self) -> bool {
        if !self.is_pending() || self.is_disposed() {
            return false;
        }
        let Some(ctx) = self.ctx() else {
            return false;
        };
        let (candidate, node) = {
            let state = self.inner.state.borrow();
            (state.candidate, state.old_node)
        };
        let (Some(candidate), Some(node)) = (candidate, node) else {
            self.abandon();
            return false;
        };

        let landing = ctx.with_tree(|t| {
            if !t.contains(node) {
                return Landing::Abandon;
            }
            if t.is_valid_container(candidate) && !t.is_fragment(candidate) {
                return if t.is_descendant(node, candidate) {
                    Landing::Commit(candidate)
                } else {
                    Landing::Wait
                };
            }
            match t.parent(node) {
                Some(p) if t.is_valid_container(p) && !t.is_fragment(p) => Landing::Commit(p),
                _ if t.contains(candidate) => Landing::Wait,
                _ => Landing::Abandon,
            }
        });

        match landing {
            Landing::Commit(parent) => self.commit_parent(parent),
            Landing::Wait => false,
            Landing::Abandon => {
                self.abandon();
                false
            }
        }
    }

    fn abandon(&self) {
        self.inner.state.borrow_mut().candidate = None;
        self.set_flags(0, PENDING);
    }

    /// Bind to `parent`: move the node under it (unless already below it),
    /// start following the signal and catch up on any change missed while
    /// detached.
    pub fn commit_parent(&self, parent: NodeId) -> bool {
        if self.is_disposed() {
            return false;
        }
        let Some(ctx) = self.ctx() else {
            return false;
        };
        if !ctx.with_tree(|t| t.is_valid_container(parent) && !t.is_fragment(parent)) {
            tracing::warn!(?parent, "commit target is not a container");
            return false;
        }
        if self.is_attached() && self.parent() == Some(parent) {
            return true;
        }

        let node = self.element();
        if let Some(node) = node {
            let placed = ctx.with_tree_mut(|t| {
                if t.is_descendant(node, parent) {
                    Ok(())
                } else {
                    t.append_child(parent, node)
                }
            });
            if let Err(err) = placed {
                tracing::warn!(?node, %err, "could not place value node");
            }
        }

        let fragment = {
            let mut state = self.inner.state.borrow_mut();
            state.parent = Some(parent);
            state.candidate = None;
            state.fragment.take()
        };
        self.set_flags(ATTACHED, PENDING);
        if let Some(fragment) = fragment {
            ctx.dispose_node(fragment);
        }

        let weak = self.downgrade();
        ctx.on_dispose(parent, move || {
            if let Some(view) = weak.upgrade() {
                if view.parent() == Some(parent) {
                    view.dispose();
                }
            }
        });

        if !self.inner.subscription.borrow().is_active() {
            let subscription = (self.inner.connect)(self.downgrade());
            *self.inner.subscription.borrow_mut() = subscription;
        }
        self.refresh();
        tracing::debug!(?parent, fork = self.inner.is_fork, "changeable attached");
        true
    }

    // =========================================================================
    // UPDATES
    // =========================================================================

    /// Re-read the signal and render it if it moved on.
    pub fn refresh(&self) {
        if let Some(value) = (self.inner.read)() {
            self.on_value(value);
        }
    }

    fn on_value(&self, value: Source) {
        if self.is_disposed() {
            return;
        }
        let Some(ctx) = self.ctx() else {
            return;
        };
        let unchanged = self
            .inner
            .state
            .borrow()
            .rendered
            .as_ref()
            .is_some_and(|r| r.same_as(&value));
        if unchanged {
            return;
        }

        let parent = self.parent();
        let new_node = resolve(&ctx, &value, self.inner.mapper.as_ref(), 0, parent);
        let (old_node, old_value, root) = {
            let mut state = self.inner.state.borrow_mut();
            let old = std::mem::replace(&mut state.old_node, new_node);
            let old_value = state.rendered.replace(value);
            (old.filter(|n| ctx.contains(*n)), old_value, state.parent.or(state.fragment))
        };

        // An empty value leaves no node behind; remember the next sibling so
        // the following value lands in the same slot.
        let anchor = match (old_node, new_node) {
            (Some(old), None) => {
                self.inner.state.borrow_mut().slot_anchor = next_sibling(&ctx, old);
                None
            }
            (None, Some(_)) => self.inner.state.borrow_mut().slot_anchor.take(),
            _ => None,
        };

        let update = ChildUpdate {
            op: Op::Set,
            index: usize::MAX,
            new_node,
            old_node,
            anchor,
        };
        if let Some(command) = ctx.with_tree(|t| updater::plan(t, &update, parent, root)) {
            self.inner.buffer.push(command);
            self.inner.buffer.flush(&ctx);
        }

        let rendered_here = old_value
            .as_ref()
            .is_some_and(|v| renders_own_node(v, self.inner.mapper.is_some()));
        if let Some(old) = old_node.filter(|n| rendered_here && Some(*n) != new_node) {
            ctx.release_detached(old);
        }
    }

    // =========================================================================
    // DISPOSAL
    // =========================================================================

    /// Stop following the signal. Idempotent; the node stays where it is.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.set_flags(DISPOSED, PENDING | ATTACHED);

        let subscription = std::mem::replace(
            &mut *self.inner.subscription.borrow_mut(),
            Subscription::empty(),
        );
        subscription.unsubscribe();

        let forks: Vec<Changeable> = self
            .inner
            .state
            .borrow_mut()
            .forks
            .drain()
            .map(|(_, fork)| fork)
            .collect();
        for fork in forks {
            fork.dispose();
        }

        if !self.inner.is_fork {
            if let Some(ctx) = self.ctx() {
                let forgotten = match ctx.changeable(self.inner.key) {
                    Some(current) if current.ptr_eq(self) => ctx.forget_changeable(self.inner.key),
                    _ => None,
                };
                drop(forgotten);
            }
        }
        tracing::debug!(fork = self.inner.is_fork, "changeable disposed");
    }
}

impl std::fmt::Debug for Changeable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Changeable")
            .field("node", &state.old_node)
            .field("parent", &state.parent)
            .field("candidate", &state.candidate)
            .field("forks", &state.forks.len())
            .field("flags", &format_args!("{:#x}", self.inner.flags.get()))
            .finish()
    }
}

/// Whether rendering `value` created a node nobody else holds.
///
/// Primitives always render to a new text node; anything a mapper builds from
/// a plain object is new as well. Nodes, wrappers, signals and thunks hand out
/// nodes that live on elsewhere.
fn renders_own_node(value: &Source, mapped: bool) -> bool {
    match value {
        Source::Primitive(_) => true,
        Source::Object(_) => mapped,
        _ => false,
    }
}

fn next_sibling(ctx: &RenderContext, node: NodeId) -> Option<NodeId> {
    ctx.with_tree(|t| {
        let parent = t.parent(node)?;
        let at = t.index_of(parent, node)?;
        t.children(parent).get(at + 1).copied()
    })
}

// =============================================================================
// NODE-LIKE
// =============================================================================

impl ChangeableInner {
    fn handle(&self) -> Option<Changeable> {
        self.this.upgrade().map(|inner| Changeable { inner })
    }
}

impl NodeLike for ChangeableInner {
    fn element(&self, _ctx: &RenderContext) -> Option<NodeId> {
        self.handle()?.element()
    }

    fn element_for_potential_parent(&self, _ctx: &RenderContext, candidate: NodeId) -> Option<NodeId> {
        self.handle()?.element_for_potential_parent(candidate)
    }

    fn expect_parent(&self, ctx: &RenderContext, candidate: NodeId) {
        if let Some(view) = self.handle() {
            view.expect(ctx, candidate);
        }
    }
}

impl IntoSource for Changeable {
    /// The same allocation every time, so collections can key on it.
    fn to_source(&self) -> Source {
        Source::NodeLike(self.inner.clone())
    }
}

/// Weak handle kept on the context's commit queue.
#[derive(Clone)]
pub(crate) struct WeakChangeable(Weak<ChangeableInner>);

impl WeakChangeable {
    pub(crate) fn upgrade(&self) -> Option<Changeable> {
        self.0.upgrade().map(|inner| Changeable { inner })
    }

    pub(crate) fn ptr_eq(&self, other: &WeakChangeable) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Primitive;
    use crate::primitives::signal::signal;

    #[test]
    fn detached_view_holds_its_node_in_a_fragment() {
        let ctx = RenderContext::new();
        let value = signal(Primitive::from("hello"));
        let view = Changeable::bind(&ctx, &value, None);

        let node = view.element().unwrap();
        let holder = ctx.parent(node).unwrap();
        assert!(ctx.with_tree(|t| t.is_fragment(holder)));
        assert!(!view.is_attached());
        assert_eq!(value.listener_count(), 0);
    }

    #[test]
    fn memoized_per_signal_and_mapper() {
        let ctx = RenderContext::new();
        let value = signal(Source::Null);
        let a = Changeable::bind(&ctx, &value, None);
        let b = Changeable::bind(&ctx, &value, None);
        assert!(a.ptr_eq(&b));

        let mapper = Mapper::identity();
        assert!(!a.ptr_eq(&Changeable::bind(&ctx, &value, Some(&mapper))));
    }

    #[test]
    fn commit_parent_subscribes_and_swaps_in_place() {
        let ctx = RenderContext::new();
        let row = ctx.create_element("tr");
        let before = ctx.create_text("<");
        ctx.append_child(row, before).unwrap();

        let value = signal(Some(Primitive::from(1)));
        let view = Changeable::bind(&ctx, &value, None);
        assert!(view.commit_parent(row));
        let after = ctx.create_text(">");
        ctx.append_child(row, after).unwrap();

        value.set(Some(Primitive::from(2)));
        assert_eq!(ctx.child_texts(row), vec!["<", "2", ">"]);
        value.set(None);
        assert_eq!(ctx.child_texts(row), vec!["<", ">"]);
        value.set(Some(Primitive::from(3)));
        assert_eq!(ctx.child_texts(row), vec!["<", "3", ">"]);
    }

    #[test]
    fn empty_value_at_the_end_comes_back_at_the_end() {
        let ctx = RenderContext::new();
        let row = ctx.create_element("tr");
        let before = ctx.create_text("<");
        ctx.append_child(row, before).unwrap();

        let value = signal(Some(Primitive::from("x")));
        let view = Changeable::bind(&ctx, &value, None);
        view.commit_parent(row);

        value.set(None);
        value.set(Some(Primitive::from("y")));
        assert_eq!(ctx.child_texts(row), vec!["<", "y"]);
    }

    #[test]
    fn replaced_text_is_disposed() {
        let ctx = RenderContext::new();
        let host = ctx.create_element("span");
        let count = signal(Primitive::from(0));
        let view = Changeable::bind(&ctx, &count, None);
        view.commit_parent(host);
        let first = view.element().unwrap();
        let arena = ctx.with_tree(|t| t.len());

        for n in 1..=1000 {
            count.set(Primitive::from(n));
        }
        assert_eq!(ctx.child_texts(host), vec!["1000"]);
        assert_eq!(ctx.with_tree(|t| t.len()), arena);
        assert!(!ctx.contains(first));
    }

    #[test]
    fn caller_nodes_survive_a_swap() {
        let ctx = RenderContext::new();
        let host = ctx.create_element("div");
        let a = ctx.create_text("a");
        let b = ctx.create_text("b");
        let shown = signal(a);
        let view = Changeable::bind(&ctx, &shown, None);
        view.commit_parent(host);

        shown.set(b);
        assert_eq!(ctx.children(host), vec![b]);
        assert!(ctx.contains(a));
    }

    #[test]
    fn changes_while_detached_are_caught_up_on_commit() {
        let ctx = RenderContext::new();
        let value = signal(Primitive::from("old"));
        let view = Changeable::bind(&ctx, &value, None);
        view.element();

        value.set(Primitive::from("new"));
        let slot = ctx.create_element("span");
        view.commit_parent(slot);
        assert_eq!(ctx.child_texts(slot), vec!["new"]);
    }

    #[test]
    fn pending_until_observed_under_the_candidate() {
        let ctx = RenderContext::new();
        let value = signal(Primitive::from("x"));
        let view = Changeable::bind(&ctx, &value, None);
        let target = ctx.create_element("div");
        let placeholder = ctx.create_element("span");

        let node = view.element_for_potential_parent(target).unwrap();
        assert!(view.is_pending());
        assert_eq!(ctx.pending_commit_count(), 1);
        assert_eq!(ctx.run_commit_phase(), 0);

        ctx.append_child(target, placeholder).unwrap();
        ctx.append_child(placeholder, node).unwrap();
        assert_eq!(ctx.run_commit_phase(), 1);
        assert!(view.is_attached());
        assert_eq!(view.parent(), Some(target));
        assert_eq!(ctx.pending_commit_count(), 0);

        value.set(Primitive::from("y"));
        assert_eq!(ctx.text_content(placeholder), "y");
    }

    #[test]
    fn second_parent_gets_a_fork() {
        let ctx = RenderContext::new();
        let value = signal(Primitive::from("shared"));
        let view = Changeable::bind(&ctx, &value, None);
        let first = ctx.create_element("div");
        let second = ctx.create_element("div");
        view.commit_parent(first);

        let original = view.element().unwrap();
        let forked = view.element_for_potential_parent(second).unwrap();
        assert_ne!(original, forked);
        assert_eq!(ctx.parent(original), Some(first));

        ctx.append_child(second, forked).unwrap();
        ctx.run_commit_phase();
        value.set(Primitive::from("both"));
        assert_eq!(ctx.child_texts(first), vec!["both"]);
        assert_eq!(ctx.child_texts(second), vec!["both"]);
    }

    #[test]
    fn dispose_is_idempotent_and_keeps_the_node() {
        let ctx = RenderContext::new();
        let value = signal(Primitive::from("v"));
        let view = Changeable::bind(&ctx, &value, None);
        let host = ctx.create_element("p");
        view.commit_parent(host);

        view.dispose();
        view.dispose();
        assert_eq!(value.listener_count(), 0);
        value.set(Primitive::from("w"));
        assert_eq!(ctx.child_texts(host), vec!["v"]);
        assert!(!view.ptr_eq(&Changeable::bind(&ctx, &value, None)));
    }

    #[test]
    fn disposing_the_parent_disposes_the_view() {
        let ctx = RenderContext::new();
        let value = signal(Primitive::from("v"));
        let view = Changeable::bind(&ctx, &value, None);
        let host = ctx.create_element("p");
        view.commit_parent(host);

        ctx.dispose_node(host);
        assert!(view.is_disposed());
        assert_eq!(value.listener_count(), 0);
    }
}
