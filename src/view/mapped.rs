// ============================================================================
// spark-reflect - Mapped Collection View
// Keeps a parent's children in sync with an observable collection
// ============================================================================
//
// A view owns:
// - a positional mirror of the collection (one optional node per item)
// - a keyed map for reference-identity items (node reused across re-adds)
// - a value map for deduped primitives
// - a command buffer flushed per event or per batch
//
// Every event updates the mirror first, then plans at most one command. The
// mirror replays the same ordered events as the collection, so its indices
// are exact even when queued commands have not reached the tree yet.
//
// Reference-identity items and deduped primitives are reference counted: a
// node leaves the tree when its last occurrence goes. Keyed entries survive
// at zero so a reorder (remove then add) gets the same node back.
//
// Nodes rendered for primitive items belong to the view. Once a flush has
// taken one out of the tree it is disposed; item nodes supplied by the caller
// are only ever detached.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use crate::collections::{CollectionId, ErasedCollection, FlushPolicy, ObservableCollection};
use crate::core::constants::{
    has_flag, DISPOSED, MATERIALIZED, REMOVE_ON_EMPTY_WITH_PRIMITIVES, SAW_PRIMITIVES, SET_LIKE,
    UNIQUE_PRIMITIVES,
};
use crate::core::context::{RenderContext, ViewKey, WeakContext};
use crate::core::options::ViewOptions;
use crate::core::types::{Change, IntoSource, Mapper, Op, Primitive, Source, SourceKey, WeakSource};
use crate::primitives::subscription::Subscription;
use crate::resolve::resolve;
use crate::tree::NodeId;

use super::commands::{self, Behavior, CommandBuffer};
use super::updater::{self, ChildUpdate};

/// Dead keyed entries are pruned once the map outgrows the mirror by this.
const PRUNE_SLACK: usize = 32;

// =============================================================================
// STATE
// =============================================================================

struct KeyedEntry {
    source: WeakSource,
    node: NodeId,
    count: usize,
}

struct SharedText {
    node: NodeId,
    count: usize,
}

#[derive(Default)]
struct ViewState {
    parent: Option<NodeId>,
    fragment: Option<NodeId>,
    mirror: Vec<Option<NodeId>>,
    keyed: HashMap<SourceKey, KeyedEntry>,
    primitives: HashMap<Primitive, SharedText>,
    /// Rendered primitive nodes on their way out, disposed after the flush.
    retired: Vec<NodeId>,
}

impl ViewState {
    fn root(&self) -> Option<NodeId> {
        self.parent.or(self.fragment)
    }

    /// First mirrored node after `index` that is not `node`.
    fn anchor_after(&self, index: usize, node: NodeId) -> Option<NodeId> {
        self.mirror
            .iter()
            .skip(index + 1)
            .flatten()
            .copied()
            .find(|n| *n != node)
    }

    /// Mirrored nodes in order, each once.
    fn distinct_nodes(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.mirror
            .iter()
            .flatten()
            .copied()
            .filter(|n| seen.insert(*n))
            .collect()
    }
}

/// A node handed out for one item occurrence.
#[derive(Clone, Copy, Debug)]
struct Acquired {
    node: Option<NodeId>,
    /// The node is not yet placed for another occurrence.
    fresh: bool,
}

struct MappedInner {
    ctx: WeakContext,
    key: ViewKey,
    collection_id: CollectionId,
    collection: Weak<dyn ErasedCollection>,
    mapper: Option<Mapper>,
    policy: FlushPolicy,
    flags: Cell<u32>,
    state: RefCell<ViewState>,
    buffer: CommandBuffer,
    subscription: RefCell<Subscription>,
}

/// The node a wrapper shows now; it may have swapped the one recorded.
fn live_node(ctx: &RenderContext, source: &Source, recorded: NodeId) -> NodeId {
    match source {
        Source::NodeLike(value) => value
            .element(ctx)
            .filter(|n| ctx.contains(*n))
            .unwrap_or(recorded),
        _ => recorded,
    }
}

// =============================================================================
// MAPPED VIEW
// =============================================================================

/// Live rendering of an observable collection.
///
/// One view exists per (collection, mapper) pair within a context; binding
/// the pair again returns the same view. Disposal detaches the subscription
/// and leaves rendered nodes where they are.
#[derive(Clone)]
pub struct MappedView {
    inner: Rc<MappedInner>,
}

impl MappedView {
    /// Bind `collection` through `mapper`, reusing the existing view for the
    /// pair if there is one.
    ///
    /// Without a parent hint every current item is rendered immediately into
    /// a detached fragment. With a hint the view renders on first read (or
    /// first event) into that parent.
    pub fn bind<C: ObservableCollection>(
        ctx: &RenderContext,
        collection: &C,
        mapper: Option<&Mapper>,
        parent_hint: Option<NodeId>,
        options: ViewOptions,
    ) -> MappedView {
        let key = ViewKey {
            source: collection.collection_id().as_u64() as usize,
            mapper: mapper.map_or(0, Mapper::key),
        };
        if let Some(existing) = ctx.mapped_view(key) {
            if !existing.is_disposed() {
                if let Some(parent) = parent_hint {
                    existing.attach(parent);
                }
                return existing;
            }
        }

        let mut flags = options.flags();
        if collection.is_set_like() {
            flags |= SET_LIKE;
        }

        let view = MappedView {
            inner: Rc::new(MappedInner {
                ctx: ctx.downgrade(),
                key,
                collection_id: collection.collection_id(),
                collection: collection.erased(),
                mapper: mapper.cloned(),
                policy: collection.flush_policy(),
                flags: Cell::new(flags),
                state: RefCell::new(ViewState::default()),
                buffer: CommandBuffer::new(),
                subscription: RefCell::new(Subscription::empty()),
            }),
        };

        let weak = view.downgrade();
        let subscription = collection.subscribe(move |changes: &[Change<C::Item>]| {
            if let Some(view) = weak.upgrade() {
                let changes: Vec<Change<Source>> =
                    changes.iter().map(|c| c.map(IntoSource::to_source)).collect();
                view.on_changes(&changes);
            }
        });
        *view.inner.subscription.borrow_mut() = subscription;

        let weak = view.downgrade();
        collection.on_dispose(move || {
            if let Some(view) = weak.upgrade() {
                view.dispose();
            }
        });

        ctx.remember_mapped_view(key, view.clone());
        tracing::debug!(collection = ?view.inner.collection_id, ?parent_hint, "mapped view created");

        match parent_hint.filter(|p| ctx.with_tree(|t| t.is_valid_container(*p))) {
            Some(parent) => {
                view.inner.state.borrow_mut().parent = Some(parent);
                view.hook_root(ctx, parent);
            }
            None => {
                let fragment = ctx.create_fragment();
                view.inner.state.borrow_mut().fragment = Some(fragment);
                view.hook_root(ctx, fragment);
                view.materialize(ctx);
            }
        }
        view
    }

    fn downgrade(&self) -> WeakMappedView {
        WeakMappedView(Rc::downgrade(&self.inner))
    }

    fn ctx(&self) -> Option<RenderContext> {
        self.inner.ctx.upgrade()
    }

    fn has(&self, flag: u32) -> bool {
        has_flag(self.inner.flags.get(), flag)
    }

    fn set_flag(&self, flag: u32) {
        self.inner.flags.set(self.inner.flags.get() | flag);
    }

    fn dedupes_primitives(&self) -> bool {
        let flags = self.inner.flags.get();
        flags & (UNIQUE_PRIMITIVES | SET_LIKE) != 0
    }

    fn sources(&self) -> Vec<Source> {
        self.inner
            .collection
            .upgrade()
            .map(|c| c.sources())
            .unwrap_or_default()
    }

    fn behavior(&self) -> Option<Rc<dyn Behavior>> {
        self.inner.collection.upgrade().and_then(|c| c.behavior())
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    pub fn collection_id(&self) -> CollectionId {
        self.inner.collection_id
    }

    /// The bound parent, once known.
    pub fn parent(&self) -> Option<NodeId> {
        self.inner.state.borrow().parent
    }

    /// Where the nodes live: the bound parent, else the detached fragment.
    pub fn root(&self) -> Option<NodeId> {
        self.inner.state.borrow().root()
    }

    /// Rendered nodes in collection order, rendering first if needed.
    ///
    /// A node shared by several occurrences is listed once per occurrence.
    pub fn nodes(&self) -> Vec<NodeId> {
        if !self.has(MATERIALIZED) {
            if let Some(ctx) = self.ctx() {
                self.materialize(&ctx);
            }
        }
        self.inner.state.borrow().mirror.iter().flatten().copied().collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.has(DISPOSED)
    }

    pub fn is_materialized(&self) -> bool {
        self.has(MATERIALIZED)
    }

    /// Commands queued but not yet applied (a behavior is holding them).
    pub fn queued(&self) -> usize {
        self.inner.buffer.len()
    }

    pub fn ptr_eq(&self, other: &MappedView) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // ITEM -> NODE
    // =========================================================================

    fn acquire(&self, ctx: &RenderContext, source: &Source, index: usize) -> Acquired {
        let requestor = self.inner.state.borrow().parent;
        let mapper = self.inner.mapper.as_ref();

        if let Source::Primitive(value) = source {
            self.set_flag(SAW_PRIMITIVES);
            if !self.dedupes_primitives() {
                return Acquired {
                    node: resolve(ctx, source, mapper, index, requestor),
                    fresh: true,
                };
            }
            {
                let mut state = self.inner.state.borrow_mut();
                if let Some(shared) = state.primitives.get_mut(value) {
                    if ctx.contains(shared.node) {
                        shared.count += 1;
                        return Acquired {
                            node: Some(shared.node),
                            fresh: shared.count == 1,
                        };
                    }
                    state.primitives.remove(value);
                }
            }
            let node = resolve(ctx, source, mapper, index, requestor);
            if let Some(node) = node {
                self.inner
                    .state
                    .borrow_mut()
                    .primitives
                    .insert(value.clone(), SharedText { node, count: 1 });
            }
            return Acquired { node, fresh: true };
        }

        let (Some(key), Some(weak)) = (source.identity_key(), source.downgrade()) else {
            return Acquired {
                node: resolve(ctx, source, mapper, index, requestor),
                fresh: true,
            };
        };

        {
            let mut state = self.inner.state.borrow_mut();
            if let Some(entry) = state.keyed.get_mut(&key) {
                if entry.source.is_alive() && ctx.contains(entry.node) {
                    entry.count += 1;
                    return Acquired {
                        node: Some(entry.node),
                        fresh: entry.count == 1,
                    };
                }
                state.keyed.remove(&key);
            }
        }

        let node = resolve(ctx, source, mapper, index, requestor);
        if let Some(node) = node {
            self.inner.state.borrow_mut().keyed.insert(
                key,
                KeyedEntry {
                    source: weak,
                    node,
                    count: 1,
                },
            );
        }
        Acquired { node, fresh: true }
    }

    /// Drop one occurrence of `source`; returns the node to take out of the
    /// tree, if this was its last occurrence.
    fn release(&self, source: &Source, slot: Option<NodeId>) -> Option<NodeId> {
        let mut state = self.inner.state.borrow_mut();
        match source {
            Source::Primitive(value) if self.dedupes_primitives() => {
                let Some(shared) = state.primitives.get_mut(value) else {
                    return slot;
                };
                shared.count = shared.count.saturating_sub(1);
                if shared.count > 0 {
                    return None;
                }
                let node = shared.node;
                state.primitives.remove(value);
                Some(node)
            }
            _ => {
                let entry = match source.identity_key() {
                    Some(key) => state.keyed.get_mut(&key),
                    None => None,
                };
                match entry {
                    Some(entry) => {
                        entry.count = entry.count.saturating_sub(1);
                        (entry.count == 0).then_some(entry.node)
                    }
                    None => slot,
                }
            }
        }
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    /// Render every current item into the root, once.
    fn materialize(&self, ctx: &RenderContext) {
        if self.has(MATERIALIZED) || self.is_disposed() {
            return;
        }
        self.set_flag(MATERIALIZED);
        let Some(root) = self.root() else {
            return;
        };

        let sources = self.sources();
        let mut mirror = Vec::with_capacity(sources.len());
        let mut placed = Vec::new();
        for (index, source) in sources.iter().enumerate() {
            let acquired = self.acquire(ctx, source, index);
            mirror.push(acquired.node);
            if let (Some(node), true) = (acquired.node, acquired.fresh) {
                placed.push(node);
            }
        }
        self.inner.state.borrow_mut().mirror = mirror;

        ctx.with_tree_mut(|tree| {
            for node in &placed {
                if let Err(err) = tree.append_child(root, *node) {
                    tracing::warn!(?node, %err, "could not place rendered item");
                }
            }
        });
        tracing::debug!(collection = ?self.inner.collection_id, items = sources.len(), "materialized");
        ctx.run_commit_phase();
    }

    fn on_changes(&self, changes: &[Change<Source>]) {
        if self.is_disposed() {
            return;
        }
        let Some(ctx) = self.ctx() else {
            return;
        };
        if !self.has(MATERIALIZED) {
            self.materialize(&ctx);
            self.after_flush(&ctx);
            return;
        }

        for change in changes {
            self.apply_change(&ctx, change);
            if self.inner.policy == FlushPolicy::PerEvent {
                self.flush(&ctx);
            }
        }
        if self.inner.policy == FlushPolicy::PerBatch {
            self.flush(&ctx);
        }
    }

    fn apply_change(&self, ctx: &RenderContext, change: &Change<Source>) {
        let update = match change.op {
            Op::Get => return,
            Op::Add => {
                let source = change.new.clone().unwrap_or_default();
                let index = change.index.min(self.inner.state.borrow().mirror.len());
                let acquired = self.acquire(ctx, &source, index);

                let mut state = self.inner.state.borrow_mut();
                state.mirror.insert(index, acquired.node);
                match (acquired.node, acquired.fresh) {
                    (Some(node), true) => {
                        ChildUpdate::add(index, node, state.anchor_after(index, node))
                    }
                    _ => return,
                }
            }
            Op::Remove => {
                let index = change.index;
                let slot = {
                    let mut state = self.inner.state.borrow_mut();
                    if index >= state.mirror.len() {
                        tracing::debug!(index, "remove past the end ignored");
                        return;
                    }
                    state.mirror.remove(index)
                };
                let source = change.old.clone().unwrap_or_default();
                match self.release(&source, slot) {
                    Some(node) => {
                        let node = live_node(ctx, &source, node);
                        self.retire(&source, node);
                        ChildUpdate::remove(index, node)
                    }
                    None => return,
                }
            }
            Op::Set => {
                let index = change.index;
                let slot = match self.inner.state.borrow().mirror.get(index) {
                    Some(slot) => *slot,
                    None => {
                        tracing::debug!(index, "set past the end ignored");
                        return;
                    }
                };
                let old = change.old.clone().unwrap_or_default();
                let removed = self
                    .release(&old, slot)
                    .map(|node| live_node(ctx, &old, node));
                if let Some(node) = removed {
                    self.retire(&old, node);
                }
                let new = change.new.clone().unwrap_or_default();
                let acquired = self.acquire(ctx, &new, index);

                let mut state = self.inner.state.borrow_mut();
                state.mirror[index] = acquired.node;
                let new_node = acquired.node.filter(|_| acquired.fresh);
                let anchor = match (new_node, removed) {
                    (Some(node), None) => state.anchor_after(index, node),
                    _ => None,
                };
                ChildUpdate {
                    op: Op::Set,
                    index,
                    new_node,
                    old_node: removed,
                    anchor,
                }
            }
        };

        let (hint, last_known) = {
            let state = self.inner.state.borrow();
            (state.parent, state.root())
        };
        if let Some(command) = ctx.with_tree(|t| updater::plan(t, &update, hint, last_known)) {
            self.inner.buffer.push(command);
        }
    }

    fn flush(&self, ctx: &RenderContext) {
        let weak = self.downgrade();
        let after: Rc<dyn Fn(&RenderContext)> = Rc::new(move |ctx: &RenderContext| {
            if let Some(view) = weak.upgrade() {
                view.after_flush(ctx);
            }
        });
        commands::dispatch(ctx, &self.inner.buffer, self.behavior(), Some(after));
    }

    /// Queue `node` for disposal if the view rendered it for a primitive.
    fn retire(&self, source: &Source, node: NodeId) {
        if matches!(source, Source::Primitive(_)) {
            self.inner.state.borrow_mut().retired.push(node);
        }
    }

    /// Dispose retired nodes that the flush took out of the tree.
    fn dispose_retired(&self, ctx: &RenderContext) {
        let retired = {
            let mut state = self.inner.state.borrow_mut();
            let retired = std::mem::take(&mut state.retired);
            let live: HashSet<NodeId> = state.mirror.iter().flatten().copied().collect();
            retired
                .into_iter()
                .filter(|node| !live.contains(node))
                .collect::<Vec<_>>()
        };
        let disposed = retired
            .into_iter()
            .filter(|node| ctx.release_detached(*node))
            .count();
        if disposed > 0 {
            tracing::trace!(collection = ?self.inner.collection_id, disposed, "retired nodes disposed");
        }
    }

    fn after_flush(&self, ctx: &RenderContext) {
        self.dispose_retired(ctx);

        if self.has(REMOVE_ON_EMPTY_WITH_PRIMITIVES)
            && self.has(SAW_PRIMITIVES)
            && self.inner.buffer.is_empty()
            && self.sources().is_empty()
        {
            self.sweep(ctx);
        }

        let oversized = {
            let state = self.inner.state.borrow();
            state.keyed.len() > state.mirror.len() + PRUNE_SLACK
        };
        if oversized {
            self.prune();
        }

        ctx.run_commit_phase();
    }

    /// Remove every child of the root that is not a current item's node.
    fn sweep(&self, ctx: &RenderContext) {
        let (root, keep) = {
            let state = self.inner.state.borrow();
            let keep: HashSet<NodeId> = state.mirror.iter().flatten().copied().collect();
            (state.root(), keep)
        };
        let Some(root) = root else {
            return;
        };

        let removed = ctx.with_tree_mut(|tree| {
            let stale: Vec<NodeId> = tree
                .children(root)
                .iter()
                .copied()
                .filter(|c| !keep.contains(c))
                .collect();
            for child in &stale {
                if let Err(err) = tree.remove_child(root, *child) {
                    tracing::warn!(?child, %err, "sweep could not remove child");
                }
            }
            stale.len()
        });

        let dropped: Vec<NodeId> = {
            let mut state = self.inner.state.borrow_mut();
            let mut dropped = Vec::new();
            state.primitives.retain(|_, shared| {
                let kept = keep.contains(&shared.node);
                if !kept {
                    dropped.push(shared.node);
                }
                kept
            });
            dropped
        };
        for node in dropped {
            ctx.release_detached(node);
        }
        if removed > 0 {
            tracing::debug!(collection = ?self.inner.collection_id, removed, "swept stale children");
        }
    }

    /// Forget keyed entries whose item was released, disposing their detached
    /// nodes. Returns how many entries were dropped.
    pub fn prune(&self) -> usize {
        let Some(ctx) = self.ctx() else {
            return 0;
        };
        let dead: Vec<NodeId> = {
            let mut state = self.inner.state.borrow_mut();
            let mut dead = Vec::new();
            state.keyed.retain(|_, entry| {
                let alive = entry.source.is_alive() && ctx.contains(entry.node);
                if !alive && entry.count == 0 {
                    dead.push(entry.node);
                }
                alive || entry.count > 0
            });
            dead
        };
        for node in &dead {
            if ctx.contains(*node) && ctx.parent(*node).is_none() {
                ctx.dispose_node(*node);
            }
        }
        dead.len()
    }

    // =========================================================================
    // PARENTING
    // =========================================================================

    /// Dispose this view when `root` is disposed while still its root.
    fn hook_root(&self, ctx: &RenderContext, root: NodeId) {
        let weak = self.downgrade();
        ctx.on_dispose(root, move || {
            if let Some(view) = weak.upgrade() {
                if view.root() == Some(root) {
                    view.dispose();
                }
            }
        });
    }

    /// Render into `parent`, moving every node out of the previous root.
    ///
    /// Returns false if the view is disposed or `parent` cannot hold
    /// children.
    pub fn attach(&self, parent: NodeId) -> bool {
        if self.is_disposed() {
            return false;
        }
        let Some(ctx) = self.ctx() else {
            return false;
        };
        if !ctx.with_tree(|t| t.is_valid_container(parent) && !t.is_fragment(parent)) {
            tracing::warn!(?parent, "attach target is not a container");
            return false;
        }
        if self.parent() == Some(parent) {
            self.materialize(&ctx);
            return true;
        }

        // Commands aimed at the old root land there before the move.
        self.inner.buffer.flush(&ctx);

        let (previous, fragment) = {
            let mut state = self.inner.state.borrow_mut();
            let previous = state.parent.replace(parent);
            (previous, state.fragment.take())
        };
        self.hook_root(&ctx, parent);

        if self.has(MATERIALIZED) {
            let nodes = self.inner.state.borrow().distinct_nodes();
            ctx.with_tree_mut(|tree| {
                for node in &nodes {
                    if let Err(err) = tree.append_child(parent, *node) {
                        tracing::warn!(?node, %err, "could not move rendered item");
                    }
                }
            });
        } else {
            self.materialize(&ctx);
        }

        if let Some(fragment) = fragment {
            ctx.dispose_node(fragment);
        }

        // Wrappers rendered before a parent was known bind now.
        for source in self.sources() {
            if let Source::NodeLike(value) = &source {
                value.expect_parent(&ctx, parent);
            }
        }
        ctx.run_commit_phase();
        tracing::debug!(collection = ?self.inner.collection_id, ?previous, ?parent, "mapped view attached");
        true
    }

    // =========================================================================
    // DISPOSAL
    // =========================================================================

    /// Detach from the collection. Idempotent; rendered nodes stay put.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.set_flag(DISPOSED);

        let subscription = std::mem::replace(
            &mut *self.inner.subscription.borrow_mut(),
            Subscription::empty(),
        );
        subscription.unsubscribe();

        let parent = self.parent();
        {
            let mut state = self.inner.state.borrow_mut();
            state.keyed.clear();
            state.primitives.clear();
        }

        if let Some(ctx) = self.ctx() {
            let forgotten = match ctx.mapped_view(self.inner.key) {
                Some(current) if current.ptr_eq(self) => ctx.forget_mapped_view(self.inner.key),
                _ => None,
            };
            if let Some(parent) = parent {
                ctx.unregister_reflection(parent, self.inner.collection_id);
            }
            drop(forgotten);
        }
        tracing::debug!(collection = ?self.inner.collection_id, "mapped view disposed");
    }
}

impl std::fmt::Debug for MappedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("MappedView")
            .field("collection", &self.inner.collection_id)
            .field("parent", &state.parent)
            .field("fragment", &state.fragment)
            .field("items", &state.mirror.len())
            .field("flags", &format_args!("{:#x}", self.inner.flags.get()))
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakMappedView(Weak<MappedInner>);

impl WeakMappedView {
    pub(crate) fn upgrade(&self) -> Option<MappedView> {
        self.0.upgrade().map(|inner| MappedView { inner })
    }
}

// =============================================================================
// TESTS
// =============================================================================
