// ============================================================================
// spark-reflect - Render Context
// Registries owned by one rendering root and passed explicitly
// ============================================================================
//
// Everything that would otherwise be ambient shared state lives here: the
// node tree, the identity cache, the view memo tables, the per-parent reflect
// registry and the pending-commit queue. Dropping the context releases all of
// it; disposing a node releases the entries tied to that subtree.
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::options::ViewOptions;
use super::types::Source;
use crate::collections::CollectionId;
use crate::core::error::TreeError;
use crate::resolve::IdentityCache;
use crate::tree::{NodeId, Tree};
use crate::view::changeable::{Changeable, WeakChangeable};
use crate::view::mapped::MappedView;

/// Memo key of a view: the identity of what it renders plus its mapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ViewKey {
    pub(crate) source: usize,
    pub(crate) mapper: usize,
}

// =============================================================================
// CONTEXT INNER
// =============================================================================

pub(crate) struct ContextInner {
    options: ViewOptions,

    tree: RefCell<Tree>,

    identity: RefCell<IdentityCache>,

    /// Mapped views memoized per (collection, mapper)
    mapped_views: RefCell<HashMap<ViewKey, MappedView>>,

    /// Changeable views memoized per (signal, mapper)
    changeables: RefCell<HashMap<ViewKey, Changeable>>,

    /// Collections reflected into each parent, with the view doing it
    reflected: RefCell<HashMap<NodeId, Vec<(CollectionId, ViewKey)>>>,

    /// Views waiting for their node to land under a candidate parent
    pending_commits: RefCell<Vec<WeakChangeable>>,
}

// =============================================================================
// RENDER CONTEXT
// =============================================================================

/// Handle to one rendering root.
///
/// Cheap to clone; all clones share state. Views keep only a [`WeakContext`].
///
/// # Example
///
/// ```
/// use spark_reflect::RenderContext;
///
/// let ctx = RenderContext::new();
/// let list = ctx.create_element("ul");
/// let item = ctx.create_text("hello");
/// ctx.append_child(list, item).unwrap();
/// assert_eq!(ctx.child_texts(list), vec!["hello"]);
/// ```
#[derive(Clone)]
pub struct RenderContext {
    inner: Rc<ContextInner>,
}

/// Non-owning context handle.
#[derive(Clone)]
pub struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    pub fn upgrade(&self) -> Option<RenderContext> {
        self.inner.upgrade().map(|inner| RenderContext { inner })
    }
}

impl RenderContext {
    pub fn new() -> Self {
        Self::with_options(ViewOptions::default())
    }

    /// Context whose views default to `options`.
    pub fn with_options(options: ViewOptions) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                options,
                tree: RefCell::new(Tree::new()),
                identity: RefCell::new(IdentityCache::new()),
                mapped_views: RefCell::new(HashMap::new()),
                changeables: RefCell::new(HashMap::new()),
                reflected: RefCell::new(HashMap::new()),
                pending_commits: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn options(&self) -> ViewOptions {
        self.inner.options
    }

    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &RenderContext) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // TREE ACCESS
    // =========================================================================

    /// Read the tree. Do not call back into the context from `f`.
    pub fn with_tree<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.inner.tree.borrow())
    }

    /// Mutate the tree. Do not call back into the context from `f`.
    pub fn with_tree_mut<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        f(&mut self.inner.tree.borrow_mut())
    }

    pub fn create_element(&self, tag: impl Into<String>) -> NodeId {
        self.with_tree_mut(|t| t.create_element(tag))
    }

    pub fn create_text(&self, text: impl Into<String>) -> NodeId {
        self.with_tree_mut(|t| t.create_text(text))
    }

    pub fn create_fragment(&self) -> NodeId {
        self.with_tree_mut(Tree::create_fragment)
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.with_tree_mut(|t| t.append_child(parent, child))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.with_tree(|t| t.contains(node))
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.with_tree(|t| t.parent(node))
    }

    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.with_tree(|t| t.children(parent).to_vec())
    }

    pub fn child_texts(&self, parent: NodeId) -> Vec<String> {
        self.with_tree(|t| t.child_texts(parent))
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.with_tree(|t| t.text_content(node))
    }

    // =========================================================================
    // DISPOSAL
    // =========================================================================

    /// Append a teardown hook to `node`. Returns false if the node is gone.
    pub fn on_dispose(&self, node: NodeId, f: impl FnOnce() + 'static) -> bool {
        let Some(scope) = self.with_tree_mut(|t| t.scope(node)) else {
            return false;
        };
        scope.on_dispose(f);
        true
    }

    /// Remove `node` and its subtree, evict their cache entries and run
    /// their dispose hooks.
    pub fn dispose_node(&self, node: NodeId) -> bool {
        let removed = match self.with_tree_mut(|t| t.take_subtree(node)) {
            Ok(removed) => removed,
            Err(err) => {
                tracing::debug!(%err, "dispose of a missing node ignored");
                return false;
            }
        };

        {
            let mut identity = self.inner.identity.borrow_mut();
            let mut reflected = self.inner.reflected.borrow_mut();
            for (id, _) in &removed {
                identity.evict_node(*id);
                reflected.remove(id);
            }
        }

        tracing::debug!(?node, nodes = removed.len(), "disposed subtree");
        for (_, scope) in removed {
            if let Some(scope) = scope {
                scope.stop();
            }
        }
        true
    }

    // =========================================================================
    // IDENTITY CACHE
    // =========================================================================

    pub(crate) fn cached_node(&self, source: &Source) -> Option<NodeId> {
        let tree = self.inner.tree.borrow();
        self.inner.identity.borrow().get(source, &tree)
    }

    pub(crate) fn cache_node(&self, source: &Source, node: NodeId) -> bool {
        self.inner.identity.borrow_mut().insert(source, node)
    }

    /// Associate an object source with an already built node, so plain
    /// resolution of that object finds it.
    pub fn bind_source(&self, source: &Source, node: NodeId) -> bool {
        self.contains(node) && self.cache_node(source, node)
    }

    /// Forget the cached node of `source`.
    pub fn unbind_source(&self, source: &Source) -> Option<NodeId> {
        self.inner.identity.borrow_mut().remove(source)
    }

    /// Drop identity entries whose source or node is gone.
    pub fn purge(&self) -> usize {
        let tree = self.inner.tree.borrow();
        let purged = self.inner.identity.borrow_mut().purge(&tree);
        if purged > 0 {
            tracing::debug!(purged, "identity cache purged");
        }
        purged
    }

    /// Dispose `node` if it is out of the tree and no source resolves to it.
    ///
    /// Views call this for nodes they rendered themselves once a flush has
    /// taken them out. Returns true if the node was disposed.
    pub(crate) fn release_detached(&self, node: NodeId) -> bool {
        let detached = self.with_tree(|t| t.contains(node) && t.parent(node).is_none());
        if !detached || self.inner.identity.borrow().has_node(node) {
            return false;
        }
        self.dispose_node(node)
    }

    pub fn identity_len(&self) -> usize {
        self.inner.identity.borrow().len()
    }

    // =========================================================================
    // VIEW MEMO TABLES
    // =========================================================================

    pub(crate) fn mapped_view(&self, key: ViewKey) -> Option<MappedView> {
        self.inner.mapped_views.borrow().get(&key).cloned()
    }

    pub(crate) fn remember_mapped_view(&self, key: ViewKey, view: MappedView) {
        self.inner.mapped_views.borrow_mut().insert(key, view);
    }

    pub(crate) fn forget_mapped_view(&self, key: ViewKey) -> Option<MappedView> {
        self.inner.mapped_views.borrow_mut().remove(&key)
    }

    pub fn mapped_view_count(&self) -> usize {
        self.inner.mapped_views.borrow().len()
    }

    pub(crate) fn changeable(&self, key: ViewKey) -> Option<Changeable> {
        self.inner.changeables.borrow().get(&key).cloned()
    }

    pub(crate) fn remember_changeable(&self, key: ViewKey, view: Changeable) {
        self.inner.changeables.borrow_mut().insert(key, view);
    }

    pub(crate) fn forget_changeable(&self, key: ViewKey) -> Option<Changeable> {
        self.inner.changeables.borrow_mut().remove(&key)
    }

    // =========================================================================
    // REFLECT REGISTRY
    // =========================================================================

    /// Key of the view reflecting `collection` into `parent`, if any.
    pub(crate) fn reflection(&self, parent: NodeId, collection: CollectionId) -> Option<ViewKey> {
        self.inner
            .reflected
            .borrow()
            .get(&parent)?
            .iter()
            .find(|(c, _)| *c == collection)
            .map(|(_, key)| *key)
    }

    /// Record that the view under `key` reflects `collection` into `parent`,
    /// replacing any earlier view of the same pair.
    pub(crate) fn register_reflection(
        &self,
        parent: NodeId,
        collection: CollectionId,
        key: ViewKey,
    ) {
        let mut reflected = self.inner.reflected.borrow_mut();
        let list = reflected.entry(parent).or_default();
        match list.iter_mut().find(|(c, _)| *c == collection) {
            Some(entry) => entry.1 = key,
            None => list.push((collection, key)),
        }
    }

    pub(crate) fn unregister_reflection(&self, parent: NodeId, collection: CollectionId) {
        let mut reflected = self.inner.reflected.borrow_mut();
        if let Some(list) = reflected.get_mut(&parent) {
            list.retain(|(c, _)| *c != collection);
            if list.is_empty() {
                reflected.remove(&parent);
            }
        }
    }

    /// Collections currently reflected into `parent`.
    pub fn reflected_into(&self, parent: NodeId) -> Vec<CollectionId> {
        self.inner
            .reflected
            .borrow()
            .get(&parent)
            .map(|list| list.iter().map(|(c, _)| *c).collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // COMMIT PHASE
    // =========================================================================

    pub(crate) fn enqueue_commit(&self, view: WeakChangeable) {
        let mut pending = self.inner.pending_commits.borrow_mut();
        if !pending.iter().any(|p| p.ptr_eq(&view)) {
            pending.push(view);
        }
    }

    pub fn pending_commit_count(&self) -> usize {
        self.inner.pending_commits.borrow().len()
    }

    /// Commit every pending view whose node now sits under its candidate
    /// parent. Returns how many committed.
    ///
    /// Mapped views run this after each flush; a mount or layout phase may
    /// call it directly after inserting nodes by other means.
    pub fn run_commit_phase(&self) -> usize {
        let queued = std::mem::take(&mut *self.inner.pending_commits.borrow_mut());
        if queued.is_empty() {
            return 0;
        }

        let mut committed = 0;
        let mut still_pending = Vec::new();
        for weak in queued {
            let Some(view) = weak.upgrade() else {
                continue;
            };
            if view.commit() {
                committed += 1;
            } else if view.is_pending() {
                still_pending.push(weak);
            }
        }

        let mut pending = self.inner.pending_commits.borrow_mut();
        for weak in still_pending {
            if !pending.iter().any(|p| p.ptr_eq(&weak)) {
                pending.push(weak);
            }
        }
        committed
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("tree", &*self.inner.tree.borrow())
            .field("identity", &*self.inner.identity.borrow())
            .field("mapped_views", &self.inner.mapped_views.borrow().len())
            .field("changeables", &self.inner.changeables.borrow().len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
