// ============================================================================
// spark-reflect - Tree Arena
// Node storage, structural mutation, and per-node dispose scopes
// ============================================================================

use slotmap::{SecondaryMap, SlotMap};

use super::node::{Node, NodeId, NodeKind};
use crate::core::error::TreeError;
use crate::primitives::scope::DisposeScope;

/// Arena of nodes.
///
/// All mutations keep the single-parent invariant: inserting a node that
/// already has a parent moves it.
#[derive(Default)]
pub struct Tree {
    nodes: SlotMap<NodeId, Node>,
    scopes: SecondaryMap<NodeId, DisposeScope>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeId {
        self.nodes
            .insert(Node::new(NodeKind::Element { tag: tag.into() }))
    }

    pub fn create_text(&mut self, content: impl Into<String>) -> NodeId {
        self.nodes.insert(Node::new(NodeKind::Text {
            content: content.into(),
        }))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.nodes.insert(Node::new(NodeKind::Fragment))
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id).map(|n| &n.kind)
    }

    /// Text of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text { content } => Some(content),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    /// Children of `id`; empty for missing nodes and text nodes.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Current position of `child` among `parent`'s children.
    pub fn index_of(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.children(parent).iter().position(|&c| c == child)
    }

    /// A live node that can hold children.
    pub fn is_valid_container(&self, id: NodeId) -> bool {
        self.kind(id).is_some_and(NodeKind::is_container)
    }

    /// A live detached fragment.
    pub fn is_fragment(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Fragment))
    }

    /// Whether `node` sits anywhere below `ancestor`.
    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Concatenated text of a subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            Some(NodeKind::Text { content }) => out.push_str(content),
            Some(_) => {
                for &child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
            None => {}
        }
    }

    /// Text content of each child of `parent`, in order.
    pub fn child_texts(&self, parent: NodeId) -> Vec<String> {
        self.children(parent)
            .iter()
            .map(|&c| self.text_content(c))
            .collect()
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> Result<(), TreeError> {
        match self.nodes.get_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Text { content }) => {
                *content = text.into();
                Ok(())
            }
            Some(_) => Err(TreeError::NotText(id)),
            None => Err(TreeError::Missing(id)),
        }
    }

    /// Remove `child` from its current parent, if any.
    pub fn detach(&mut self, child: NodeId) -> Result<(), TreeError> {
        let parent = self
            .nodes
            .get(child)
            .ok_or(TreeError::Missing(child))?
            .parent;
        if let Some(parent) = parent {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.children.retain(|&c| c != child);
            }
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = None;
            }
        }
        Ok(())
    }

    fn check_insert(&self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        if !self.contains(child) {
            return Err(TreeError::Missing(child));
        }
        match self.kind(parent) {
            None => return Err(TreeError::Missing(parent)),
            Some(kind) if !kind.is_container() => return Err(TreeError::NotAContainer(parent)),
            Some(_) => {}
        }
        if parent == child || self.is_descendant(parent, child) {
            return Err(TreeError::Cycle { parent, child });
        }
        Ok(())
    }

    /// Insert `child` at `index` (clamped to the end), moving it if attached.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        index: usize,
    ) -> Result<(), TreeError> {
        self.check_insert(parent, child)?;
        self.detach(child)?;

        let Some(p) = self.nodes.get_mut(parent) else {
            return Err(TreeError::Missing(parent));
        };
        let at = index.min(p.children.len());
        p.children.insert(at, child);
        if let Some(c) = self.nodes.get_mut(child) {
            c.parent = Some(parent);
        }
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.insert_child(parent, child, usize::MAX)
    }

    /// Insert before `anchor`; appends when `anchor` is `None`.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), TreeError> {
        let Some(anchor) = anchor else {
            return self.append_child(parent, child);
        };
        if anchor == child {
            return Ok(());
        }
        if self.index_of(parent, anchor).is_none() {
            return Err(TreeError::NotAChild {
                parent,
                child: anchor,
            });
        }
        self.check_insert(parent, child)?;
        self.detach(child)?;
        let index = self.index_of(parent, anchor).ok_or(TreeError::NotAChild {
            parent,
            child: anchor,
        })?;
        self.insert_child(parent, child, index)
    }

    /// Put `new` where `old` currently is; `old` is detached.
    ///
    /// The position is looked up at call time. If `old` is no longer a child
    /// of `parent`, nothing changes.
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        old: NodeId,
        new: NodeId,
    ) -> Result<(), TreeError> {
        if old == new {
            return Ok(());
        }
        if self.index_of(parent, old).is_none() {
            return Err(TreeError::NotAChild { parent, child: old });
        }
        self.check_insert(parent, new)?;
        self.detach(new)?;

        let index = self
            .index_of(parent, old)
            .ok_or(TreeError::NotAChild { parent, child: old })?;
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children[index] = new;
        }
        if let Some(n) = self.nodes.get_mut(new) {
            n.parent = Some(parent);
        }
        if let Some(o) = self.nodes.get_mut(old) {
            o.parent = None;
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        if self.index_of(parent, child).is_none() {
            return Err(TreeError::NotAChild { parent, child });
        }
        self.detach(child)
    }

    // =========================================================================
    // DISPOSAL
    // =========================================================================

    /// Dispose scope for `id`, created on first use.
    pub fn scope(&mut self, id: NodeId) -> Option<DisposeScope> {
        if !self.contains(id) {
            return None;
        }
        if let Some(scope) = self.scopes.get(id) {
            return Some(scope.clone());
        }
        let scope = DisposeScope::new();
        self.scopes.insert(id, scope.clone());
        Some(scope)
    }

    /// Whether `id` has a dispose scope attached.
    pub fn has_scope(&self, id: NodeId) -> bool {
        self.scopes.contains_key(id)
    }

    /// Remove `id` and its descendants from the arena.
    ///
    /// Returns the removed ids (pre-order) and their dispose scopes. The caller
    /// runs the scopes once no borrow of the tree is held.
    pub fn take_subtree(
        &mut self,
        id: NodeId,
    ) -> Result<Vec<(NodeId, Option<DisposeScope>)>, TreeError> {
        self.detach(id)?;

        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }

        Ok(order
            .into_iter()
            .map(|node| {
                self.nodes.remove(node);
                (node, self.scopes.remove(node))
            })
            .collect())
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes.len())
            .field("scopes", &self.scopes.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
