// ============================================================================
// spark-reflect - Nodes
// ============================================================================

use slotmap::new_key_type;

new_key_type! {
    /// Generational handle to a node in a [`Tree`](super::Tree).
    pub struct NodeId;
}

/// What a node is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A container with a tag name.
    Element { tag: String },
    /// A leaf holding text.
    Text { content: String },
    /// A detached container used to pre-render content off-tree.
    Fragment,
}

impl NodeKind {
    /// Elements and fragments may hold children.
    pub fn is_container(&self) -> bool {
        !matches!(self, NodeKind::Text { .. })
    }
}

/// A node and its structural links.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}
