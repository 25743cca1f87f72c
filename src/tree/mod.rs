// ============================================================================
// spark-reflect - Node Tree
// The live node tree views render into
// ============================================================================
//
// Nodes live in a generational arena, so a stale `NodeId` never aliases a
// node created later. Containers (elements and fragments) hold ordered child
// lists; a node has at most one parent at any time.
// ============================================================================

mod arena;
mod node;

pub use arena::Tree;
pub use node::{Node, NodeId, NodeKind};
