// ============================================================================
// spark-reflect - Errors
// Structural mutation failures reported by the node tree
// ============================================================================

use thiserror::Error;

use crate::tree::NodeId;

/// A node tree mutation that could not be applied.
///
/// The reconciler never propagates these: the command buffer logs them and
/// moves on to the next queued command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node {0:?} does not exist")]
    Missing(NodeId),

    #[error("node {0:?} cannot hold children")]
    NotAContainer(NodeId),

    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("inserting {child:?} under {parent:?} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("node {0:?} is not a text node")]
    NotText(NodeId),
}
