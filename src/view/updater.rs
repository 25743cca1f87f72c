// ============================================================================
// spark-reflect - Child List Updater
// One resolved change event -> at most one queued command
// ============================================================================
//
// The translation is pure: it reads the tree to find where things are now and
// returns the command to queue. Positions recorded in the event are never
// trusted for old nodes; replace and remove look their target up when the
// command is applied.
// ============================================================================

use crate::core::types::Op;
use crate::tree::{NodeId, Tree};

use super::commands::Command;

/// A change event whose payloads have already been resolved to nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildUpdate {
    pub op: Op,
    pub index: usize,
    pub new_node: Option<NodeId>,
    pub old_node: Option<NodeId>,
    /// Node the new one should precede, when known.
    pub anchor: Option<NodeId>,
}

impl ChildUpdate {
    pub fn add(index: usize, node: NodeId, anchor: Option<NodeId>) -> Self {
        Self {
            op: Op::Add,
            index,
            new_node: Some(node),
            old_node: None,
            anchor,
        }
    }

    pub fn remove(index: usize, node: NodeId) -> Self {
        Self {
            op: Op::Remove,
            index,
            new_node: None,
            old_node: Some(node),
            anchor: None,
        }
    }
}

/// Parent the update applies to: the old node's own container, else the
/// hint, else the last parent the view knew about.
pub fn effective_parent(
    tree: &Tree,
    update: &ChildUpdate,
    hint: Option<NodeId>,
    last_known: Option<NodeId>,
) -> Option<NodeId> {
    update
        .old_node
        .and_then(|old| tree.parent(old))
        .into_iter()
        .chain(hint)
        .chain(last_known)
        .find(|p| tree.is_valid_container(*p))
}

/// Decide the command for one update.
///
/// | new     | old     | command                    |
/// |---------|---------|----------------------------|
/// | none    | some    | remove(parent, old)        |
/// | some    | none    | append(parent, new, index) |
/// | some    | some    | replace(parent, old, new)  |
///
/// `Get` events, identical nodes and updates with no resolvable parent plan
/// nothing.
pub fn plan(
    tree: &Tree,
    update: &ChildUpdate,
    hint: Option<NodeId>,
    last_known: Option<NodeId>,
) -> Option<Command> {
    if update.op == Op::Get {
        return None;
    }
    let parent = effective_parent(tree, update, hint, last_known)?;

    let command = match (update.new_node, update.old_node) {
        (Some(new), Some(old)) if new == old => return None,
        (None, Some(old)) => Command::Remove { parent, node: old },
        (Some(new), None) => Command::Append {
            parent,
            node: new,
            index: update.index,
            anchor: update.anchor,
        },
        (Some(new), Some(old)) => Command::Replace { parent, old, new },
        (None, None) => return None,
    };
    tracing::trace!(op = ?update.op, index = update.index, ?command, "planned");
    Some(command)
}
