// ============================================================================
// spark-reflect - Command Buffer
// Ordered structural mutations and the behavior hook that flushes them
// ============================================================================
//
// Every mutation a view wants lands here first, in event order. A flush drains
// the queue front to back and applies each command on its own: a command whose
// target moved away is logged and skipped, the rest still apply.
// ============================================================================

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::core::context::{RenderContext, WeakContext};
use crate::core::error::TreeError;
use crate::tree::{NodeId, Tree};

// =============================================================================
// COMMAND
// =============================================================================

/// One queued structural mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Insert `node` before `anchor` when the anchor is still a child of
    /// `parent`, otherwise at `index` (clamped).
    Append {
        parent: NodeId,
        node: NodeId,
        index: usize,
        anchor: Option<NodeId>,
    },
    /// Put `new` wherever `old` is when the command runs.
    Replace {
        parent: NodeId,
        old: NodeId,
        new: NodeId,
    },
    Remove { parent: NodeId, node: NodeId },
}

impl Command {
    pub fn parent(&self) -> NodeId {
        match *self {
            Command::Append { parent, .. }
            | Command::Replace { parent, .. }
            | Command::Remove { parent, .. } => parent,
        }
    }

    /// Apply against the tree. Positions are looked up now, not when queued.
    pub fn apply(&self, tree: &mut Tree) -> Result<(), TreeError> {
        match *self {
            Command::Append {
                parent,
                node,
                index,
                anchor,
            } => match anchor.filter(|a| *a != node && tree.index_of(parent, *a).is_some()) {
                Some(anchor) => tree.insert_before(parent, node, Some(anchor)),
                None => tree.insert_child(parent, node, index),
            },
            Command::Replace { parent, old, new } => tree.replace_child(parent, old, new),
            Command::Remove { parent, node } => tree.remove_child(parent, node),
        }
    }
}

// =============================================================================
// PENDING ACTIONS
// =============================================================================

/// Queued commands split by kind, handed to a [`Behavior`].
///
/// The buckets are a read-only view; the flush always applies the commands in
/// their original enqueue order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingActions {
    pub appends: Vec<Command>,
    pub replaces: Vec<Command>,
    pub removes: Vec<Command>,
}

impl PendingActions {
    pub fn len(&self) -> usize {
        self.appends.len() + self.replaces.len() + self.removes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes about to leave the tree.
    pub fn leaving(&self) -> Vec<NodeId> {
        self.removes
            .iter()
            .chain(self.replaces.iter())
            .filter_map(|c| match *c {
                Command::Remove { node, .. } => Some(node),
                Command::Replace { old, .. } => Some(old),
                Command::Append { .. } => None,
            })
            .collect()
    }
}

// =============================================================================
// COMMAND BUFFER
// =============================================================================

/// Result of one flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: usize,
    pub failed: usize,
}

/// Shared FIFO of commands.
#[derive(Clone, Default)]
pub struct CommandBuffer {
    queue: Rc<RefCell<VecDeque<Command>>>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) {
        tracing::trace!(?command, "queued");
        self.queue.borrow_mut().push_back(command);
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub fn pending(&self) -> PendingActions {
        let mut actions = PendingActions::default();
        for command in self.queue.borrow().iter() {
            match command {
                Command::Append { .. } => actions.appends.push(*command),
                Command::Replace { .. } => actions.replaces.push(*command),
                Command::Remove { .. } => actions.removes.push(*command),
            }
        }
        actions
    }

    /// Drain and apply in enqueue order.
    ///
    /// Commands queued while flushing are applied by the same call.
    pub fn flush(&self, ctx: &RenderContext) -> FlushReport {
        let mut report = FlushReport::default();
        loop {
            let Some(command) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            match ctx.with_tree_mut(|tree| command.apply(tree)) {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(?command, %err, "command failed, tree left unchanged");
                }
            }
        }
        report
    }

    pub fn ptr_eq(&self, other: &CommandBuffer) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.queue.borrow().iter()).finish()
    }
}

// =============================================================================
// FLUSH + BEHAVIOR
// =============================================================================

type AfterFlush = Rc<dyn Fn(&RenderContext)>;

/// One-shot permission to apply the queued commands.
///
/// Dropping it without calling [`Flush::run`] leaves the commands queued; the
/// next flush of the same buffer applies them first.
#[must_use = "dropping a Flush leaves the commands queued"]
pub struct Flush {
    ctx: WeakContext,
    buffer: CommandBuffer,
    after: Option<AfterFlush>,
}

impl Flush {
    pub(crate) fn new(ctx: &RenderContext, buffer: CommandBuffer, after: Option<AfterFlush>) -> Self {
        Self {
            ctx: ctx.downgrade(),
            buffer,
            after,
        }
    }

    /// Apply every queued command. A no-op once the context is gone.
    pub fn run(self) -> FlushReport {
        let Some(ctx) = self.ctx.upgrade() else {
            return FlushReport::default();
        };
        let report = self.buffer.flush(&ctx);
        if let Some(after) = &self.after {
            after(&ctx);
        }
        report
    }

    pub fn queued(&self) -> usize {
        self.buffer.len()
    }
}

impl fmt::Debug for Flush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flush")
            .field("queued", &self.buffer.len())
            .finish()
    }
}

/// Custom flush hook installed on a collection.
///
/// Receives the pending buckets and the flush; it may run the flush now, later
/// (after a transition), or never. The final tree is the same as flushing
/// immediately.
pub trait Behavior {
    fn apply(&self, pending: PendingActions, flush: Flush);
}

impl<F> Behavior for F
where
    F: Fn(PendingActions, Flush),
{
    fn apply(&self, pending: PendingActions, flush: Flush) {
        self(pending, flush)
    }
}

/// Flush through `behavior` when there is one, immediately otherwise.
pub(crate) fn dispatch(
    ctx: &RenderContext,
    buffer: &CommandBuffer,
    behavior: Option<Rc<dyn Behavior>>,
    after: Option<AfterFlush>,
) {
    let flush = Flush::new(ctx, buffer.clone(), after);
    match behavior {
        Some(behavior) if !buffer.is_empty() => behavior.apply(buffer.pending(), flush),
        _ => {
            flush.run();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tracing_test::traced_test;

    fn parent_with(ctx: &RenderContext, texts: &[&str]) -> (NodeId, Vec<NodeId>) {
        let parent = ctx.create_element("ul");
        let nodes = texts
            .iter()
            .map(|t| {
                let n = ctx.create_text(*t);
                ctx.append_child(parent, n).unwrap();
                n
            })
            .collect();
        (parent, nodes)
    }

    #[test]
    fn flush_applies_in_enqueue_order() {
        let ctx = RenderContext::new();
        let (parent, nodes) = parent_with(&ctx, &["a", "b"]);
        let c = ctx.create_text("c");
        let buffer = CommandBuffer::new();

        buffer.push(Command::Remove {
            parent,
            node: nodes[0],
        });
        buffer.push(Command::Append {
            parent,
            node: c,
            index: 0,
            anchor: Some(nodes[1]),
        });
        buffer.push(Command::Replace {
            parent,
            old: nodes[1],
            new: nodes[0],
        });

        let report = buffer.flush(&ctx);
        assert_eq!(report, FlushReport { applied: 3, failed: 0 });
        assert_eq!(ctx.child_texts(parent), vec!["c", "a"]);
        assert!(buffer.is_empty());
    }

    #[test]
    #[traced_test]
    fn failed_command_does_not_block_the_rest() {
        let ctx = RenderContext::new();
        let (parent, nodes) = parent_with(&ctx, &["a"]);
        let stray = ctx.create_text("stray");
        let d = ctx.create_text("d");
        let buffer = CommandBuffer::new();

        buffer.push(Command::Replace {
            parent,
            old: stray,
            new: d,
        });
        buffer.push(Command::Append {
            parent,
            node: d,
            index: 9,
            anchor: None,
        });

        let report = buffer.flush(&ctx);
        assert_eq!(report, FlushReport { applied: 1, failed: 1 });
        assert_eq!(ctx.children(parent), vec![nodes[0], d]);
        assert!(logs_contain("command failed, tree left unchanged"));
    }

    #[test]
    fn stale_anchor_falls_back_to_index() {
        let ctx = RenderContext::new();
        let (parent, _) = parent_with(&ctx, &["a", "b"]);
        let elsewhere = ctx.create_text("x");
        let n = ctx.create_text("n");

        let buffer = CommandBuffer::new();
        buffer.push(Command::Append {
            parent,
            node: n,
            index: 1,
            anchor: Some(elsewhere),
        });
        assert_eq!(buffer.flush(&ctx).applied, 1);
        assert_eq!(ctx.child_texts(parent), vec!["a", "n", "b"]);
    }

    #[test]
    fn pending_splits_by_kind() {
        let ctx = RenderContext::new();
        let (parent, nodes) = parent_with(&ctx, &["a", "b"]);
        let buffer = CommandBuffer::new();
        buffer.push(Command::Remove {
            parent,
            node: nodes[0],
        });
        buffer.push(Command::Replace {
            parent,
            old: nodes[1],
            new: nodes[0],
        });

        let pending = buffer.pending();
        assert_eq!(pending.removes.len(), 1);
        assert_eq!(pending.replaces.len(), 1);
        assert!(pending.appends.is_empty());
        assert_eq!(pending.leaving(), vec![nodes[0], nodes[1]]);
    }

    #[test]
    fn dropped_flush_keeps_commands_queued() {
        let ctx = RenderContext::new();
        let (parent, nodes) = parent_with(&ctx, &["a", "b"]);
        let buffer = CommandBuffer::new();
        let held: Rc<RefCell<Option<Flush>>> = Rc::new(RefCell::new(None));

        let h = held.clone();
        let deferring: Rc<dyn Behavior> = Rc::new(move |_: PendingActions, flush: Flush| {
            *h.borrow_mut() = Some(flush);
        });

        buffer.push(Command::Remove {
            parent,
            node: nodes[0],
        });
        dispatch(&ctx, &buffer, Some(deferring.clone()), None);
        assert_eq!(ctx.child_texts(parent), vec!["a", "b"]);

        drop(held.borrow_mut().take());
        buffer.push(Command::Remove {
            parent,
            node: nodes[1],
        });
        dispatch(&ctx, &buffer, Some(deferring), None);
        assert_eq!(buffer.len(), 2);

        let flush = held.borrow_mut().take().unwrap();
        assert_eq!(flush.run().applied, 2);
        assert!(ctx.children(parent).is_empty());
    }
}
