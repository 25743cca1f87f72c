// ============================================================================
// spark-reflect - Node Resolver
// Turns any source value into a concrete node, or none
// ============================================================================

use std::rc::Rc;

use crate::core::context::RenderContext;
use crate::core::types::{Mapper, NodeLike, Primitive, Source};
use crate::primitives::signal::Signal;
use crate::tree::NodeId;

/// Thunks producing thunks are followed at most this deep.
const MAX_THUNK_DEPTH: usize = 32;

/// Resolve `source` to a node.
///
/// With a mapper, the mapped value is resolved instead (without mapping it
/// again). `requestor` is the parent the caller is about to insert into; a
/// node-like whose node already lives under another parent is asked for a
/// node scoped to the requestor rather than having its node moved.
///
/// | source      | result                                             |
/// |-------------|----------------------------------------------------|
/// | `Null`      | none                                               |
/// | `Node`      | the node, if it still exists                       |
/// | `NodeLike`  | its element (or one for the requestor)             |
/// | `Primitive` | a new text node                                    |
/// | `Reactive`  | a cached text node that follows the signal         |
/// | `Thunk`     | the resolved result of calling it, cached          |
/// | `Object`    | the identity cache entry, if any                   |
pub fn resolve(
    ctx: &RenderContext,
    source: &Source,
    mapper: Option<&Mapper>,
    index: usize,
    requestor: Option<NodeId>,
) -> Option<NodeId> {
    match mapper {
        Some(mapper) => {
            let mapped = mapper.call(ctx, source, index);
            resolve_at(ctx, &mapped, index, requestor, 0)
        }
        None => resolve_at(ctx, source, index, requestor, 0),
    }
}

fn resolve_at(
    ctx: &RenderContext,
    source: &Source,
    index: usize,
    requestor: Option<NodeId>,
    depth: usize,
) -> Option<NodeId> {
    match source {
        Source::Null => None,
        Source::Node(id) => ctx.contains(*id).then_some(*id),
        Source::NodeLike(value) => resolve_node_like(ctx, value, requestor),
        Source::Primitive(p) => Some(ctx.create_text(p.to_text())),
        Source::Reactive(signal) => Some(reactive_text(ctx, source, signal)),
        Source::Thunk(thunk) => {
            if let Some(node) = ctx.cached_node(source) {
                return Some(node);
            }
            if depth >= MAX_THUNK_DEPTH {
                tracing::warn!(depth, "thunk chain too deep, rendering nothing");
                return None;
            }
            let produced = thunk.call();
            let node = resolve_at(ctx, &produced, index, requestor, depth + 1)?;
            ctx.cache_node(source, node);
            Some(node)
        }
        Source::Object(_) => ctx.cached_node(source),
    }
}

fn resolve_node_like(
    ctx: &RenderContext,
    value: &Rc<dyn NodeLike>,
    requestor: Option<NodeId>,
) -> Option<NodeId> {
    let node = value.element(ctx).filter(|n| ctx.contains(*n))?;
    let Some(requestor) = requestor else {
        return Some(node);
    };

    let owned_elsewhere = ctx.with_tree(|t| {
        t.parent(node).is_some_and(|current| {
            current != requestor && t.is_valid_container(current) && !t.is_fragment(current)
        })
    });
    if !owned_elsewhere {
        if !ctx.with_tree(|t| t.is_descendant(node, requestor)) {
            value.expect_parent(ctx, requestor);
        }
        return Some(node);
    }

    tracing::trace!(?node, ?requestor, "node owned elsewhere, negotiating");
    value
        .element_for_potential_parent(ctx, requestor)
        .filter(|n| ctx.contains(*n))
}

/// Text node for a reactive primitive, created once per signal.
fn reactive_text(ctx: &RenderContext, source: &Source, signal: &Signal<Primitive>) -> NodeId {
    if let Some(node) = ctx.cached_node(source) {
        return node;
    }

    let node = ctx.create_text(signal.with(Primitive::to_text));
    ctx.cache_node(source, node);

    let weak = ctx.downgrade();
    let subscription = signal.subscribe(move |value, _| {
        let Some(ctx) = weak.upgrade() else {
            return;
        };
        if let Err(err) = ctx.with_tree_mut(|t| t.set_text(node, value.to_text())) {
            tracing::debug!(%err, "reactive text target gone");
        }
    });
    ctx.on_dispose(node, move || subscription.unsubscribe());
    node
}
