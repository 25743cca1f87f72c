// ============================================================================
// spark-reflect - Reflect Children
// Entry points binding a parent's children to a collection
// ============================================================================

use std::collections::HashSet;

use crate::collections::ObservableCollection;
use crate::core::context::{RenderContext, ViewKey};
use crate::core::options::ViewOptions;
use crate::core::types::{IntoSource, Mapper, Source};
use crate::resolve::resolve;
use crate::tree::NodeId;

use super::mapped::MappedView;

/// Keep `parent`'s children in sync with `collection`, using the context's
/// default [`ViewOptions`].
///
/// Calling this again for the same (parent, collection) pair changes nothing.
/// With a different mapper, the previous view of the pair is disposed and the
/// new one takes over the parent. Binding the collection to a different parent
/// moves its rendered nodes there. Returns `None` when `parent` cannot hold children.
///
/// # Example
///
/// ```
/// use spark_reflect::{reflect_children, Mapper, ObservableVec, RenderContext};
///
/// let ctx = RenderContext::new();
/// let list = ctx.create_element("ul");
/// let items = ObservableVec::from_vec(vec!["a", "b", "c"]);
///
/// reflect_children(&ctx, list, &items, Some(&Mapper::text_nodes()));
/// assert_eq!(ctx.child_texts(list), vec!["a", "b", "c"]);
///
/// items.push("d");
/// assert_eq!(ctx.child_texts(list), vec!["a", "b", "c", "d"]);
/// ```
pub fn reflect_children<C: ObservableCollection>(
    ctx: &RenderContext,
    parent: NodeId,
    collection: &C,
    mapper: Option<&Mapper>,
) -> Option<MappedView> {
    reflect_children_with(ctx, parent, collection, mapper, ctx.options())
}

/// [`reflect_children`] with per-view options.
pub fn reflect_children_with<C: ObservableCollection>(
    ctx: &RenderContext,
    parent: NodeId,
    collection: &C,
    mapper: Option<&Mapper>,
    options: ViewOptions,
) -> Option<MappedView> {
    if !ctx.with_tree(|t| t.is_valid_container(parent) && !t.is_fragment(parent)) {
        tracing::warn!(?parent, "cannot reflect into a non-container");
        return None;
    }
    if collection.is_disposed() {
        tracing::debug!(collection = ?collection.collection_id(), "collection disposed, nothing to reflect");
        return None;
    }

    let id = collection.collection_id();
    let key = ViewKey {
        source: id.as_u64() as usize,
        mapper: mapper.map_or(0, Mapper::key),
    };

    // The view currently reflecting this pair, if still live in `parent`.
    let registered = ctx
        .reflection(parent, id)
        .and_then(|k| ctx.mapped_view(k).map(|view| (k, view)))
        .filter(|(_, view)| !view.is_disposed() && view.parent() == Some(parent));

    let mut replaced = Vec::new();
    if let Some((registered_key, view)) = registered {
        if registered_key == key {
            return Some(view);
        }
        tracing::debug!(?parent, collection = ?id, "mapper changed, replacing view");
        replaced = view.nodes();
        view.dispose();
    }

    let existing = ctx.mapped_view(key).filter(|view| !view.is_disposed());
    initial_sweep(ctx, parent, collection, existing.as_ref());

    let previous = existing.as_ref().and_then(MappedView::parent);
    let view = MappedView::bind(ctx, collection, mapper, Some(parent), options);
    view.nodes();

    // Nodes of the replaced view that the new one did not take over.
    for node in replaced {
        ctx.release_detached(node);
    }

    if let Some(previous) = previous.filter(|p| *p != parent) {
        ctx.unregister_reflection(previous, id);
    }
    ctx.register_reflection(parent, id, key);
    tracing::debug!(?parent, collection = ?id, "children reflected");
    Some(view)
}

/// Remove children of `parent` that no current item accounts for.
///
/// A child survives if it is an item itself, the cached node of an item or a
/// node the collection's view already rendered.
fn initial_sweep<C: ObservableCollection>(
    ctx: &RenderContext,
    parent: NodeId,
    collection: &C,
    existing: Option<&MappedView>,
) {
    let mut keep: HashSet<NodeId> = HashSet::new();
    for item in collection.snapshot() {
        let source = item.to_source();
        match &source {
            Source::Node(node) => {
                keep.insert(*node);
            }
            _ => {
                if let Some(node) = ctx.cached_node(&source) {
                    keep.insert(node);
                }
            }
        }
    }
    if let Some(view) = existing {
        keep.extend(view.nodes());
    }

    let removed = ctx.with_tree_mut(|tree| {
        let stale: Vec<NodeId> = tree
            .children(parent)
            .iter()
            .copied()
            .filter(|c| !keep.contains(c))
            .collect();
        for child in &stale {
            if let Err(err) = tree.remove_child(parent, *child) {
                tracing::warn!(?child, %err, "initial sweep could not remove child");
            }
        }
        stale.len()
    });
    if removed > 0 {
        tracing::debug!(?parent, removed, "initial sweep");
    }
}

/// Render `items` into `parent` once, replacing its current children.
///
/// Nothing is subscribed. Children that are not reused are detached, not
/// disposed. Returns the nodes now under `parent`, in order.
///
/// ```
/// use spark_reflect::{reform_children, RenderContext};
///
/// let ctx = RenderContext::new();
/// let row = ctx.create_element("tr");
/// reform_children(&ctx, row, &["x", "y"], None);
/// reform_children(&ctx, row, &["x", "y"], None);
/// assert_eq!(ctx.child_texts(row), vec!["x", "y"]);
/// ```
pub fn reform_children<T: IntoSource>(
    ctx: &RenderContext,
    parent: NodeId,
    items: &[T],
    mapper: Option<&Mapper>,
) -> Vec<NodeId> {
    if !ctx.with_tree(|t| t.is_valid_container(parent)) {
        tracing::warn!(?parent, "cannot reform a non-container");
        return Vec::new();
    }

    let nodes: Vec<NodeId> = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| resolve(ctx, &item.to_source(), mapper, index, Some(parent)))
        .collect();
    let fresh: HashSet<NodeId> = nodes.iter().copied().collect();

    ctx.with_tree_mut(|tree| {
        let stale: Vec<NodeId> = tree
            .children(parent)
            .iter()
            .copied()
            .filter(|c| !fresh.contains(c))
            .collect();
        for child in stale {
            if let Err(err) = tree.remove_child(parent, child) {
                tracing::warn!(?child, %err, "reform could not remove child");
            }
        }
        for node in &nodes {
            if let Err(err) = tree.append_child(parent, *node) {
                tracing::warn!(?node, %err, "reform could not place node");
            }
        }
    });
    ctx.run_commit_phase();
    tracing::debug!(?parent, items = items.len(), "children reformed");
    ctx.children(parent)
}
