// ============================================================================
// spark-reflect - Reactive Collection-to-Tree Reconciliation
// ============================================================================
//
// Keeps the children of a live node tree in sync with observable collections
// and single reactive values, with minimal structural mutation.
//
//   collections  - ObservableVec / ObservableSet / ObservableMap + Change events
//   resolve      - source value -> node, identity cache
//   view         - mapped collection views, changeable views, command buffer
//   tree         - generational node arena
//   core         - render context, source types, options, errors
//   primitives   - signals, dispose scopes, subscriptions
// ============================================================================

pub mod collections;
pub mod core;
mod macros;
pub mod primitives;
pub mod resolve;
pub mod tree;
pub mod view;

// Re-export core items at crate root for ergonomic access
pub use core::constants;
pub use core::context::{RenderContext, WeakContext};
pub use core::error::TreeError;
pub use core::options::ViewOptions;
pub use core::types::{
    Change, IntoSource, Mapper, NodeLike, ObjectRef, Op, Primitive, Source, SourceKey, Thunk,
};

// Re-export primitives
pub use primitives::scope::DisposeScope;
pub use primitives::signal::{signal, Signal};
pub use primitives::subscription::Subscription;

// Re-export collections
pub use collections::{
    CollectionId, FlushPolicy, ObservableCollection, ObservableMap, ObservableSet, ObservableVec,
};

// Re-export resolution and views
pub use resolve::resolve;
pub use tree::{NodeId, NodeKind, Tree};
pub use view::{
    reflect_children, reflect_children_with, reform_children, Behavior, Changeable, Command,
    Flush, FlushReport, MappedView, PendingActions,
};

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn root_exports_cover_a_round_trip() {
        let ctx = RenderContext::new();
        let list = ctx.create_element("ul");
        let items = ObservableVec::from_vec(vec!["a", "b", "c"]);

        let view = reflect_children(&ctx, list, &items, Some(&Mapper::text_nodes())).unwrap();
        assert_eq!(ctx.child_texts(list), vec!["a", "b", "c"]);

        items.push("d");
        items.set(1, "B");
        items.remove(0);
        assert_eq!(ctx.child_texts(list), vec!["B", "c", "d"]);
        assert_eq!(view.nodes(), ctx.children(list));
    }

    #[test]
    fn mapper_macro_clones_its_dependencies() {
        let tag = Rc::new(String::from("li"));
        let rows = mapper!(tag; |ctx, _source, _index| Source::Node(ctx.create_element(tag.as_str())));
        assert_eq!(Rc::strong_count(&tag), 2);

        let ctx = RenderContext::new();
        let list = ctx.create_element("ul");
        let items = ObservableVec::from_vec(vec![1, 2]);
        reflect_children(&ctx, list, &items, Some(&rows));
        assert_eq!(ctx.children(list).len(), 2);
    }

    #[test]
    fn context_options_apply_to_plain_reflect() {
        let ctx = RenderContext::with_options(ViewOptions::new().unique_primitives(true));
        let list = ctx.create_element("ul");
        let items = ObservableVec::from_vec(vec!["x", "x", "y"]);

        reflect_children(&ctx, list, &items, None);
        assert_eq!(ctx.child_texts(list), vec!["x", "y"]);

        items.remove(0);
        assert_eq!(ctx.child_texts(list), vec!["x", "y"]);
        items.remove(0);
        assert_eq!(ctx.child_texts(list), vec!["y"]);
    }

    #[test]
    fn collections_debug_print_their_items() {
        let list = ObservableVec::from_vec(vec![1, 2]);
        let tags: ObservableSet<&str> = ["x"].into_iter().collect();
        let record: ObservableMap<&str, u8> = [("k", 7)].into_iter().collect();

        assert!(format!("{list:?}").contains("[1, 2]"));
        assert!(format!("{tags:?}").contains("\"x\""));
        assert!(format!("{record:?}").contains("\"k\": 7"));
    }

    #[test]
    fn flags_stay_distinct() {
        assert_eq!(constants::UNIQUE_PRIMITIVES & constants::DISPOSED, 0);
        let opts = ViewOptions::new()
            .unique_primitives(true)
            .remove_on_empty_with_primitives(true);
        assert_eq!(opts.flags() & constants::SET_LIKE, 0, "shape flags are not caller policies");
    }
}
