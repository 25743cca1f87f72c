use spark_reflect::{
    reflect_children, signal, Changeable, DisposeScope, IntoSource, MappedView, Mapper,
    ObservableCollection, ObservableVec, Primitive, RenderContext, ViewOptions,
};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn test_disposing_the_parent_unsubscribes_the_view() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b"]);

    let view = reflect_children(&ctx, parent, &items, None).unwrap();
    assert_eq!(items.listener_count(), 1);

    ctx.dispose_node(parent);
    assert!(view.is_disposed());
    assert_eq!(items.listener_count(), 0);
    assert_eq!(ctx.mapped_view_count(), 0);

    // Writes after teardown reach nobody
    items.push("c");
    assert_eq!(items.len(), 3);
}

#[test]
fn test_view_dispose_keeps_rendered_nodes() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec![1, 2, 3]);
    let view = reflect_children(&ctx, parent, &items, None).unwrap();

    view.dispose();
    view.dispose();
    assert_eq!(ctx.child_texts(parent), vec!["1", "2", "3"]);

    items.clear();
    assert_eq!(ctx.child_texts(parent), vec!["1", "2", "3"], "disposed view must not react");
}

#[test]
fn test_rebinding_after_dispose_creates_a_fresh_view() {
    let ctx = RenderContext::new();
    let items = ObservableVec::from_vec(vec!["x"]);

    let first = MappedView::bind(&ctx, &items, None, None, ViewOptions::default());
    first.dispose();
    let second = MappedView::bind(&ctx, &items, None, None, ViewOptions::default());
    assert!(!first.ptr_eq(&second));
    assert!(!second.is_disposed());
    assert_eq!(items.listener_count(), 1);
}

#[test]
fn test_dropping_the_context_makes_views_inert() {
    let items = ObservableVec::from_vec(vec!["a"]);
    {
        let ctx = RenderContext::new();
        let parent = ctx.create_element("ul");
        reflect_children(&ctx, parent, &items, None);
        // ctx drops here, taking the tree and the memo tables with it
    }

    assert_eq!(items.listener_count(), 0, "view should drop with its context");
    items.push("b");
    assert_eq!(items.to_vec(), vec!["a", "b"]);
}

#[test]
fn test_reactive_text_releases_its_signal_on_dispose() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("p");
    let count = signal(Primitive::from(0));
    let items = ObservableVec::from_vec(vec![count.to_source()]);

    reflect_children(&ctx, parent, &items, None);
    assert_eq!(count.listener_count(), 1);
    count.set(Primitive::from(7));
    assert_eq!(ctx.child_texts(parent), vec!["7"]);

    ctx.dispose_node(parent);
    assert_eq!(count.listener_count(), 0);
}

#[test]
fn test_changeable_stops_with_its_parent() {
    let ctx = RenderContext::new();
    let host = ctx.create_element("span");
    let value = signal(Primitive::from("on"));
    let view = Changeable::bind(&ctx, &value, None);

    view.commit_parent(host);
    assert_eq!(value.listener_count(), 1);

    ctx.dispose_node(host);
    assert!(view.is_disposed());
    assert_eq!(value.listener_count(), 0);
}

#[test]
fn test_collection_dispose_runs_its_hooks_once() {
    let items: ObservableVec<&str> = ObservableVec::new();
    let runs = Rc::new(Cell::new(0));
    let r = runs.clone();
    items.on_dispose(move || r.set(r.get() + 1));

    items.dispose();
    items.dispose();
    assert_eq!(runs.get(), 1);
    assert!(items.is_disposed());
}

#[test]
fn test_scope_drop_runs_teardown() {
    let ran = Rc::new(Cell::new(false));
    {
        let scope = DisposeScope::new();
        let r = ran.clone();
        scope.on_dispose(move || r.set(true));
        // last handle drops here
    }
    assert!(ran.get(), "dropping the last handle should stop the scope");
}

#[test]
fn test_identity_entries_follow_node_disposal() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let item = Rc::new("row");
    let mapper = Mapper::new(|ctx, source, _| {
        let node = ctx.create_element("li");
        ctx.bind_source(source, node);
        spark_reflect::Source::Node(node)
    });
    let items = ObservableVec::from_vec(vec![item.clone()]);
    reflect_children(&ctx, parent, &items, Some(&mapper));
    assert_eq!(ctx.identity_len(), 1);

    ctx.dispose_node(parent);
    assert_eq!(ctx.identity_len(), 0);
}

#[test]
fn test_purge_drops_entries_of_dead_sources() {
    let ctx = RenderContext::new();
    let node = ctx.create_element("li");
    {
        let item = Rc::new(5u8);
        ctx.bind_source(&item.to_source(), node);
    }
    assert_eq!(ctx.identity_len(), 1);
    assert_eq!(ctx.purge(), 1);
    assert_eq!(ctx.identity_len(), 0);
}
