use spark_reflect::{
    reflect_children, reform_children, signal, Changeable, Flush, IntoSource, Mapper, NodeId,
    ObservableCollection, ObservableMap, ObservableSet, ObservableVec, PendingActions, Primitive,
    RenderContext, Source,
};
use std::cell::RefCell;
use std::rc::Rc;

struct Row {
    label: &'static str,
}

/// One `<li>` per row, holding the label as text.
fn row_mapper() -> Mapper {
    Mapper::new(|ctx, source, _| {
        let Some(row) = source.downcast::<Row>() else {
            return Source::Null;
        };
        let li = ctx.create_element("li");
        let text = ctx.create_text(row.label);
        ctx.append_child(li, text).unwrap();
        Source::Node(li)
    })
}

fn row(label: &'static str) -> Rc<Row> {
    Rc::new(Row { label })
}

fn labels(ctx: &RenderContext, parent: NodeId) -> Vec<String> {
    ctx.children(parent)
        .into_iter()
        .map(|c| ctx.text_content(c))
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn scenario_a_initial_render() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b", "c"]);

    reflect_children(&ctx, parent, &items, Some(&Mapper::text_nodes()));
    assert_eq!(ctx.child_texts(parent), vec!["a", "b", "c"]);
}

#[test]
fn scenario_b_push_appends_last() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b", "c"]);
    reflect_children(&ctx, parent, &items, Some(&Mapper::text_nodes()));
    let before = ctx.children(parent);

    items.push("d");
    let after = ctx.children(parent);
    assert_eq!(ctx.child_texts(parent), vec!["a", "b", "c", "d"]);
    assert_eq!(&after[..3], &before[..]);
}

#[test]
fn scenario_c_set_replaces_in_place() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b", "c"]);
    reflect_children(&ctx, parent, &items, Some(&Mapper::text_nodes()));
    let before = ctx.children(parent);

    items.set(1, "B");
    let after = ctx.children(parent);
    assert_eq!(ctx.child_texts(parent), vec!["a", "B", "c"]);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[2]);
    assert_ne!(after[1], before[1]);
}

#[test]
fn scenario_d_splice_removes_first() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b", "c"]);
    reflect_children(&ctx, parent, &items, Some(&Mapper::text_nodes()));
    let before = ctx.children(parent);

    items.splice(0, 1, []);
    assert_eq!(ctx.child_texts(parent), vec!["b", "c"]);
    assert_eq!(ctx.children(parent), before[1..].to_vec());
}

#[test]
fn scenario_e_rebinding_moves_nodes() {
    let ctx = RenderContext::new();
    let p1 = ctx.create_element("ul");
    let p2 = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec![row("x"), row("y")]);
    let mapper = row_mapper();

    reflect_children(&ctx, p1, &items, Some(&mapper));
    let rendered = ctx.children(p1);

    reflect_children(&ctx, p2, &items, Some(&mapper));
    assert!(ctx.children(p1).is_empty());
    assert_eq!(ctx.children(p2), rendered);

    items.push(row("z"));
    assert!(ctx.children(p1).is_empty());
    assert_eq!(labels(&ctx, p2), vec!["x", "y", "z"]);
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn reflecting_twice_subscribes_once() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b"]);

    reflect_children(&ctx, parent, &items, None);
    reflect_children(&ctx, parent, &items, None);
    assert_eq!(items.listener_count(), 1);
    assert_eq!(ctx.child_texts(parent), vec!["a", "b"]);

    items.push("c");
    assert_eq!(ctx.child_texts(parent), vec!["a", "b", "c"]);
}

#[test]
fn reflecting_with_a_new_mapper_replaces_the_view() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b"]);
    let shout = Mapper::new(|ctx, source, _| match source.as_primitive() {
        Some(p) => Source::Node(ctx.create_text(p.to_text().to_uppercase())),
        None => Source::Null,
    });

    let first = reflect_children(&ctx, parent, &items, Some(&Mapper::text_nodes())).unwrap();
    let old_nodes = ctx.children(parent);
    let second = reflect_children(&ctx, parent, &items, Some(&shout)).unwrap();

    assert!(first.is_disposed());
    assert!(!second.is_disposed());
    assert_eq!(items.listener_count(), 1);
    assert_eq!(ctx.child_texts(parent), vec!["A", "B"]);
    assert!(old_nodes.iter().all(|n| !ctx.contains(*n)));

    items.push("c");
    assert_eq!(ctx.child_texts(parent), vec!["A", "B", "C"]);
    assert_eq!(ctx.reflected_into(parent), vec![items.collection_id()]);

    let again = reflect_children(&ctx, parent, &items, Some(&shout)).unwrap();
    assert!(again.ptr_eq(&second));
}

#[test]
fn repeated_updates_keep_the_tree_size_flat() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b", "c"]);
    reflect_children(&ctx, parent, &items, None);
    let arena = ctx.with_tree(|t| t.len());

    for _ in 0..100 {
        items.reverse();
        items.push("d");
        items.pop();
    }
    assert_eq!(ctx.child_texts(parent), vec!["a", "b", "c"]);
    assert_eq!(ctx.with_tree(|t| t.len()), arena);
}

#[test]
fn reform_twice_leaves_exactly_one_copy() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("div");
    let list = ["one", "two", "three"];

    reform_children(&ctx, parent, &list, None);
    reform_children(&ctx, parent, &list, None);
    assert_eq!(ctx.child_texts(parent), vec!["one", "two", "three"]);
}

#[test]
fn objects_resolve_to_the_identical_node() {
    let ctx = RenderContext::new();
    let item = row("same");
    let mapper = Mapper::new(|ctx, source, _| {
        let node = ctx.create_element("li");
        ctx.bind_source(source, node);
        Source::Node(node)
    });

    let first = spark_reflect::resolve(&ctx, &item.to_source(), Some(&mapper), 0, None);
    let cached = spark_reflect::resolve(&ctx, &item.to_source(), None, 0, None);
    assert!(first.is_some());
    assert_eq!(first, cached);
}

#[test]
fn reorders_keep_object_nodes() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec![row("c"), row("a"), row("b")]);
    reflect_children(&ctx, parent, &items, Some(&row_mapper()));
    let mut before = ctx.children(parent);

    items.sort_by(|x, y| x.label.cmp(y.label));
    assert_eq!(labels(&ctx, parent), vec!["a", "b", "c"]);

    let mut after = ctx.children(parent);
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[test]
fn duplicate_objects_share_one_node_until_the_last_goes() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let shared = row("dup");
    let items = ObservableVec::from_vec(vec![shared.clone(), row("solo"), shared.clone()]);
    reflect_children(&ctx, parent, &items, Some(&row_mapper()));
    assert_eq!(labels(&ctx, parent), vec!["dup", "solo"]);

    items.remove(0);
    assert_eq!(labels(&ctx, parent), vec!["dup", "solo"]);
    items.remove(1);
    assert_eq!(labels(&ctx, parent), vec!["solo"]);
}

#[test]
fn set_members_render_once() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let tags = ObservableSet::new();
    tags.extend(["red", "green"]);
    reflect_children(&ctx, parent, &tags, None);

    assert!(!tags.insert("red"));
    tags.insert("blue");
    tags.remove(&"red");
    assert_eq!(ctx.child_texts(parent), vec!["green", "blue"]);
}

#[test]
fn map_values_follow_assignments() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("dl");
    let fields = ObservableMap::new();
    fields.insert("name", "Ada");
    fields.insert("role", "engineer");
    reflect_children(&ctx, parent, &fields, None);

    fields.assign([("role", "analyst"), ("team", "engines")]);
    assert_eq!(ctx.child_texts(parent), vec!["Ada", "analyst", "engines"]);

    fields.remove(&"name");
    assert_eq!(ctx.child_texts(parent), vec!["analyst", "engines"]);
}

#[test]
fn deferred_behavior_lands_in_the_same_state() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a", "b", "c"]);
    let held: Rc<RefCell<Vec<Flush>>> = Rc::new(RefCell::new(Vec::new()));
    let h = held.clone();
    items.set_behavior(move |_: PendingActions, flush: Flush| h.borrow_mut().push(flush));

    reflect_children(&ctx, parent, &items, None);
    items.remove(0);
    items.push("d");
    items.set(0, "B");
    assert_eq!(ctx.child_texts(parent), vec!["a", "b", "c"]);

    let flushes: Vec<Flush> = held.borrow_mut().drain(..).collect();
    for flush in flushes {
        flush.run();
    }
    assert_eq!(ctx.child_texts(parent), vec!["B", "c", "d"]);
}

#[test]
fn changeable_items_update_in_place() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let status = signal(Primitive::from("idle"));
    let live = Changeable::bind(&ctx, &status, None);
    let items = ObservableVec::from_vec(vec![
        "before".to_source(),
        live.to_source(),
        "after".to_source(),
    ]);

    reflect_children(&ctx, parent, &items, None);
    assert_eq!(ctx.child_texts(parent), vec!["before", "idle", "after"]);
    assert!(live.is_attached());
    assert_eq!(live.parent(), Some(parent));

    status.set(Primitive::from("busy"));
    assert_eq!(ctx.child_texts(parent), vec!["before", "busy", "after"]);

    items.remove(1);
    assert_eq!(ctx.child_texts(parent), vec!["before", "after"]);
}

#[test]
fn disposed_collection_stops_its_views() {
    let ctx = RenderContext::new();
    let parent = ctx.create_element("ul");
    let items = ObservableVec::from_vec(vec!["a"]);
    let view = reflect_children(&ctx, parent, &items, None).unwrap();

    items.dispose();
    assert!(view.is_disposed());
    assert_eq!(ctx.child_texts(parent), vec!["a"]);
    assert!(ctx.reflected_into(parent).is_empty());
}
