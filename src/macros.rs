// ============================================================================
// spark-reflect - Ergonomic Macros
// ============================================================================

/// Build a [`Mapper`](crate::Mapper) from a three-argument closure body.
///
/// Dependencies listed before `;` are cloned into the closure.
///
/// # Usage
///
/// ```rust
/// use spark_reflect::{mapper, reflect_children, ObservableVec, RenderContext, Source};
///
/// let prefix = String::from("#");
/// let numbered = mapper!(prefix; |ctx, source, index| {
///     let text = source.as_primitive().map(|p| p.to_text()).unwrap_or_default();
///     Source::Node(ctx.create_text(format!("{prefix}{index} {text}")))
/// });
///
/// let ctx = RenderContext::new();
/// let list = ctx.create_element("ol");
/// let items = ObservableVec::from_vec(vec!["a", "b"]);
/// reflect_children(&ctx, list, &items, Some(&numbered));
/// assert_eq!(ctx.child_texts(list), vec!["#0 a", "#1 b"]);
/// ```
#[macro_export]
macro_rules! mapper {
    // Case 1: With dependencies
    ($($deps:ident),+ ; |$ctx:pat_param, $source:pat_param, $index:pat_param| $body:expr) => {{
        $( let $deps = $deps.clone(); )+
        $crate::Mapper::new(move |
            $ctx: &$crate::RenderContext,
            $source: &$crate::Source,
            $index: usize
        | $body)
    }};
    // Case 2: No dependencies
    (|$ctx:pat_param, $source:pat_param, $index:pat_param| $body:expr) => {
        $crate::Mapper::new(move |
            $ctx: &$crate::RenderContext,
            $source: &$crate::Source,
            $index: usize
        | $body)
    };
}
