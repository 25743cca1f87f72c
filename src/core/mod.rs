// ============================================================================
// spark-reflect - Core Module
// Source types, view options, flags, errors and the render context
// ============================================================================

pub mod constants;
pub mod context;
pub mod error;
pub mod options;
pub mod types;

// Re-export commonly used items
pub use context::{RenderContext, WeakContext};
pub use error::TreeError;
pub use options::ViewOptions;
pub use types::{
    Change, IntoSource, Mapper, NodeLike, ObjectRef, Op, Primitive, Source, SourceKey, Thunk,
    WeakSource,
};
