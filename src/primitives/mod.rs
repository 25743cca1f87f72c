// ============================================================================
// spark-reflect - Primitives Module
// Signals, dispose scopes and subscriptions
// ============================================================================

pub mod scope;
pub mod signal;
pub mod subscription;

// Re-export for convenience
pub use scope::{DisposeFn, DisposeScope};
pub use signal::{signal, EqualsFn, Signal, WeakSignal};
pub use subscription::Subscription;
