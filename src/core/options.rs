// ============================================================================
// spark-reflect - View Options
// Per-view reconciliation policies
// ============================================================================

use super::constants::{REMOVE_ON_EMPTY_WITH_PRIMITIVES, UNIQUE_PRIMITIVES, has_flag};

/// Policies for a mapped collection view.
///
/// # Example
///
/// ```
/// use spark_reflect::ViewOptions;
///
/// let opts = ViewOptions::default().unique_primitives(true);
/// assert!(opts.is_unique_primitives());
/// assert!(!opts.is_remove_on_empty_with_primitives());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewOptions {
    flags: u32,
}

impl ViewOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equal primitive values share one node.
    pub fn unique_primitives(self, on: bool) -> Self {
        self.with_flag(UNIQUE_PRIMITIVES, on)
    }

    /// Sweep stale children when a collection of primitives empties.
    pub fn remove_on_empty_with_primitives(self, on: bool) -> Self {
        self.with_flag(REMOVE_ON_EMPTY_WITH_PRIMITIVES, on)
    }

    pub fn is_unique_primitives(&self) -> bool {
        has_flag(self.flags, UNIQUE_PRIMITIVES)
    }

    pub fn is_remove_on_empty_with_primitives(&self) -> bool {
        has_flag(self.flags, REMOVE_ON_EMPTY_WITH_PRIMITIVES)
    }

    /// Policy bits, as stored in a view's flag word.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    fn with_flag(mut self, flag: u32, on: bool) -> Self {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
        self
    }
}
