// ============================================================================
// spark-reflect - Constants
// Flag constants for view policies and view lifecycle state
// ============================================================================

// =============================================================================
// VIEW POLICY FLAGS
// =============================================================================

/// Equal primitive values share one rendered node (reference counted).
pub const UNIQUE_PRIMITIVES: u32 = 1 << 0;

/// When the collection empties after holding primitives, sweep every child of
/// the bound parent that is absent from the current snapshot.
pub const REMOVE_ON_EMPTY_WITH_PRIMITIVES: u32 = 1 << 1;

// =============================================================================
// COLLECTION SHAPE FLAGS
// =============================================================================

/// The backing collection is a set; primitives dedupe by value.
pub const SET_LIKE: u32 = 1 << 4;

// =============================================================================
// VIEW STATE FLAGS
// =============================================================================

/// Current items have been rendered into the mirror.
pub const MATERIALIZED: u32 = 1 << 8;

/// A primitive item has been mapped at least once.
pub const SAW_PRIMITIVES: u32 = 1 << 9;

/// View holds its node detached, waiting for a parent.
pub const PENDING: u32 = 1 << 10;

/// View is bound to a parent and subscribed.
pub const ATTACHED: u32 = 1 << 11;

/// View was disposed; every later call is a no-op.
pub const DISPOSED: u32 = 1 << 12;

// =============================================================================
// HELPERS
// =============================================================================

/// Check whether `flags` carries every bit of `flag`.
#[inline]
pub fn has_flag(flags: u32, flag: u32) -> bool {
    flags & flag == flag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_distinct() {
        let all = [
            UNIQUE_PRIMITIVES,
            REMOVE_ON_EMPTY_WITH_PRIMITIVES,
            SET_LIKE,
            MATERIALIZED,
            SAW_PRIMITIVES,
            PENDING,
            ATTACHED,
            DISPOSED,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_eq!(a & b, 0);
            }
        }
    }

    #[test]
    fn has_flag_needs_every_bit() {
        let flags = UNIQUE_PRIMITIVES | SET_LIKE;
        assert!(has_flag(flags, UNIQUE_PRIMITIVES));
        assert!(has_flag(flags, UNIQUE_PRIMITIVES | SET_LIKE));
        assert!(!has_flag(flags, UNIQUE_PRIMITIVES | DISPOSED));
    }
}
