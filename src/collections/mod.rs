// ============================================================================
// spark-reflect - Observable Collections
// Vecs, Sets and Maps that report ordered change events
// ============================================================================
//
// Each collection is a cheap-to-clone handle around shared storage and a
// change stream. Writes apply immediately, then deliver `Change` events in
// application order (or once per batch inside `batch`). Views subscribe to
// the stream and never read the storage mid-write.
// ============================================================================

mod change;
mod map;
mod set;
mod vec;

pub use change::{
    ChangeListener, CollectionId, ErasedCollection, FlushPolicy, ObservableCollection,
};
pub use map::ObservableMap;
pub use set::ObservableSet;
pub use vec::ObservableVec;
