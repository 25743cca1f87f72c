// ============================================================================
// spark-reflect - Views
// Live renderings of collections and single reactive values
// ============================================================================
//
// Data flow for one collection write:
//
//   collection event -> MappedView (mirror + identity maps)
//                    -> updater::plan -> Command
//                    -> CommandBuffer -> [Behavior] -> Flush -> tree
//                    -> commit phase for pending changeables
// ============================================================================

pub mod changeable;
pub mod commands;
pub mod mapped;
mod reflect;
pub mod updater;

pub use changeable::Changeable;
pub use commands::{Behavior, Command, CommandBuffer, Flush, FlushReport, PendingActions};
pub use mapped::MappedView;
pub use reflect::{reflect_children, reflect_children_with, reform_children};
pub use updater::ChildUpdate;
