// ============================================================================
// spark-reflect - Resolution
// Source values to nodes, and the identity cache that keeps them stable
// ============================================================================

mod identity;
mod resolver;

pub use identity::IdentityCache;
pub use resolver::resolve;
