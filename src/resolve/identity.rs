// ============================================================================
// spark-reflect - Identity Cache
// Reference-keyed source -> node table with explicit eviction
// ============================================================================
//
// Entries hold the source weakly and the node by generational id, so neither
// side is kept alive by the cache. Because nothing here is reclaimed behind
// our back, eviction is an explicit lifecycle step:
// - evict_node() when the tree disposes a node
// - purge() to drop entries whose source or node is gone
// ============================================================================

use std::collections::HashMap;

use crate::core::types::{Source, SourceKey, WeakSource};
use crate::tree::{NodeId, Tree};

struct CacheEntry {
    source: WeakSource,
    node: NodeId,
}

/// Source identity -> resolved node.
///
/// Only reference-identity sources (objects, thunks, node-likes, reactive
/// primitives) participate. Plain primitives cannot be told apart by
/// reference and are cached by the views that render them.
#[derive(Default)]
pub struct IdentityCache {
    entries: HashMap<SourceKey, CacheEntry>,
    by_node: HashMap<NodeId, Vec<SourceKey>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached node for `source`, if the source and the node are both alive.
    pub fn get(&self, source: &Source, tree: &Tree) -> Option<NodeId> {
        let key = source.identity_key()?;
        let entry = self.entries.get(&key)?;
        (entry.source.is_alive() && tree.contains(entry.node)).then_some(entry.node)
    }

    /// Record `source -> node`. Returns false for sources without identity.
    pub fn insert(&mut self, source: &Source, node: NodeId) -> bool {
        let (Some(key), Some(weak)) = (source.identity_key(), source.downgrade()) else {
            return false;
        };
        if let Some(previous) = self.entries.insert(key, CacheEntry { source: weak, node }) {
            self.unlink(previous.node, key);
        }
        self.by_node.entry(node).or_default().push(key);
        true
    }

    /// Forget whatever `source` maps to.
    pub fn remove(&mut self, source: &Source) -> Option<NodeId> {
        let key = source.identity_key()?;
        let entry = self.entries.remove(&key)?;
        self.unlink(entry.node, key);
        Some(entry.node)
    }

    /// Whether any entry resolves to `node`.
    pub fn has_node(&self, node: NodeId) -> bool {
        self.by_node.contains_key(&node)
    }

    /// Drop every entry resolving to `node`.
    pub fn evict_node(&mut self, node: NodeId) -> usize {
        let Some(keys) = self.by_node.remove(&node) else {
            return 0;
        };
        let mut evicted = 0;
        for key in keys {
            if self.entries.get(&key).is_some_and(|e| e.node == node) {
                self.entries.remove(&key);
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop entries whose source was released or whose node is gone.
    pub fn purge(&mut self, tree: &Tree) -> usize {
        let dead: Vec<(SourceKey, NodeId)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.source.is_alive() || !tree.contains(e.node))
            .map(|(k, e)| (*k, e.node))
            .collect();
        for (key, node) in &dead {
            self.entries.remove(key);
            self.unlink(*node, *key);
        }
        dead.len()
    }

    fn unlink(&mut self, node: NodeId, key: SourceKey) {
        if let Some(keys) = self.by_node.get_mut(&node) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_node.remove(&node);
            }
        }
    }
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::IntoSource;
    use std::rc::Rc;

    #[test]
    fn hit_requires_live_source_and_node() {
        let mut tree = Tree::new();
        let mut cache = IdentityCache::new();
        let item = Rc::new("item");
        let node = tree.create_text("item");

        assert!(cache.insert(&item.to_source(), node));
        assert_eq!(cache.get(&item.to_source(), &tree), Some(node));

        tree.take_subtree(node).unwrap();
        assert_eq!(cache.get(&item.to_source(), &tree), None);
        assert_eq!(cache.purge(&tree), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn primitives_are_not_cached() {
        let mut tree = Tree::new();
        let mut cache = IdentityCache::new();
        let node = tree.create_text("a");
        assert!(!cache.insert(&"a".to_source(), node));
        assert_eq!(cache.get(&"a".to_source(), &tree), None);
    }

    #[test]
    fn released_source_is_purged() {
        let mut tree = Tree::new();
        let mut cache = IdentityCache::new();
        let node = tree.create_text("x");
        {
            let item = Rc::new(1u32);
            cache.insert(&item.to_source(), node);
        }
        assert_eq!(cache.purge(&tree), 1);
        assert!(tree.contains(node), "purging never touches the tree");
    }

    #[test]
    fn evict_node_drops_all_its_sources() {
        let mut tree = Tree::new();
        let mut cache = IdentityCache::new();
        let shared = tree.create_text("shared");
        let other = tree.create_text("other");
        let (a, b, c) = (Rc::new(1), Rc::new(2), Rc::new(3));

        cache.insert(&a.to_source(), shared);
        cache.insert(&b.to_source(), shared);
        cache.insert(&c.to_source(), other);

        assert_eq!(cache.evict_node(shared), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&c.to_source(), &tree), Some(other));
    }

    #[test]
    fn reinsert_moves_the_entry() {
        let mut tree = Tree::new();
        let mut cache = IdentityCache::new();
        let first = tree.create_text("1");
        let second = tree.create_text("2");
        let item = Rc::new(());

        cache.insert(&item.to_source(), first);
        cache.insert(&item.to_source(), second);
        assert_eq!(cache.evict_node(first), 0);
        assert_eq!(cache.get(&item.to_source(), &tree), Some(second));
        assert_eq!(cache.remove(&item.to_source()), Some(second));
    }
}
