//! Global Registry (component I).
//!
//! Process-wide `rootId -> RootDialog` map, used by the bus's
//! `post_by_id` callers and by the host surface to route user input to
//! the right dialog. Grounded on `sa-gateway::runtime::runs::RunStore`'s
//! `RwLock<HashMap<Uuid, Run>>` top-level table shape.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dialog::RootDialog;

#[derive(Default)]
pub struct DialogRegistry {
    roots: RwLock<HashMap<String, Arc<RootDialog>>>,
}

impl DialogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root dialog, explicit on creation or successful
    /// revival (§4.I).
    pub fn register(&self, root: Arc<RootDialog>) {
        self.roots.write().insert(root.base.id.root_id.clone(), root);
    }

    /// Deregister on terminal/dead transition.
    pub fn deregister(&self, root_id: &str) -> Option<Arc<RootDialog>> {
        self.roots.write().remove(root_id)
    }

    pub fn get(&self, root_id: &str) -> Option<Arc<RootDialog>> {
        self.roots.read().get(root_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<RootDialog>> {
        self.roots.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.roots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;

    #[test]
    fn register_then_lookup() {
        let registry = DialogRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", Journal::new(dir.path()), 3);
        let root_id = root.base.id.root_id.clone();
        registry.register(root);

        assert!(registry.get(&root_id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_removes() {
        let registry = DialogRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", Journal::new(dir.path()), 3);
        let root_id = root.base.id.root_id.clone();
        registry.register(root);

        assert!(registry.deregister(&root_id).is_some());
        assert!(registry.get(&root_id).is_none());
    }

    #[test]
    fn unknown_root_id_returns_none() {
        let registry = DialogRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }
}
