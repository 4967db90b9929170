//! Dialog identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, URL-safe, globally unique identifier for one dialog node.
///
/// `selfId == rootId` iff the dialog is a root; a subdialog has a distinct
/// `selfId` but always shares its parent's `rootId` (invariant 1 of the
/// data model).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId {
    pub root_id: String,
    pub self_id: String,
}

impl DialogId {
    /// Construct a root dialog id (`selfId == rootId`).
    pub fn new_root() -> Self {
        let id = new_opaque_id();
        Self {
            root_id: id.clone(),
            self_id: id,
        }
    }

    /// Construct a subdialog id under the given root.
    pub fn new_child(root_id: &str) -> Self {
        Self {
            root_id: root_id.to_owned(),
            self_id: new_opaque_id(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.self_id == self.root_id
    }

    /// The string key used for indexing: `rootId#selfId`, or bare `rootId`
    /// for roots.
    pub fn key(&self) -> String {
        if self.is_root() {
            self.root_id.clone()
        } else {
            format!("{}#{}", self.root_id, self.self_id)
        }
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

fn new_opaque_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
