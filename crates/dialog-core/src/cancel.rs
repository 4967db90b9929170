//! Dialog-keyed cancellation tokens (§4.G step 6).
//!
//! Grounded on `sa-gateway::runtime::cancel::{CancelToken, CancelMap}`,
//! narrowed to this crate's own keying: a session key there is a
//! `DialogId::key()` here, and there is no group/cascade concept — a
//! cancellation always targets one dialog node directly, since the driver
//! checks its own node's token at each chunk boundary rather than having a
//! parent cancel propagate through the tree on its behalf.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::id::DialogId;

/// A cancellation flag for one dialog's current driving step.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tracks one [`CancelToken`] per live dialog key (`DialogId::key()`).
#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the token a driving step for `id` will watch.
    pub fn register(&self, id: &DialogId) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(id.key(), token.clone());
        token
    }

    /// Request cancellation of `id`'s current driving step, if any is
    /// registered. Returns `false` if nothing is running for that key.
    pub fn cancel(&self, id: &DialogId) -> bool {
        if let Some(token) = self.tokens.lock().get(&id.key()) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// `true` while a token is registered for `id`, regardless of whether
    /// it has been signalled yet.
    pub fn is_running(&self, id: &DialogId) -> bool {
        self.tokens.lock().contains_key(&id.key())
    }

    /// `true` if `id` has a registered, signalled token. A dialog with no
    /// token at all (never driven, or already torn down) is never
    /// considered cancelled.
    pub fn is_cancelled(&self, id: &DialogId) -> bool {
        self.tokens
            .lock()
            .get(&id.key())
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    /// Drop the token once a driving step is done, whether it finished
    /// clean or was stopped.
    pub fn remove(&self, id: &DialogId) {
        self.tokens.lock().remove(&id.key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(self_id: &str) -> DialogId {
        DialogId {
            root_id: "root1".into(),
            self_id: self_id.into(),
        }
    }

    #[test]
    fn register_then_cancel_flips_the_token() {
        let registry = CancelRegistry::new();
        let token = registry.register(&id("a"));
        assert!(!token.is_cancelled());
        assert!(registry.cancel(&id("a")));
        assert!(token.is_cancelled());
        assert!(registry.is_cancelled(&id("a")));
    }

    #[test]
    fn cancel_unregistered_key_returns_false() {
        let registry = CancelRegistry::new();
        assert!(!registry.cancel(&id("ghost")));
        assert!(!registry.is_cancelled(&id("ghost")));
    }

    #[test]
    fn remove_clears_running_and_cancelled_state() {
        let registry = CancelRegistry::new();
        registry.register(&id("a"));
        assert!(registry.is_running(&id("a")));
        registry.remove(&id("a"));
        assert!(!registry.is_running(&id("a")));
        assert!(!registry.is_cancelled(&id("a")));
    }

    #[test]
    fn register_replaces_previous_token() {
        let registry = CancelRegistry::new();
        let old = registry.register(&id("a"));
        let new = registry.register(&id("a"));
        registry.cancel(&id("a"));
        assert!(!old.is_cancelled());
        assert!(new.is_cancelled());
    }
}
