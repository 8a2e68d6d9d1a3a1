use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Visibility flags of a thread, owned by the thread CRUD layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadVisibility {
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_private: bool,
}

impl ThreadVisibility {
    /// Members of a concealed thread are kept out of the main timeline
    pub fn is_concealed(&self) -> bool {
        self.is_hidden || self.is_private
    }
}

/// Read-only thread membership lookup used for main-timeline filtering.
pub trait ThreadDirectory: Send + Sync {
    fn visibility(&self, thread_id: &str) -> Option<ThreadVisibility>;

    /// Unknown threads are treated as visible
    fn is_concealed(&self, thread_id: &str) -> bool {
        self.visibility(thread_id)
            .map(|v| v.is_concealed())
            .unwrap_or(false)
    }
}

impl ThreadDirectory for HashMap<String, ThreadVisibility> {
    fn visibility(&self, thread_id: &str) -> Option<ThreadVisibility> {
        self.get(thread_id).copied()
    }
}

/// Directory shared with the thread CRUD layer, which keeps it current
/// while the sync core only reads it.
#[derive(Debug, Clone, Default)]
pub struct SharedThreadDirectory {
    inner: Arc<RwLock<HashMap<String, ThreadVisibility>>>,
}

impl SharedThreadDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, thread_id: impl Into<String>, visibility: ThreadVisibility) {
        self.inner.write().insert(thread_id.into(), visibility);
    }

    pub fn remove(&self, thread_id: &str) {
        self.inner.write().remove(thread_id);
    }
}

impl ThreadDirectory for SharedThreadDirectory {
    fn visibility(&self, thread_id: &str) -> Option<ThreadVisibility> {
        self.inner.read().get(thread_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_thread_is_visible() {
        let directory = SharedThreadDirectory::new();
        assert!(!directory.is_concealed("nope"));
    }

    #[test]
    fn test_shared_directory_updates_are_seen_by_clones() {
        let directory = SharedThreadDirectory::new();
        let reader = directory.clone();
        directory.set(
            "t-1",
            ThreadVisibility {
                is_hidden: false,
                is_private: true,
            },
        );
        assert!(reader.is_concealed("t-1"));
        directory.remove("t-1");
        assert!(!reader.is_concealed("t-1"));
    }
}
