use std::collections::HashMap;

use crate::models::{ContextKey, HistoryFilter, Message, MessageUpdate};

use super::window::{UpsertOutcome, Window, WindowLimits};

/// Which way a history fetch extends a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadDirection {
    /// Most recent page, replacing the window
    Initial,
    Older,
    Newer,
}

/// One context's window plus its pagination bookkeeping.
#[derive(Debug, Clone)]
pub struct ContextState {
    pub key: ContextKey,
    pub window: Window,
    pub filter: HistoryFilter,
    pub has_more_older: bool,
    pub has_more_newer: bool,
    loading_initial: bool,
    loading_older: bool,
    loading_newer: bool,
}

impl ContextState {
    pub fn new(key: ContextKey, filter: HistoryFilter) -> Self {
        Self {
            key,
            window: Window::new(),
            filter,
            has_more_older: true,
            has_more_newer: false,
            loading_initial: false,
            loading_older: false,
            loading_newer: false,
        }
    }

    /// Cold contexts need an initial fetch before they can be shown
    pub fn is_cold(&self) -> bool {
        self.window.is_empty()
    }

    fn flag_mut(&mut self, direction: LoadDirection) -> &mut bool {
        match direction {
            LoadDirection::Initial => &mut self.loading_initial,
            LoadDirection::Older => &mut self.loading_older,
            LoadDirection::Newer => &mut self.loading_newer,
        }
    }

    pub fn is_loading(&self, direction: LoadDirection) -> bool {
        match direction {
            LoadDirection::Initial => self.loading_initial,
            LoadDirection::Older => self.loading_older,
            LoadDirection::Newer => self.loading_newer,
        }
    }

    /// Mark a load in flight. False if one is already pending.
    pub fn begin_load(&mut self, direction: LoadDirection) -> bool {
        let flag = self.flag_mut(direction);
        if *flag {
            return false;
        }
        *flag = true;
        true
    }

    pub fn finish_load(&mut self, direction: LoadDirection) {
        *self.flag_mut(direction) = false;
    }
}

/// All open contexts of a session. Main always exists.
#[derive(Debug)]
pub struct SyncStore {
    limits: WindowLimits,
    default_filter: HistoryFilter,
    contexts: HashMap<ContextKey, ContextState>,
}

impl SyncStore {
    pub fn new(limits: WindowLimits, default_filter: HistoryFilter) -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(
            ContextKey::Main,
            ContextState::new(ContextKey::Main, default_filter.clone()),
        );
        Self {
            limits,
            default_filter,
            contexts,
        }
    }

    pub fn limits(&self) -> WindowLimits {
        self.limits
    }

    pub fn context(&self, key: &ContextKey) -> Option<&ContextState> {
        self.contexts.get(key)
    }

    pub fn context_mut(&mut self, key: &ContextKey) -> Option<&mut ContextState> {
        self.contexts.get_mut(key)
    }

    pub fn window(&self, key: &ContextKey) -> Option<&Window> {
        self.contexts.get(key).map(|c| &c.window)
    }

    pub fn is_open(&self, key: &ContextKey) -> bool {
        self.contexts.contains_key(key)
    }

    /// Open a context if needed, returning its state
    pub fn open(&mut self, key: ContextKey) -> &mut ContextState {
        let filter = self.default_filter.clone();
        self.contexts
            .entry(key.clone())
            .or_insert_with(|| ContextState::new(key, filter))
    }

    /// Tear down a thread or project context. Main cannot be closed.
    pub fn close(&mut self, key: &ContextKey) -> bool {
        if *key == ContextKey::Main {
            return false;
        }
        self.contexts.remove(key).is_some()
    }

    /// Contexts whose window currently holds `id`
    pub fn contexts_holding(&self, id: &str) -> Vec<ContextKey> {
        let mut keys: Vec<ContextKey> = self
            .contexts
            .values()
            .filter(|c| c.window.contains(id))
            .map(|c| c.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Live or optimistic insertion: upsert, then trim to retention.
    ///
    /// Evicted entries stay reachable through backward pagination.
    pub fn upsert_and_trim(&mut self, key: &ContextKey, update: MessageUpdate) -> Option<UpsertOutcome> {
        let retention = self.limits.retention();
        let context = self.contexts.get_mut(key)?;
        let outcome = context.window.upsert_one(update);
        if context.window.trim(retention) > 0 {
            context.has_more_older = true;
        }
        Some(outcome)
    }

    /// First copy of a message found in any window
    pub fn find_message(&self, id: &str) -> Option<&Message> {
        self.contexts
            .get(&ContextKey::Main)
            .and_then(|c| c.window.get(id))
            .or_else(|| self.contexts.values().find_map(|c| c.window.get(id)))
    }

    /// Apply the same in-place mutation to every window holding `id`.
    /// Returns the contexts that changed.
    pub fn update_message<F>(&mut self, id: &str, f: F) -> Vec<ContextKey>
    where
        F: Fn(&mut Message),
    {
        let mut changed: Vec<ContextKey> = self
            .contexts
            .values_mut()
            .filter_map(|c| c.window.update_message(id, &f).then(|| c.key.clone()))
            .collect();
        changed.sort();
        changed
    }
}
