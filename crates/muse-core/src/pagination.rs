use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{HistoryQuery, HistorySource};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncUpdate;
use crate::models::{ContextKey, Message};
use crate::store::{LoadDirection, SyncStore};

/// A resolved history fetch, waiting to be applied on the event loop.
#[derive(Debug)]
pub struct PageResult {
    pub context: ContextKey,
    pub direction: LoadDirection,
    /// Page size asked for; a shorter page means the end was reached
    pub requested: usize,
    pub outcome: SyncResult<Vec<Message>>,
}

/// Scroll geometry of a view at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSnapshot {
    pub content_extent: f64,
    pub offset: f64,
}

impl ViewportSnapshot {
    /// Offset that keeps the same content under the viewport after
    /// `new_extent - content_extent` was prepended above it.
    pub fn anchored_offset(&self, new_extent: f64) -> f64 {
        (self.offset + (new_extent - self.content_extent)).max(0.0)
    }
}

/// View hook around an older-page prepend.
///
/// `capture` runs before the window changes, `restore` after, with the
/// captured snapshot.
pub trait ScrollAnchor: Send {
    fn capture(&mut self, context: &ContextKey) -> Option<ViewportSnapshot>;
    fn restore(&mut self, context: &ContextKey, before: ViewportSnapshot);
}

#[derive(Debug)]
pub enum PageApplied {
    Applied { inserted: usize },
    /// Window and flags untouched; the caller may retry
    Failed(SyncError),
    /// The context was closed while the fetch was in flight
    Dropped,
}

/// Cursor-based history loads for every context of a session.
pub struct PaginationController {
    source: Arc<dyn HistorySource>,
    results: mpsc::UnboundedSender<SyncUpdate>,
}

impl PaginationController {
    pub fn new(source: Arc<dyn HistorySource>, results: mpsc::UnboundedSender<SyncUpdate>) -> Self {
        Self { source, results }
    }

    /// Fetch the most recent page; the result replaces the window.
    pub fn load_initial(&self, store: &mut SyncStore, key: &ContextKey) -> bool {
        let limit = store.limits().active_limit;
        let Some(state) = store.context_mut(key) else {
            return false;
        };
        if !state.begin_load(LoadDirection::Initial) {
            return false;
        }
        let query = HistoryQuery::for_context(key.clone(), &state.filter, limit);
        self.spawn_fetch(query, LoadDirection::Initial);
        true
    }

    /// Fetch the page strictly before the oldest loaded message.
    pub fn load_older(&self, store: &mut SyncStore, key: &ContextKey) -> bool {
        let page_size = store.limits().scrollback_limit;
        let oldest = match store.context(key) {
            None => return false,
            Some(state) if !state.has_more_older => return false,
            Some(state) => state.window.oldest_timestamp(),
        };
        let Some(oldest) = oldest else {
            return self.load_initial(store, key);
        };
        let Some(state) = store.context_mut(key) else {
            return false;
        };
        if !state.begin_load(LoadDirection::Older) {
            return false;
        }
        let query = HistoryQuery::for_context(key.clone(), &state.filter, page_size).before(oldest);
        self.spawn_fetch(query, LoadDirection::Older);
        true
    }

    /// Fetch the page strictly after the newest loaded message.
    pub fn load_newer(&self, store: &mut SyncStore, key: &ContextKey) -> bool {
        let page_size = store.limits().scrollback_limit;
        let newest = match store.context(key) {
            None => return false,
            Some(state) if state.is_cold() => None,
            Some(state) if !state.has_more_newer => return false,
            Some(state) => state.window.newest_timestamp(),
        };
        let Some(newest) = newest else {
            return self.load_initial(store, key);
        };
        let Some(state) = store.context_mut(key) else {
            return false;
        };
        if !state.begin_load(LoadDirection::Newer) {
            return false;
        }
        let query = HistoryQuery::for_context(key.clone(), &state.filter, page_size).after(newest);
        self.spawn_fetch(query, LoadDirection::Newer);
        true
    }

    fn spawn_fetch(&self, query: HistoryQuery, direction: LoadDirection) {
        let source = self.source.clone();
        let results = self.results.clone();
        tokio::spawn(async move {
            let context = query.context.clone();
            let requested = query.limit;
            let outcome = source.fetch(query).await;
            let page = PageResult {
                context,
                direction,
                requested,
                outcome,
            };
            if results.send(SyncUpdate::Page(page)).is_err() {
                debug!("runtime gone, discarding page");
            }
        });
    }

    /// Merge a resolved page into its context.
    pub fn apply(
        &self,
        store: &mut SyncStore,
        result: PageResult,
        mut anchor: Option<&mut dyn ScrollAnchor>,
    ) -> PageApplied {
        let PageResult {
            context,
            direction,
            requested,
            outcome,
        } = result;

        let Some(state) = store.context_mut(&context) else {
            debug!(%context, ?direction, "dropping page for closed context");
            return PageApplied::Dropped;
        };
        state.finish_load(direction);

        let messages = match outcome {
            Ok(messages) => messages,
            Err(e) => {
                warn!(%context, ?direction, error = %e, "history page failed");
                return PageApplied::Failed(e);
            }
        };
        let exhausted = messages.len() < requested;
        // Without channel pushes, forward paging is the only way to catch up
        let pages_forward = !context.is_live();

        let inserted = match direction {
            LoadDirection::Initial => {
                state.window.replace(messages);
                state.has_more_older = !exhausted;
                state.has_more_newer = pages_forward;
                state.window.len()
            }
            LoadDirection::Older => {
                let before = anchor.as_mut().and_then(|a| a.capture(&context));
                let inserted = state.window.append_batch(messages);
                if exhausted {
                    state.has_more_older = false;
                }
                if let (Some(anchor), Some(before)) = (anchor, before) {
                    anchor.restore(&context, before);
                }
                inserted
            }
            LoadDirection::Newer => {
                let inserted = state.window.append_batch(messages);
                state.has_more_newer = pages_forward || !exhausted;
                inserted
            }
        };
        debug!(%context, ?direction, inserted, "page applied");
        PageApplied::Applied { inserted }
    }
}
