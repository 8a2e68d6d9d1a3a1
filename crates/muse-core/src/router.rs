use std::sync::Arc;

use tracing::debug;

use crate::models::{ContextKey, Message, ThreadDirectory};
use crate::pagination::PaginationController;
use crate::store::{SyncStore, Window};

/// Tracks the active context and shapes what the view gets to see.
pub struct ContextRouter {
    active: ContextKey,
    threads: Arc<dyn ThreadDirectory>,
}

impl ContextRouter {
    pub fn new(threads: Arc<dyn ThreadDirectory>) -> Self {
        Self {
            active: ContextKey::Main,
            threads,
        }
    }

    pub fn active(&self) -> &ContextKey {
        &self.active
    }

    pub fn select_window<'a>(&self, store: &'a SyncStore, key: &ContextKey) -> Option<&'a Window> {
        store.window(key)
    }

    /// The last `render_cap` displayable messages, oldest-first.
    ///
    /// Main and project views hide members of concealed threads; a thread
    /// view shows only its own members, unfiltered.
    pub fn visible_slice<'a>(&self, key: &ContextKey, window: &'a Window, render_cap: usize) -> Vec<&'a Message> {
        let mut visible: Vec<&Message> = match key {
            ContextKey::Thread(thread_id) => window.iter().filter(|m| m.in_thread(thread_id)).collect(),
            ContextKey::Main | ContextKey::Project(_) => window
                .iter()
                .filter(|m| !m.thread_ids.iter().any(|t| self.threads.is_concealed(t)))
                .collect(),
        };
        let start = visible.len().saturating_sub(render_cap);
        visible.split_off(start)
    }

    /// Make `key` active, opening it if needed. A cold window gets exactly
    /// one initial load; a warm one is reused as is. Returns true if a
    /// fetch was started.
    pub fn switch_context(&mut self, store: &mut SyncStore, pager: &PaginationController, key: ContextKey) -> bool {
        let cold = store.open(key.clone()).is_cold();
        debug!(from = %self.active, to = %key, cold, "switching context");
        self.active = key;
        cold && pager.load_initial(store, &self.active)
    }

    /// Tear down a thread or project context; main falls back in if it was active.
    pub fn close_context(&mut self, store: &mut SyncStore, key: &ContextKey) -> bool {
        if !store.close(key) {
            return false;
        }
        if self.active == *key {
            self.active = ContextKey::Main;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SyncUpdate;
    use crate::models::{HistoryFilter, ThreadVisibility};
    use crate::store::WindowLimits;
    use crate::testing::{message_at, page, FakeHistory};
    use std::collections::{BTreeSet, HashMap};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn tagged(id: &str, secs: i64, threads: &[&str]) -> Message {
        let mut message = message_at(id, secs);
        message.thread_ids = threads.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>();
        message
    }

    fn directory() -> Arc<dyn ThreadDirectory> {
        let mut threads = HashMap::new();
        threads.insert(
            "secret".to_string(),
            ThreadVisibility {
                is_hidden: false,
                is_private: true,
            },
        );
        threads.insert("open".to_string(), ThreadVisibility::default());
        Arc::new(threads)
    }

    fn window_of(messages: Vec<Message>) -> Window {
        let mut window = Window::new();
        window.append_batch(messages);
        window
    }

    #[test]
    fn test_main_slice_hides_concealed_thread_members() {
        let router = ContextRouter::new(directory());
        let window = window_of(vec![
            tagged("a", 1, &[]),
            tagged("b", 2, &["secret"]),
            tagged("c", 3, &["open"]),
            tagged("d", 4, &["open", "secret"]),
            tagged("e", 5, &["unknown"]),
        ]);
        let ids: Vec<&str> = router
            .visible_slice(&ContextKey::Main, &window, 10)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c", "e"]);
    }

    #[test]
    fn test_thread_slice_is_unfiltered_and_capped() {
        let router = ContextRouter::new(directory());
        let window = window_of(vec![
            tagged("a", 1, &["secret"]),
            tagged("b", 2, &["secret"]),
            tagged("c", 3, &["open"]),
            tagged("d", 4, &["secret"]),
        ]);
        let ids: Vec<&str> = router
            .visible_slice(&ContextKey::thread("secret"), &window, 2)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn test_render_cap_keeps_newest() {
        let router = ContextRouter::new(directory());
        let window = window_of(page("t", 1..=8));
        let slice = router.visible_slice(&ContextKey::Main, &window, 3);
        assert_eq!(slice.len(), 3);
        assert_eq!(slice[0].id, "t6");
        assert_eq!(slice[2].id, "t8");
    }

    #[tokio::test]
    async fn test_switch_loads_cold_thread_once_and_reuses_warm_main() {
        let history = Arc::new(FakeHistory::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncUpdate>();
        let pager = PaginationController::new(history.clone(), tx);
        let mut store = SyncStore::new(WindowLimits::default(), HistoryFilter::default());
        store
            .context_mut(&ContextKey::Main)
            .unwrap()
            .window
            .append_batch(page("t", 1..=3));
        let mut router = ContextRouter::new(directory());

        let thread = ContextKey::thread("open");
        assert!(router.switch_context(&mut store, &pager, thread.clone()));
        assert!(!router.switch_context(&mut store, &pager, thread.clone()));
        assert_eq!(router.active(), &thread);

        assert!(!router.switch_context(&mut store, &pager, ContextKey::Main));
        assert_eq!(router.active(), &ContextKey::Main);

        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, SyncUpdate::Page(ref p) if p.context == thread));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(history.fetch_count(), 1);
    }

    #[test]
    fn test_close_active_context_falls_back_to_main() {
        let mut store = SyncStore::new(WindowLimits::default(), HistoryFilter::default());
        let mut router = ContextRouter::new(directory());
        let project = ContextKey::project("p");
        store.open(project.clone());
        router.active = project.clone();

        assert!(router.close_context(&mut store, &project));
        assert_eq!(router.active(), &ContextKey::Main);
        assert!(!router.close_context(&mut store, &ContextKey::Main));
    }
}
