use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::backend::{HistorySource, HttpBackend, MessageSink};
use crate::channel::{ChannelOptions, ConnectionManager, ConnectionState, InboundEvent};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::events::{CoreEvent, SyncUpdate};
use crate::models::{
    ContextKey, HistoryFilter, LocalDraft, Message, MessageFlag, Role, ThreadDirectory,
};
use crate::pagination::{PageApplied, PaginationController, ScrollAnchor};
use crate::pipeline::OptimisticPipeline;
use crate::router::ContextRouter;
use crate::store::SyncStore;

/// Session-scoped owner of every window, the live channel and the
/// in-flight requests.
///
/// Drive it with `next_update().await` followed by `process(update)`;
/// all window mutation happens inside `process` or a direct call.
pub struct SyncRuntime {
    config: SyncConfig,
    store: SyncStore,
    router: ContextRouter,
    pager: PaginationController,
    pipeline: OptimisticPipeline,
    connection: ConnectionManager,
    connection_rx: watch::Receiver<ConnectionState>,
    updates_rx: mpsc::UnboundedReceiver<SyncUpdate>,
    motd: watch::Sender<Option<String>>,
    anchor: Option<Box<dyn ScrollAnchor>>,
    awaiting_reply: bool,
}

impl SyncRuntime {
    pub fn new(
        config: SyncConfig,
        history: Arc<dyn HistorySource>,
        sink: Arc<dyn MessageSink>,
        threads: Arc<dyn ThreadDirectory>,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let mut connection = ConnectionManager::new(ChannelOptions::from_config(&config));
        let frames_tx = updates_tx.clone();
        connection.on_event(move |event| {
            if frames_tx.send(SyncUpdate::Frame(event)).is_err() {
                debug!("runtime gone, dropping frame");
            }
        });
        let connection_rx = connection.subscribe();

        let store = SyncStore::new(config.limits(), config.history_filter());
        let (motd, _) = watch::channel(None);

        Self {
            store,
            router: ContextRouter::new(threads),
            pager: PaginationController::new(history, updates_tx.clone()),
            pipeline: OptimisticPipeline::new(sink, updates_tx),
            connection,
            connection_rx,
            updates_rx,
            motd,
            anchor: None,
            awaiting_reply: false,
            config,
        }
    }

    /// Runtime backed by the REST API at `config.api_base_url`
    pub fn with_http(config: SyncConfig, threads: Arc<dyn ThreadDirectory>) -> Self {
        let backend = Arc::new(HttpBackend::new(config.api_base_url.clone()));
        Self::new(config, backend.clone(), backend, threads)
    }

    /// Open the live channel and load the main timeline.
    pub fn start(&mut self) {
        info!(channel = %self.config.channel_url, api = %self.config.api_base_url, "starting sync runtime");
        self.connection.connect();
        self.reload();
    }

    pub async fn wait_ready(&self) -> SyncResult<()> {
        self.connection.wait_ready().await
    }

    /// Next input for `process`. Pending until something happens.
    pub async fn next_update(&mut self) -> Option<SyncUpdate> {
        tokio::select! {
            Ok(()) = self.connection_rx.changed() => {
                let state = *self.connection_rx.borrow_and_update();
                Some(SyncUpdate::Connection(state))
            }
            update = self.updates_rx.recv() => update,
        }
    }

    /// Apply one input to the windows and report what changed.
    pub fn process(&mut self, update: SyncUpdate) -> Vec<CoreEvent> {
        match update {
            SyncUpdate::Frame(InboundEvent::Message(frame)) => {
                if frame.role == Some(Role::Assistant) {
                    self.awaiting_reply = false;
                }
                self.pipeline
                    .reconcile(&mut self.store, frame.to_update())
                    .into_iter()
                    .map(|(key, _)| CoreEvent::WindowChanged(key))
                    .collect()
            }
            SyncUpdate::Frame(InboundEvent::Motd(text)) => {
                self.motd.send_replace(Some(text.clone()));
                vec![CoreEvent::Motd(text)]
            }
            SyncUpdate::Connection(state) => vec![CoreEvent::ConnectionChanged(state)],
            SyncUpdate::Page(page) => {
                let context = page.context.clone();
                let direction = page.direction;
                let anchor: Option<&mut dyn ScrollAnchor> = match self.anchor {
                    Some(ref mut anchor) => Some(anchor.as_mut()),
                    None => None,
                };
                match self.pager.apply(&mut self.store, page, anchor) {
                    PageApplied::Applied { .. } => vec![CoreEvent::WindowChanged(context)],
                    PageApplied::Failed(e) => vec![CoreEvent::PageFailed {
                        context,
                        direction,
                        error: e.to_string(),
                    }],
                    PageApplied::Dropped => Vec::new(),
                }
            }
            SyncUpdate::Delivery(report) => {
                let mut events: Vec<CoreEvent> = self
                    .pipeline
                    .record_delivery(&mut self.store, &report)
                    .into_iter()
                    .map(CoreEvent::WindowChanged)
                    .collect();
                if let Err(e) = &report.outcome {
                    events.push(CoreEvent::DeliveryFailed {
                        message_id: report.message_id,
                        error: e.to_string(),
                    });
                }
                events
            }
        }
    }

    /// Send a draft from the active context. Thread and project ids are
    /// filled in from the context when the draft leaves them empty.
    pub fn submit(&mut self, mut draft: LocalDraft) -> Message {
        let active = self.router.active().clone();
        if draft.thread_id.is_none() {
            draft.thread_id = active.thread_id().map(str::to_string);
        }
        if draft.project_id.is_none() {
            draft.project_id = active.project_id().map(str::to_string);
        }
        self.awaiting_reply = true;
        self.pipeline.submit(&mut self.store, &active, draft)
    }

    pub fn resubmit(&mut self, message_id: &str) -> bool {
        self.pipeline.resubmit(&mut self.store, message_id)
    }

    /// Returns true if the switch started an initial load
    pub fn switch_context(&mut self, key: ContextKey) -> bool {
        self.router.switch_context(&mut self.store, &self.pager, key)
    }

    pub fn close_context(&mut self, key: &ContextKey) -> bool {
        self.router.close_context(&mut self.store, key)
    }

    /// Refetch the newest page of the active context
    pub fn reload(&mut self) -> bool {
        let active = self.router.active().clone();
        self.pager.load_initial(&mut self.store, &active)
    }

    pub fn load_older(&mut self) -> bool {
        let active = self.router.active().clone();
        self.pager.load_older(&mut self.store, &active)
    }

    pub fn load_newer(&mut self) -> bool {
        let active = self.router.active().clone();
        self.pager.load_newer(&mut self.store, &active)
    }

    /// Change a context's fetch filter and reload it from the newest page.
    pub fn set_filter(&mut self, key: &ContextKey, filter: HistoryFilter) -> bool {
        let Some(state) = self.store.context_mut(key) else {
            return false;
        };
        state.filter = filter;
        self.pager.load_initial(&mut self.store, key)
    }

    /// Visible slice of the active context
    pub fn visible(&self) -> Vec<&Message> {
        self.visible_for(self.router.active())
    }

    pub fn visible_for(&self, key: &ContextKey) -> Vec<&Message> {
        match self.router.select_window(&self.store, key) {
            Some(window) => self
                .router
                .visible_slice(key, window, self.store.limits().render_cap),
            None => Vec::new(),
        }
    }

    /// Set a flag on every copy of a message. Returns the contexts changed.
    pub fn set_flag(&mut self, message_id: &str, flag: MessageFlag, value: bool) -> Vec<ContextKey> {
        self.store
            .update_message(message_id, |m| m.flags.set(flag, value))
    }

    /// Add `tag` if absent, remove it if present.
    pub fn toggle_tag(&mut self, message_id: &str, tag: &str) -> Vec<ContextKey> {
        let present = self
            .store
            .find_message(message_id)
            .is_some_and(|m| m.tags.contains(tag));
        self.store.update_message(message_id, |m| {
            if present {
                m.tags.remove(tag);
            } else {
                m.tags.insert(tag.to_string());
            }
        })
    }

    pub fn set_scroll_anchor(&mut self, anchor: Box<dyn ScrollAnchor>) {
        self.anchor = Some(anchor);
    }

    /// Subscribe to the message of the day
    pub fn motd(&self) -> watch::Receiver<Option<String>> {
        self.motd.subscribe()
    }

    pub fn current_motd(&self) -> Option<String> {
        self.motd.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connecting(&self) -> bool {
        self.connection.is_connecting()
    }

    /// True between a submit and the next assistant message
    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn active_context(&self) -> &ContextKey {
        self.router.active()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn shutdown(&mut self) {
        self.connection.shutdown().await;
        info!("sync runtime stopped");
    }
}
