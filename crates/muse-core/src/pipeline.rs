use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{CreateMessageRequest, MessageSink};
use crate::events::{DeliveryReport, SyncUpdate};
use crate::models::{ContextKey, Delivery, LocalDraft, Message, MessageUpdate};
use crate::store::{SyncStore, UpsertOutcome};

/// Local-first sends and their reconciliation with server echoes.
pub struct OptimisticPipeline {
    sink: Arc<dyn MessageSink>,
    results: mpsc::UnboundedSender<SyncUpdate>,
}

impl OptimisticPipeline {
    pub fn new(sink: Arc<dyn MessageSink>, results: mpsc::UnboundedSender<SyncUpdate>) -> Self {
        Self { sink, results }
    }

    /// Insert the draft into `active` right away and fire the create request.
    /// The returned entry carries the identity the server will echo.
    pub fn submit(&self, store: &mut SyncStore, active: &ContextKey, draft: LocalDraft) -> Message {
        let message = draft.to_message();
        let request = CreateMessageRequest::from_draft(&draft, message.id.clone());

        if store.upsert_and_trim(active, message.clone().into()).is_none() {
            store.upsert_and_trim(&ContextKey::Main, message.clone().into());
        }
        debug!(message_id = %message.id, context = %active, "optimistic insert");

        self.spawn_create(request);
        message
    }

    /// Upsert a server copy into main, into every open thread it belongs to,
    /// and into any other context already holding the identity.
    pub fn reconcile(&self, store: &mut SyncStore, update: MessageUpdate) -> Vec<(ContextKey, UpsertOutcome)> {
        let mut targets = vec![ContextKey::Main];
        for thread_id in update.thread_ids.iter().flatten() {
            let key = ContextKey::thread(thread_id.as_str());
            if store.is_open(&key) {
                targets.push(key);
            }
        }
        for key in store.contexts_holding(&update.id) {
            if !targets.contains(&key) {
                targets.push(key);
            }
        }

        let update = MessageUpdate {
            delivery: Some(Delivery::Confirmed),
            ..update
        };
        targets
            .into_iter()
            .filter_map(|key| {
                let outcome = store.upsert_and_trim(&key, update.clone())?;
                Some((key, outcome))
            })
            .collect()
    }

    /// Mark the entry sent or failed. A failed entry stays visible; nothing
    /// is rolled back or retried automatically.
    pub fn record_delivery(&self, store: &mut SyncStore, report: &DeliveryReport) -> Vec<ContextKey> {
        let delivery = match &report.outcome {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                warn!(message_id = %report.message_id, error = %e, "message create failed");
                Delivery::Failed
            }
        };
        store.update_message(&report.message_id, |m| m.set_delivery(delivery))
    }

    /// Re-issue the create request for a failed entry, same identity.
    pub fn resubmit(&self, store: &mut SyncStore, message_id: &str) -> bool {
        let request = match store.find_message(message_id) {
            Some(message) if message.delivery == Delivery::Failed => {
                CreateMessageRequest::from_message(message)
            }
            _ => return false,
        };
        store.update_message(message_id, |m| m.set_delivery(Delivery::Pending));
        self.spawn_create(request);
        true
    }

    fn spawn_create(&self, request: CreateMessageRequest) {
        let sink = self.sink.clone();
        let results = self.results.clone();
        tokio::spawn(async move {
            let message_id = request.message_id.clone();
            let outcome = sink.create(request).await;
            let report = DeliveryReport { message_id, outcome };
            if results.send(SyncUpdate::Delivery(report)).is_err() {
                debug!("runtime gone, discarding delivery report");
            }
        });
    }
}
