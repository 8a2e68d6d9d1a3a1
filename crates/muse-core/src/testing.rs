//! Shared fixtures for unit tests.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use crate::backend::{CreateMessageRequest, HistoryQuery, HistorySource, MessageSink};
use crate::error::{SyncError, SyncResult};
use crate::models::{Delivery, Message, MessageFlags, Role, Source};

/// A confirmed assistant message `secs` seconds after a fixed epoch.
pub fn message_at(id: &str, secs: i64) -> Message {
    Message {
        id: id.to_string(),
        timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        role: Role::Assistant,
        source: Source::Frontend,
        body: format!("body {}", id),
        thread_ids: BTreeSet::new(),
        project_id: None,
        flags: MessageFlags::default(),
        tags: BTreeSet::new(),
        delivery: Delivery::Confirmed,
    }
}

/// `{prefix}{i}` at `i` seconds for each `i` in `range`, oldest-first
pub fn page(prefix: &str, range: std::ops::RangeInclusive<i64>) -> Vec<Message> {
    range
        .map(|i| message_at(&format!("{}{}", prefix, i), i))
        .collect()
}

/// History source that replays queued pages and records every query.
/// An exhausted queue answers with an empty page.
#[derive(Default)]
pub struct FakeHistory {
    pages: Mutex<VecDeque<SyncResult<Vec<Message>>>>,
    queries: Mutex<Vec<HistoryQuery>>,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, messages: Vec<Message>) {
        self.pages.lock().push_back(Ok(messages));
    }

    pub fn push_failure(&self, reason: &str) {
        self.pages
            .lock()
            .push_back(Err(SyncError::Transient(reason.to_string())));
    }

    pub fn queries(&self) -> Vec<HistoryQuery> {
        self.queries.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.queries.lock().len()
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch(&self, query: HistoryQuery) -> SyncResult<Vec<Message>> {
        self.queries.lock().push(query);
        self.pages.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Message sink that records requests and optionally rejects them.
#[derive(Default)]
pub struct FakeSink {
    requests: Mutex<Vec<CreateMessageRequest>>,
    failing: AtomicBool,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CreateMessageRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl MessageSink for FakeSink {
    async fn create(&self, request: CreateMessageRequest) -> SyncResult<()> {
        self.requests.lock().push(request);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}
