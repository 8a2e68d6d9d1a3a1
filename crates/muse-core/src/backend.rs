use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::models::{iso8601, ContextKey, HistoryFilter, LocalDraft, Message, Source};

/// One page request against the history API.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub context: ContextKey,
    /// Exclusive upper bound (older pagination)
    pub before: Option<DateTime<Utc>>,
    /// Exclusive lower bound (newer pagination)
    pub after: Option<DateTime<Utc>>,
    pub limit: usize,
    pub sources: Vec<Source>,
}

impl HistoryQuery {
    /// Most recent `limit` messages of `context`
    pub fn for_context(context: ContextKey, filter: &HistoryFilter, limit: usize) -> Self {
        Self {
            context,
            before: None,
            after: None,
            limit,
            sources: filter.sources.clone(),
        }
    }

    pub fn before(mut self, boundary: DateTime<Utc>) -> Self {
        self.before = Some(boundary);
        self
    }

    pub fn after(mut self, boundary: DateTime<Utc>) -> Self {
        self.after = Some(boundary);
        self
    }

    /// Query-string pairs for `GET /messages`
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("limit", self.limit.to_string())];
        if let Some(before) = &self.before {
            params.push(("before", iso8601::format(before)));
        }
        if let Some(after) = &self.after {
            params.push(("after", iso8601::format(after)));
        }
        match &self.context {
            ContextKey::Main => {}
            ContextKey::Thread(id) => params.push(("thread_id", id.clone())),
            ContextKey::Project(id) => params.push(("project_id", id.clone())),
        }
        if !self.sources.is_empty() {
            let sources: Vec<&str> = self.sources.iter().map(Source::as_str).collect();
            params.push(("source", sources.join(",")));
        }
        params
    }
}

/// Body of the create-message request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateMessageRequest {
    pub body: String,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
    pub project_id: Option<String>,
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl CreateMessageRequest {
    pub fn from_draft(draft: &LocalDraft, message_id: impl Into<String>) -> Self {
        Self {
            body: draft.body.clone(),
            timestamp: draft.timestamp,
            message_id: message_id.into(),
            project_id: draft.project_id.clone(),
            thread_id: draft.thread_id.clone(),
            attachments: draft.attachments.clone(),
        }
    }

    /// Rebuild the request for an entry already in a window
    pub fn from_message(message: &Message) -> Self {
        Self {
            body: message.body.clone(),
            timestamp: message.timestamp,
            message_id: message.id.clone(),
            project_id: message.project_id.clone(),
            thread_id: message.thread_ids.iter().next().cloned(),
            attachments: Vec::new(),
        }
    }
}

/// Paginated history fetch. Returns messages oldest-first, at most `limit`.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch(&self, query: HistoryQuery) -> SyncResult<Vec<Message>>;
}

/// Fire-and-forget message creation.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn create(&self, request: CreateMessageRequest) -> SyncResult<()>;
}

/// REST client for the muse API
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }

    async fn check(response: reqwest::Response) -> SyncResult<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl HistorySource for HttpBackend {
    async fn fetch(&self, query: HistoryQuery) -> SyncResult<Vec<Message>> {
        debug!(context = %query.context, limit = query.limit, "fetching history page");

        let response = self
            .client
            .get(self.messages_url())
            .query(&query.to_params())
            .send()
            .await?;
        let mut messages: Vec<Message> = Self::check(response).await?.json().await?;

        // Some deployments answer newest-first
        messages.sort_by_key(|m| m.timestamp);
        messages.truncate(query.limit);
        Ok(messages)
    }
}

#[async_trait]
impl MessageSink for HttpBackend {
    async fn create(&self, request: CreateMessageRequest) -> SyncResult<()> {
        let response = self
            .client
            .post(self.messages_url())
            .json(&request)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_params_for_thread_page() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let filter = HistoryFilter {
            sources: vec![Source::Frontend, Source::Discovery],
        };
        let query = HistoryQuery::for_context(ContextKey::thread("t-1"), &filter, 25).before(ts);
        assert_eq!(
            query.to_params(),
            vec![
                ("limit", "25".to_string()),
                ("before", "2024-05-01T08:00:00.000Z".to_string()),
                ("thread_id", "t-1".to_string()),
                ("source", "frontend,discovery".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_params_for_main_omit_selector() {
        let query = HistoryQuery::for_context(ContextKey::Main, &HistoryFilter::default(), 50);
        assert_eq!(query.to_params(), vec![("limit", "50".to_string())]);
    }

    #[test]
    fn test_create_request_serialization() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let draft = LocalDraft::new("hello").with_timestamp(ts).in_project("p-1");
        let request = CreateMessageRequest::from_draft(&draft, draft.identity());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["body"], "hello");
        assert_eq!(json["timestamp"], "2024-05-01T08:00:00.000Z");
        assert_eq!(json["message_id"], draft.identity());
        assert_eq!(json["project_id"], "p-1");
        assert!(json["thread_id"].is_null());
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn test_messages_url_trims_trailing_slash() {
        let backend = HttpBackend::new("http://localhost:8000/api/");
        assert_eq!(backend.messages_url(), "http://localhost:8000/api/messages");
    }
}
