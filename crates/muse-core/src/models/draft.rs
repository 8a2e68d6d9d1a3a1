use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};

use super::message::{local_identity, Delivery, Message, MessageFlags, Role, Source};

/// A message composed locally, before it has an identity.
///
/// Timestamps are held at millisecond precision, the precision that is
/// hashed into the identity and sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDraft {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub source: Source,
    pub body: String,
    pub project_id: Option<String>,
    pub thread_id: Option<String>,
    /// Opaque upload references, passed through to the create request
    pub attachments: Vec<String>,
}

impl LocalDraft {
    /// A user message from the frontend, stamped now
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().trunc_subsecs(3),
            role: Role::User,
            source: Source::Frontend,
            body: body.into(),
            project_id: None,
            thread_id: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(3);
        self
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn in_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn identity(&self) -> String {
        local_identity(&self.timestamp, self.role, self.source, &self.body)
    }

    /// The optimistic entry for this draft, marked pending
    pub fn to_message(&self) -> Message {
        Message {
            id: self.identity(),
            timestamp: self.timestamp,
            role: self.role,
            source: self.source,
            body: self.body.clone(),
            thread_ids: self.thread_id.iter().cloned().collect::<BTreeSet<_>>(),
            project_id: self.project_id.clone(),
            flags: MessageFlags::default(),
            tags: BTreeSet::new(),
            delivery: Delivery::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_draft_message_carries_identity_and_thread() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let draft = LocalDraft::new("hello").with_timestamp(ts).in_thread("t-9");
        let message = draft.to_message();
        assert_eq!(message.id, draft.identity());
        assert_eq!(message.delivery, Delivery::Pending);
        assert!(message.in_thread("t-9"));
        assert_eq!(message.role, Role::User);
    }

    #[test]
    fn test_identity_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let a = LocalDraft::new("same").with_timestamp(ts);
        let b = LocalDraft::new("same").with_timestamp(ts).in_project("p");
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), LocalDraft::new("other").with_timestamp(ts).identity());
    }

    #[test]
    fn test_draft_timestamp_matches_wire_precision() {
        use crate::models::message::iso8601;

        assert_eq!(LocalDraft::new("now").timestamp.timestamp_subsec_nanos() % 1_000_000, 0);

        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let message = LocalDraft::new("x").with_timestamp(precise).to_message();
        assert_eq!(message.timestamp.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(iso8601::parse(&iso8601::format(&message.timestamp)), Some(message.timestamp));
    }
}
