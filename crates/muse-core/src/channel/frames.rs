use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::frame_types;
use crate::error::{SyncError, SyncResult};
use crate::models::{iso8601, Delivery, MessageUpdate, Role, Source};

/// Registration frame, sent once per connection before it counts as ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handshake {
    pub listen_as: String,
}

impl Handshake {
    pub fn new(listen_as: impl Into<String>) -> Self {
        Self {
            listen_as: listen_as.into(),
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::MalformedFrame(e.to_string()))
    }
}

/// New or updated message fields pushed over the channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MuseMessageFrame {
    pub message_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub thread_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "iso8601::option::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MuseMessageFrame {
    /// All thread ids the frame names, single and list forms combined
    pub fn threads(&self) -> BTreeSet<String> {
        self.thread_ids
            .iter()
            .flatten()
            .chain(self.thread_id.iter())
            .cloned()
            .collect()
    }

    /// Server fields as a merge update; the server copy is canonical.
    pub fn to_update(&self) -> MessageUpdate {
        let threads = self.threads();
        MessageUpdate {
            id: self.message_id.clone(),
            timestamp: self.timestamp,
            role: self.role,
            source: self.source,
            body: self.message.clone(),
            thread_ids: (!threads.is_empty()).then_some(threads),
            project_id: self.project_id.clone(),
            flags: None,
            tags: None,
            delivery: Some(Delivery::Confirmed),
        }
    }
}

/// A recognized inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(MuseMessageFrame),
    Motd(String),
}

#[derive(Deserialize)]
struct MotdFrame {
    #[serde(default)]
    message: String,
}

/// Decode one text frame. Unknown `type` tags yield `Ok(None)`.
pub fn parse_frame(text: &str) -> SyncResult<Option<InboundEvent>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| SyncError::MalformedFrame(e.to_string()))?;
    let Some(kind) = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(str::to_string)
    else {
        return Err(SyncError::MalformedFrame("missing type tag".to_string()));
    };

    let event = match kind.as_str() {
        frame_types::MUSE_MESSAGE => {
            let frame: MuseMessageFrame = serde_json::from_value(value)
                .map_err(|e| SyncError::MalformedFrame(format!("{}: {}", kind, e)))?;
            InboundEvent::Message(frame)
        }
        frame_types::MOTD_UPDATE => {
            let frame: MotdFrame = serde_json::from_value(value)
                .map_err(|e| SyncError::MalformedFrame(format!("{}: {}", kind, e)))?;
            InboundEvent::Motd(frame.message)
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_json() {
        let json = Handshake::new("frontend").to_json().unwrap();
        assert_eq!(json, r#"{"listen_as":"frontend"}"#);
    }

    #[test]
    fn test_parse_muse_message() {
        let text = r#"{"type":"muse_message","message":"hi","role":"assistant",
            "message_id":"m-1","project_id":null,"thread_id":"t-1",
            "timestamp":"2024-05-01T12:00:00.500Z"}"#;
        let Some(InboundEvent::Message(frame)) = parse_frame(text).unwrap() else {
            panic!("expected message frame");
        };
        let update = frame.to_update();
        assert_eq!(update.id, "m-1");
        assert_eq!(update.body.as_deref(), Some("hi"));
        assert_eq!(update.role, Some(Role::Assistant));
        assert!(update.project_id.is_none());
        assert!(update.thread_ids.unwrap().contains("t-1"));
        assert_eq!(
            iso8601::format(&update.timestamp.unwrap()),
            "2024-05-01T12:00:00.500Z"
        );
        assert_eq!(update.delivery, Some(Delivery::Confirmed));
    }

    #[test]
    fn test_frame_without_threads_leaves_membership_untouched() {
        let text = r#"{"type":"muse_message","message_id":"m-2","message":"x"}"#;
        let Some(InboundEvent::Message(frame)) = parse_frame(text).unwrap() else {
            panic!("expected message frame");
        };
        let update = frame.to_update();
        assert!(update.thread_ids.is_none());
        assert!(update.timestamp.is_none());
    }

    #[test]
    fn test_parse_motd() {
        let event = parse_frame(r#"{"type":"motd_update","message":"maintenance at 5"}"#).unwrap();
        assert_eq!(event, Some(InboundEvent::Motd("maintenance at 5".to_string())));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        assert_eq!(parse_frame(r#"{"type":"typing","who":"x"}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(parse_frame("not json"), Err(SyncError::MalformedFrame(_))));
        assert!(matches!(parse_frame(r#"{"message":"x"}"#), Err(SyncError::MalformedFrame(_))));
        assert!(matches!(
            parse_frame(r#"{"type":"muse_message","message":"no id"}"#),
            Err(SyncError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_error_names_the_frame_type() {
        match parse_frame(r#"{"type":"muse_message","message_id":7}"#) {
            Err(SyncError::MalformedFrame(reason)) => assert!(reason.starts_with("muse_message: ")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
