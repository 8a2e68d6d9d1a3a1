use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[serde(other)]
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Other => "other",
        }
    }
}

/// Where a message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Frontend,
    Reminder,
    Discovery,
    #[serde(other)]
    Other,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Reminder => "reminder",
            Self::Discovery => "discovery",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFlag {
    Private,
    Hidden,
    Deleted,
    Remembered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    #[serde(default, rename = "is_private")]
    pub private: bool,
    #[serde(default, rename = "is_hidden")]
    pub hidden: bool,
    #[serde(default, rename = "is_deleted")]
    pub deleted: bool,
    #[serde(default)]
    pub remembered: bool,
}

impl MessageFlags {
    pub fn get(&self, flag: MessageFlag) -> bool {
        match flag {
            MessageFlag::Private => self.private,
            MessageFlag::Hidden => self.hidden,
            MessageFlag::Deleted => self.deleted,
            MessageFlag::Remembered => self.remembered,
        }
    }

    pub fn set(&mut self, flag: MessageFlag, value: bool) {
        match flag {
            MessageFlag::Private => self.private = value,
            MessageFlag::Hidden => self.hidden = value,
            MessageFlag::Deleted => self.deleted = value,
            MessageFlag::Remembered => self.remembered = value,
        }
    }
}

/// Local delivery marker for optimistically inserted messages.
///
/// Anything that came from the server is `Confirmed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Inserted locally, create request still in flight
    Pending,
    /// Create request accepted, echo not yet seen
    Sent,
    /// Create request failed; the entry stays visible
    Failed,
    #[default]
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "message_id")]
    pub id: String,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    #[serde(default = "default_source")]
    pub source: Source,
    #[serde(rename = "message", default)]
    pub body: String,
    #[serde(default)]
    pub thread_ids: BTreeSet<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub flags: MessageFlags,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(skip)]
    pub delivery: Delivery,
}

fn default_source() -> Source {
    Source::Other
}

impl Message {
    /// Build a new entry from an update, using `received_at` when the
    /// update carries no timestamp.
    pub fn from_update(mut update: MessageUpdate, received_at: DateTime<Utc>) -> Self {
        let delivery = update.delivery.take().unwrap_or_default();
        let mut message = Message {
            id: update.id.clone(),
            timestamp: received_at,
            role: Role::Other,
            source: Source::Other,
            body: String::new(),
            thread_ids: BTreeSet::new(),
            project_id: None,
            flags: MessageFlags::default(),
            tags: BTreeSet::new(),
            delivery,
        };
        message.apply(update);
        message
    }

    /// Merge the fields present in `update` onto this message.
    /// Returns true if the timestamp changed.
    pub fn apply(&mut self, update: MessageUpdate) -> bool {
        let mut moved = false;
        if let Some(timestamp) = update.timestamp {
            moved = timestamp != self.timestamp;
            self.timestamp = timestamp;
        }
        if let Some(role) = update.role {
            self.role = role;
        }
        if let Some(source) = update.source {
            self.source = source;
        }
        if let Some(body) = update.body {
            self.body = body;
        }
        if let Some(thread_ids) = update.thread_ids {
            self.thread_ids = thread_ids;
        }
        if let Some(project_id) = update.project_id {
            self.project_id = Some(project_id);
        }
        if let Some(flags) = update.flags {
            self.flags = flags;
        }
        if let Some(tags) = update.tags {
            self.tags = tags;
        }
        if let Some(delivery) = update.delivery {
            self.set_delivery(delivery);
        }
        moved
    }

    /// Confirmed is terminal: a late failure report never downgrades an echoed entry.
    pub fn set_delivery(&mut self, delivery: Delivery) {
        if self.delivery != Delivery::Confirmed || delivery == Delivery::Confirmed {
            self.delivery = delivery;
        }
    }

    pub fn in_thread(&self, thread_id: &str) -> bool {
        self.thread_ids.contains(thread_id)
    }

    pub fn is_local(&self) -> bool {
        self.delivery != Delivery::Confirmed
    }
}

/// Partial message used for merging; only `Some` fields overwrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub role: Option<Role>,
    pub source: Option<Source>,
    pub body: Option<String>,
    pub thread_ids: Option<BTreeSet<String>>,
    pub project_id: Option<String>,
    pub flags: Option<MessageFlags>,
    pub tags: Option<BTreeSet<String>>,
    pub delivery: Option<Delivery>,
}

impl MessageUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

impl From<Message> for MessageUpdate {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            timestamp: Some(message.timestamp),
            role: Some(message.role),
            source: Some(message.source),
            body: Some(message.body),
            thread_ids: Some(message.thread_ids),
            project_id: message.project_id,
            flags: Some(message.flags),
            tags: Some(message.tags),
            delivery: Some(message.delivery),
        }
    }
}

/// Deterministic identity for a locally created message.
///
/// Fields are joined with `|`; the body goes last and the other fields never
/// contain the delimiter, so distinct drafts cannot collide by concatenation.
pub fn local_identity(timestamp: &DateTime<Utc>, role: Role, source: Source, body: &str) -> String {
    let canonical = format!(
        "{}|{}|{}|{}",
        iso8601::format(timestamp),
        role.as_str(),
        source.as_str(),
        body
    );
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// ISO-8601 timestamps as the backend emits them: RFC 3339, or naive
/// date-times which are taken as UTC.
pub mod iso8601 {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(timestamp: &DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(timestamp))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw))),
            }
        }
    }
}
