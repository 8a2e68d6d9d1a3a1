use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::constants::{DEFAULT_ACTIVE_LIMIT, DEFAULT_RENDER_CAP, DEFAULT_SCROLLBACK_LIMIT};
use crate::models::{Message, MessageUpdate};

/// Size caps shared by every context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    /// Size of an initial load (the live tail)
    pub active_limit: usize,
    /// Page size for older/newer pagination
    pub scrollback_limit: usize,
    /// Maximum entries handed to the view
    pub render_cap: usize,
}

impl WindowLimits {
    /// Cap applied after live and optimistic insertions: the live tail plus
    /// one page of scrollback.
    pub fn retention(&self) -> usize {
        self.active_limit + self.scrollback_limit
    }
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            active_limit: DEFAULT_ACTIVE_LIMIT,
            scrollback_limit: DEFAULT_SCROLLBACK_LIMIT,
            render_cap: DEFAULT_RENDER_CAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    /// First-seen order; breaks timestamp ties and survives updates.
    rank: u64,
}

impl Entry {
    fn key(&self) -> (DateTime<Utc>, u64) {
        (self.message.timestamp, self.rank)
    }
}

/// Ordered, identity-unique message sequence for one context.
///
/// Entries are kept ascending by `(timestamp, first-seen rank)`, so equal
/// timestamps keep the order in which the window first saw them. Lookups
/// by identity go through `keys` and a binary search.
#[derive(Debug, Clone, Default)]
pub struct Window {
    entries: Vec<Entry>,
    /// Identity to the current ordering key of its entry
    keys: HashMap<String, (DateTime<Utc>, u64)>,
    next_rank: u64,
}

impl Window {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages oldest-first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + ExactSizeIterator {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.position(id).map(|idx| &self.entries[idx].message)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Backward pagination cursor
    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|e| e.message.timestamp)
    }

    /// Forward pagination cursor
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.message.timestamp)
    }

    /// The last `n` messages, oldest-first
    pub fn tail(&self, n: usize) -> Vec<&Message> {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..].iter().map(|e| &e.message).collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        let key = *self.keys.get(id)?;
        let idx = self.insertion_index(key);
        (self.entries.get(idx)?.key() == key).then_some(idx)
    }

    fn insertion_index(&self, key: (DateTime<Utc>, u64)) -> usize {
        self.entries.partition_point(|e| e.key() < key)
    }

    fn take_rank(&mut self) -> u64 {
        let rank = self.next_rank;
        self.next_rank += 1;
        rank
    }

    fn place(&mut self, entry: Entry) {
        let key = entry.key();
        let at = self.insertion_index(key);
        self.keys.insert(entry.message.id.clone(), key);
        self.entries.insert(at, entry);
    }

    /// Re-seat the entry at `idx` after its timestamp changed
    fn reposition(&mut self, idx: usize) {
        let entry = self.entries.remove(idx);
        self.place(entry);
    }

    /// Insert a new message or merge onto the entry with the same identity.
    ///
    /// Incoming fields win; the position is recomputed from the resulting
    /// timestamp. A new entry goes after any existing entries with an equal
    /// timestamp.
    pub fn upsert_one(&mut self, update: MessageUpdate) -> UpsertOutcome {
        match self.position(&update.id) {
            Some(idx) => {
                if self.entries[idx].message.apply(update) {
                    self.reposition(idx);
                }
                UpsertOutcome::Updated
            }
            None => {
                let message = Message::from_update(update, Utc::now());
                let rank = self.take_rank();
                self.place(Entry { message, rank });
                UpsertOutcome::Inserted
            }
        }
    }

    /// Merge a page of messages, older or newer, without disturbing the
    /// relative order of existing entries. Returns the number of new entries.
    pub fn append_batch(&mut self, messages: Vec<Message>) -> usize {
        let mut fresh: Vec<Entry> = Vec::new();
        let mut fresh_index: HashMap<String, usize> = HashMap::new();

        for message in messages {
            if let Some(idx) = self.position(&message.id) {
                if self.entries[idx].message.apply(message.into()) {
                    self.reposition(idx);
                }
                continue;
            }
            // Duplicates inside the page collapse onto the first occurrence.
            if let Some(&seen) = fresh_index.get(&message.id) {
                fresh[seen].message.apply(message.into());
                continue;
            }
            let rank = self.take_rank();
            fresh_index.insert(message.id.clone(), fresh.len());
            fresh.push(Entry { message, rank });
        }

        let inserted = fresh.len();
        if inserted == 0 {
            return 0;
        }
        fresh.sort_by_key(|e| e.key());
        for entry in &fresh {
            self.keys.insert(entry.message.id.clone(), entry.key());
        }

        let existing = std::mem::take(&mut self.entries);
        let mut merged = Vec::with_capacity(existing.len() + fresh.len());
        let mut existing = existing.into_iter().peekable();
        let mut fresh = fresh.into_iter().peekable();
        loop {
            let take_existing = match (existing.peek(), fresh.peek()) {
                (Some(a), Some(b)) => a.key() <= b.key(),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_existing {
                existing.next()
            } else {
                fresh.next()
            };
            merged.extend(next);
        }
        self.entries = merged;
        inserted
    }

    /// Keep only the `limit` most recent messages. Returns how many were evicted.
    pub fn trim(&mut self, limit: usize) -> usize {
        let excess = self.entries.len().saturating_sub(limit);
        for entry in self.entries.drain(..excess) {
            self.keys.remove(&entry.message.id);
        }
        excess
    }

    /// Rebuild from a fresh page. Local entries that the page does not echo
    /// stay, so an unconfirmed optimistic insert survives a reload.
    pub fn replace(&mut self, messages: Vec<Message>) {
        let previous = std::mem::take(&mut self.entries);
        self.keys.clear();
        self.append_batch(messages);
        let survivors: Vec<Message> = previous
            .into_iter()
            .map(|e| e.message)
            .filter(|m| m.is_local() && !self.contains(&m.id))
            .collect();
        self.append_batch(survivors);
    }

    /// Mutate one message in place (flag and tag toggles).
    pub fn update_message<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let before = self.entries[idx].message.timestamp;
        f(&mut self.entries[idx].message);
        if self.entries[idx].message.timestamp != before {
            self.reposition(idx);
        }
        true
    }
}
