//! Ordered, single-writer list of chat entries with change notifications.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::model::{ChatMessage, MessageRecord, Role};

/// Stable identifier of a transcript entry. A streaming reply keeps its id
/// for every update, so observers replace rather than append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: EntryId,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Shown locally only: never sent to the assistant nor persisted.
    pub ephemeral: bool,
}

impl Entry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            role,
            text: text.into(),
            created_at: Utc::now(),
            ephemeral: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Appended,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub kind: ChangeKind,
    pub entry: Entry,
}

/// Receives every transcript change, synchronously, in order.
///
/// Called while the transcript is locked: implementations must not call back
/// into the conversation that owns it.
pub trait TranscriptSubscriber: Send + Sync {
    fn notify(&self, event: &TranscriptEvent);
}

/// Forwards events into an unbounded tokio channel.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<TranscriptEvent>,
}

impl ChannelSubscriber {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<TranscriptEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl TranscriptSubscriber for ChannelSubscriber {
    fn notify(&self, event: &TranscriptEvent) {
        // receiver gone means the view went away; nothing left to update
        let _ = self.tx.send(event.clone());
    }
}

#[derive(Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    subscribers: Vec<Arc<dyn TranscriptSubscriber>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sub: Arc<dyn TranscriptSubscriber>) {
        self.subscribers.push(sub);
    }

    pub fn append(&mut self, entry: Entry) -> EntryId {
        let id = entry.id;
        self.entries.push(entry);
        self.publish(ChangeKind::Appended, self.entries.len() - 1);
        id
    }

    /// Set the text of the entry `id`, appending it first if it does not exist
    /// yet. Existing entries only ever grow.
    pub fn upsert(&mut self, id: EntryId, role: Role, text: &str) {
        match self.entries.iter().rposition(|e| e.id == id) {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                debug_assert!(text.starts_with(entry.text.as_str()), "reply text must only grow");
                if entry.text == text {
                    return;
                }
                entry.text.clear();
                entry.text.push_str(text);
                self.publish(ChangeKind::Updated, idx);
            }
            None => {
                let mut entry = Entry::new(role, text);
                entry.id = id;
                self.append(entry);
            }
        }
    }

    /// Seed from persisted history, replacing everything but ephemeral entries.
    /// Observers see one `Appended` per loaded record.
    pub fn load_history(&mut self, records: &[MessageRecord]) {
        self.entries.retain(|e| e.ephemeral);
        for rec in records {
            let mut entry = Entry::new(rec.role, rec.content.clone());
            entry.created_at = rec.created_at;
            self.append(entry);
        }
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Conversation as sent to the assistant endpoint.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| !e.ephemeral && !e.text.is_empty())
            .map(|e| ChatMessage {
                role: e.role,
                content: e.text.clone(),
            })
            .collect()
    }

    fn publish(&self, kind: ChangeKind, idx: usize) {
        if self.subscribers.is_empty() {
            return;
        }
        let event = TranscriptEvent {
            kind,
            entry: self.entries[idx].clone(),
        };
        for sub in &self.subscribers {
            sub.notify(&event);
        }
    }
}

impl fmt::Debug for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcript")
            .field("entries", &self.entries)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
