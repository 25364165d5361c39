//! Chat history persistence.
//!
//! The store is a plain CRUD collaborator: sessions keyed by user, messages
//! appended and read back in creation order. `Conversation` owns a handle to
//! one and only calls it when a signed-in user is attached.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::CoreResult;
use crate::model::{MessageRecord, Role, Session, UserIdentity};

pub use memory::MemoryStore;
pub use rest::RestStore;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    fn name(&self) -> &str;

    /// Latest session of this user, created if none exists.
    async fn ensure_session(&self, user: &UserIdentity) -> CoreResult<Session>;

    async fn append_message(&self, user: &UserIdentity, record: &MessageRecord) -> CoreResult<()>;

    /// Messages of a session, oldest first.
    async fn list_messages(&self, user: &UserIdentity, session_id: &str) -> CoreResult<Vec<MessageRecord>>;
}

/// Build the record for one message of `session`, stamped now.
pub fn new_record(session: &Session, role: Role, content: &str) -> MessageRecord {
    MessageRecord {
        session_id: session.id.clone(),
        user_id: session.user_id.clone(),
        role,
        content: content.to_string(),
        created_at: Utc::now(),
    }
}
