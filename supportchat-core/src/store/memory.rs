use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ChatError, CoreResult};
use crate::model::{MessageRecord, Session, UserIdentity};
use crate::store::HistoryStore;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>, // user_id -> latest session
    messages: Vec<MessageRecord>,
}

/// Process-local history. Useful offline and in tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.messages.len()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_session(&self, user: &UserIdentity) -> CoreResult<Session> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .entry(user.user_id.clone())
            .or_insert_with(|| Session {
                id: Uuid::new_v4().to_string(),
                user_id: user.user_id.clone(),
                created_at: Utc::now(),
            });
        Ok(session.clone())
    }

    async fn append_message(&self, user: &UserIdentity, record: &MessageRecord) -> CoreResult<()> {
        if record.user_id != user.user_id {
            return Err(ChatError::Store(format!(
                "message for user {} written by {}",
                record.user_id, user.user_id
            )));
        }
        self.inner.lock().await.messages.push(record.clone());
        Ok(())
    }

    async fn list_messages(&self, user: &UserIdentity, session_id: &str) -> CoreResult<Vec<MessageRecord>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<MessageRecord> = inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && m.user_id == user.user_id)
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }
}
