use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::error::{ChatError, CoreResult};
use crate::model::{ChatMessage, MessageRecord, Session, UserIdentity};
use crate::source::ReplySource;
use crate::store::HistoryStore;
use crate::stream::OpenedReply;

/// One `data:` line carrying a content delta.
pub fn data_frame(content: &str) -> String {
    let chunk = serde_json::json!({"choices": [{"delta": {"content": content}}]});
    format!("data: {chunk}\n")
}

/// What the next `open` call produces.
pub enum Scripted {
    /// Body items delivered in order, then end of stream.
    Body(Vec<CoreResult<Bytes>>),
    /// Body items delivered in order, then the stream never ends.
    Hang(Vec<Bytes>),
    /// `open` itself fails.
    Fail(ChatError),
}

impl Scripted {
    pub fn body(chunks: &[&str]) -> Self {
        Self::Body(chunks.iter().map(|c| Ok(Bytes::from(c.to_string()))).collect())
    }

    pub fn hang(chunks: &[&str]) -> Self {
        Self::Hang(chunks.iter().map(|c| Bytes::from(c.to_string())).collect())
    }
}

/// Reply source that plays back queued scripts and records what it was sent.
pub struct ScriptedSource {
    scripts: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedSource {
    pub fn new(scripts: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplySource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, messages: &[ChatMessage], _exchange_id: &str) -> CoreResult<OpenedReply> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let next = self.scripts.lock().unwrap().pop_front();
        let body: crate::stream::ByteStream = match next {
            Some(Scripted::Body(items)) => Box::pin(futures::stream::iter(items)),
            Some(Scripted::Hang(chunks)) => Box::pin(
                futures::stream::iter(chunks.into_iter().map(Ok)).chain(futures::stream::pending()),
            ),
            Some(Scripted::Fail(e)) => return Err(e),
            None => return Err(ChatError::Other(anyhow::anyhow!("no script left"))),
        };
        Ok(OpenedReply {
            body,
            upstream_request_id: None,
        })
    }
}

/// Store that hands out sessions but refuses every write.
pub struct FailingStore;

#[async_trait]
impl HistoryStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn ensure_session(&self, user: &UserIdentity) -> CoreResult<Session> {
        Ok(Session {
            id: "s-failing".into(),
            user_id: user.user_id.clone(),
            created_at: chrono::Utc::now(),
        })
    }

    async fn append_message(&self, _user: &UserIdentity, _record: &MessageRecord) -> CoreResult<()> {
        Err(ChatError::Store("write refused".into()))
    }

    async fn list_messages(&self, _user: &UserIdentity, _session_id: &str) -> CoreResult<Vec<MessageRecord>> {
        Ok(Vec::new())
    }
}
