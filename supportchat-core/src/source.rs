use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CoreResult;
use crate::model::ChatMessage;
use crate::stream::OpenedReply;

/// Where assistant replies come from.
///
/// `open` resolves once the endpoint has accepted the request; connection
/// failures, non-2xx statuses and empty bodies are errors here. Failures
/// while reading come through as `Err` items of the body stream.
#[async_trait]
pub trait ReplySource: Send + Sync {
    fn name(&self) -> &str;
    async fn open(&self, messages: &[ChatMessage], exchange_id: &str) -> CoreResult<OpenedReply>;
}

/// Canned reply used offline (no backend configured).
/// Streams one fixed supportive message framed exactly like the real endpoint.
pub struct CannedSource {
    reply: String,
    chunk_size: usize,
}

pub const CANNED_REPLY: &str =
    "Gracias por compartir. Estoy aquí para escucharte y apoyarte. Tómate tu tiempo.";

impl CannedSource {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            chunk_size: 16,
        }
    }

    /// Encode the reply as `data:` frames, one per word, plus `[DONE]`.
    fn body(&self) -> String {
        let mut out = String::from(": canned\n");
        for word in self.reply.split_inclusive(' ') {
            let frame = serde_json::json!({"choices": [{"delta": {"content": word}}]});
            out.push_str("data: ");
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out.push_str("data: [DONE]\n");
        out
    }
}

impl Default for CannedSource {
    fn default() -> Self {
        Self::new(CANNED_REPLY)
    }
}

#[async_trait]
impl ReplySource for CannedSource {
    fn name(&self) -> &str {
        "canned"
    }

    async fn open(&self, _messages: &[ChatMessage], _exchange_id: &str) -> CoreResult<OpenedReply> {
        // fixed-size chunks: frames straddle chunk boundaries like on the wire
        let chunks: Vec<CoreResult<Bytes>> = self
            .body()
            .into_bytes()
            .chunks(self.chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(OpenedReply {
            body: Box::pin(futures::stream::iter(chunks)),
            upstream_request_id: None,
        })
    }
}
