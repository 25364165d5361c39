//! Frame grammar of the assistant reply stream.
//!
//! Contract:
//! - Lines starting with `:` are comments / keep-alives and carry nothing.
//! - Lines starting with `data: ` carry either `[DONE]` or a JSON chunk shaped
//!   `{ "choices": [ { "delta": { "content": "..." } } ] }`.
//! - Blank lines and any other line are ignored.

use std::pin::Pin;

use crate::error::CoreResult;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Raw body chunks as delivered by the transport.
pub type ByteStream =
    Pin<Box<dyn futures_util::stream::Stream<Item = CoreResult<bytes::Bytes>> + Send>>;

/// A reply stream that passed the status and body checks.
pub struct OpenedReply {
    pub body: ByteStream,
    /// Correlation id reported by the endpoint, if any.
    pub upstream_request_id: Option<String>,
}

/// Classification of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Comment,
    Blank,
    /// Payload after the `data: ` prefix, trimmed.
    Data(&'a str),
    Unrecognized,
}

impl<'a> Frame<'a> {
    pub fn classify(line: &'a str) -> Self {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return Self::Blank;
        }
        if line.starts_with(':') {
            return Self::Comment;
        }
        match line.strip_prefix(DATA_PREFIX) {
            Some(payload) => Self::Data(payload.trim()),
            None => Self::Unrecognized,
        }
    }
}

/// What a data frame's payload decoded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Done,
    /// Content of the first choice's delta; `None` when absent (role-only or
    /// finish chunks).
    Delta(Option<String>),
}

impl Payload {
    /// Fails only when the payload is not complete JSON. A well-formed chunk
    /// of any other shape decodes to `Delta(None)`.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        if payload == DONE_SENTINEL {
            return Ok(Self::Done);
        }
        let chunk: serde_json::Value = serde_json::from_str(payload)?;
        let content = chunk["choices"][0]["delta"]["content"]
            .as_str()
            .map(str::to_owned);
        Ok(Self::Delta(content))
    }
}
