//! Tracing helpers for exchanges.
//! Field names live in `keys`; every exchange span declares them up front so
//! `record_*` below can fill them in as the exchange progresses.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use tracing::Span;

/// Span wrapping one send → stream → finalize cycle.
pub fn exchange_span(exchange_id: &str) -> Span {
    tracing::info_span!(
        "exchange",
        exchange.id = exchange_id,
        exchange.state = tracing::field::Empty,
        upstream.req_id = tracing::field::Empty,
        reply.chars = tracing::field::Empty,
        frames.data = tracing::field::Empty,
        frames.ignored = tracing::field::Empty,
        frames.rebuffered = tracing::field::Empty,
        frames.dropped = tracing::field::Empty,
        error.kind = tracing::field::Empty,
    )
}

pub fn record_frames(span: &Span, stats: &FrameStats, reply_chars: usize) {
    span.record(KEY_FRAMES_DATA, stats.data);
    span.record(KEY_FRAMES_IGNORED, stats.ignored());
    span.record(KEY_FRAMES_REBUFFERED, stats.rebuffered);
    span.record(KEY_FRAMES_DROPPED, stats.dropped);
    span.record(KEY_REPLY_CHARS, reply_chars as u64);
}

pub fn record_outcome(span: &Span, state: &str, error_kind: Option<&str>) {
    span.record(KEY_EXCHANGE_STATE, state);
    if let Some(kind) = error_kind {
        span.record(KEY_ERROR_KIND, kind);
    }
}
