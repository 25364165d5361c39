/// Span/Log field names for exchanges.
/// Keep these stable; they are what log queries filter on.
pub const KEY_EXCHANGE_ID: &str = "exchange.id";
pub const KEY_EXCHANGE_STATE: &str = "exchange.state";
pub const KEY_UPSTREAM_REQUEST_ID: &str = "upstream.req_id"; // request id returned by the endpoint, if any

pub const KEY_REPLY_CHARS: &str = "reply.chars";
pub const KEY_FRAMES_DATA: &str = "frames.data";
pub const KEY_FRAMES_IGNORED: &str = "frames.ignored";
pub const KEY_FRAMES_REBUFFERED: &str = "frames.rebuffered";
pub const KEY_FRAMES_DROPPED: &str = "frames.dropped";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
