use serde::Serialize;

/// Per-exchange frame counters kept by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct FrameStats {
    /// Data frames that decoded (including `[DONE]`).
    pub data: u32,
    pub comments: u32,
    pub blank: u32,
    pub unrecognized: u32,
    /// Data frames whose JSON failed to parse and were pushed back for more input.
    pub rebuffered: u32,
    /// Malformed frames still pending when the stream ended.
    pub dropped: u32,
    /// Non-empty content deltas appended to the reply.
    pub deltas: u32,
}

impl FrameStats {
    pub fn ignored(&self) -> u32 {
        self.comments + self.blank + self.unrecognized
    }
}
