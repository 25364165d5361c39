//! Chunk-to-line decoding for the reply stream.
//!
//! Chunk boundaries from the transport are arbitrary: they can fall in the
//! middle of a line or in the middle of a multi-byte character. `Utf8Decoder`
//! carries incomplete UTF-8 sequences across chunks, `LineBuffer` carries
//! incomplete lines.

/// Incremental UTF-8 decoder. Invalid sequences become U+FFFD; an incomplete
/// trailing sequence is held back until the next chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(n) => {
                            out.push('\u{FFFD}');
                            rest = &after[n..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes of an unfinished character still waiting for the next chunk.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }
}

/// Pending-text buffer that hands out complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn push_str(&mut self, s: &str) {
        self.pending.push_str(s);
    }

    /// Remove and return the next complete line, without its `\n` and
    /// without one trailing `\r`. `None` when no delimiter is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let idx = self.pending.find('\n')?;
        let mut line: String = self.pending.drain(..=idx).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    /// Put a line back in front of whatever is still pending.
    pub fn unread_line(&mut self, line: &str) {
        let mut restored = String::with_capacity(line.len() + 1 + self.pending.len());
        restored.push_str(line);
        restored.push('\n');
        restored.push_str(&self.pending);
        self.pending = restored;
    }

    /// True when the buffer holds something besides whitespace.
    pub fn has_content(&self) -> bool {
        !self.pending.trim().is_empty()
    }

    /// Drain the buffer at end of stream.
    pub fn take_remaining(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    pub fn as_str(&self) -> &str {
        &self.pending
    }
}
