use unicode_normalization::UnicodeNormalization;

use crate::error::{ChatError, CoreResult};

/// Longest outbound message accepted, in chars.
pub const MAX_MESSAGE_CHARS: usize = 8_000;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean what the user typed before it enters the transcript.
/// Blank input is rejected; callers treat that as "nothing to send".
pub fn normalize_outbound(text: &str) -> CoreResult<String> {
    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return Err(ChatError::Validation("message is empty".into()));
    }
    if cleaned.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::Validation(format!(
            "message exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(cleaned)
}
