//! Reassembles one assistant reply from the chunked reply stream.
//!
//! Contract:
//! - The reply only grows: every non-empty delta is appended in arrival order.
//! - `on_update` receives the full reply text after each appended delta.
//! - Once `[DONE]` is seen, nothing else is processed, including lines that
//!   are already buffered.
//! - A data frame whose JSON does not parse is pushed back in front of the
//!   buffer and the pass stops until more input arrives. If the stream ends
//!   while such a frame is still pending it is dropped.

use crate::decoder::{LineBuffer, Utf8Decoder};
use crate::stream::{Frame, Payload};
use crate::telemetry::FrameStats;

/// Whether the stream may continue after a `feed` / `finish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Done,
}

#[derive(Debug, Default)]
pub struct ReplyAssembler {
    utf8: Utf8Decoder,
    lines: LineBuffer,
    reply: String,
    done: bool,
    stats: FrameStats,
    /// Line last pushed back; already counted when it comes around again.
    retry: Option<String>,
}

impl ReplyAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one transport chunk.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_update: F) -> Progress
    where
        F: FnMut(&str),
    {
        if self.done {
            return Progress::Done;
        }
        let text = self.utf8.decode(chunk);
        self.lines.push_str(&text);

        let mut retry = self.retry.take();
        while let Some(line) = self.lines.next_line() {
            let repeat = retry.take().is_some_and(|r| r == line);
            let payload = match self.data_payload(&line, !repeat) {
                Some(p) => p,
                None => continue,
            };
            match Payload::parse(payload) {
                Ok(Payload::Done) => {
                    self.done = true;
                    break;
                }
                Ok(Payload::Delta(content)) => self.append(content, &mut on_update),
                Err(e) => {
                    if !repeat {
                        tracing::debug!(error = %e, len = line.len(), "incomplete data frame, waiting for more input");
                        self.stats.rebuffered += 1;
                    }
                    self.lines.unread_line(&line);
                    self.retry = Some(line);
                    break;
                }
            }
        }

        self.progress()
    }

    /// Transport ended: run whatever is still buffered through the classifier.
    pub fn finish<F>(&mut self, mut on_update: F) -> Progress
    where
        F: FnMut(&str),
    {
        if self.done {
            return Progress::Done;
        }
        if self.lines.has_content() {
            let tail = self.lines.take_remaining();
            let mut retry = self.retry.take();
            for raw in tail.split('\n').filter(|l| !l.is_empty()) {
                let repeat = retry.take().is_some_and(|r| r == raw);
                let payload = match self.data_payload(raw, !repeat) {
                    Some(p) => p,
                    None => continue,
                };
                match Payload::parse(payload) {
                    Ok(Payload::Done) => break,
                    Ok(Payload::Delta(content)) => self.append(content, &mut on_update),
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed trailing frame");
                        self.stats.dropped += 1;
                    }
                }
            }
        }
        self.done = true;
        Progress::Done
    }

    pub fn text(&self) -> &str {
        &self.reply
    }

    pub fn into_text(self) -> String {
        self.reply
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    fn progress(&self) -> Progress {
        if self.done {
            Progress::Done
        } else {
            Progress::Continue
        }
    }

    /// Classify a line, counting it unless `count` is false; returns the
    /// payload for data frames only.
    fn data_payload<'l>(&mut self, line: &'l str, count: bool) -> Option<&'l str> {
        let frame = Frame::classify(line);
        if !count {
            return match frame {
                Frame::Data(payload) => Some(payload),
                _ => None,
            };
        }
        match frame {
            Frame::Data(payload) => {
                self.stats.data += 1;
                Some(payload)
            }
            Frame::Comment => {
                self.stats.comments += 1;
                None
            }
            Frame::Blank => {
                self.stats.blank += 1;
                None
            }
            Frame::Unrecognized => {
                self.stats.unrecognized += 1;
                None
            }
        }
    }

    fn append<F>(&mut self, content: Option<String>, on_update: &mut F)
    where
        F: FnMut(&str),
    {
        if let Some(delta) = content.filter(|c| !c.is_empty()) {
            self.reply.push_str(&delta);
            self.stats.deltas += 1;
            on_update(&self.reply);
        }
    }
}
