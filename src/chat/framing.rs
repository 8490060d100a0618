//! In-band framing for streamed answers.
//!
//! The model is instructed to wrap its output as
//!
//! ```text
//! BODY_START
//!
//! <markdown answer>
//!
//! BODY_END
//!
//! NOT_ENOUGH_CONTEXT=<true|false>
//! ```
//!
//! and this state machine guarantees no byte of the control framing
//! (`BODY_END` or anything after it) is ever forwarded to the client. A
//! fixed lookahead window is held back so a marker straddling two deltas
//! cannot leak, and marker searches only rescan the window around fresh
//! input, keeping the whole pass linear.

use crate::config::STREAM_LOOKAHEAD_CHARS;

pub const BODY_START: &str = "BODY_START";
pub const BODY_END: &str = "BODY_END";
pub const NOT_ENOUGH_CONTEXT_KEY: &str = "NOT_ENOUGH_CONTEXT=";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameState {
    PreBody,
    Body,
    PostBody,
}

/// What the stream said after the body ended.
#[derive(Clone, Debug, Default)]
pub struct FrameOutcome {
    pub needs_more_context: bool,
    /// Raw post-body text, for diagnostics.
    pub trailing: String,
    /// False when the stream never produced a complete `BODY_START`.
    pub saw_body: bool,
}

/// Incremental parser over streamed deltas.
#[derive(Debug)]
pub struct BodyFramer {
    state: FrameState,
    buffer: String,
    side: String,
    lookahead: usize,
    saw_body: bool,
    body_emitted: bool,
}

impl Default for BodyFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyFramer {
    pub fn new() -> Self {
        BodyFramer {
            state: FrameState::PreBody,
            buffer: String::new(),
            side: String::new(),
            lookahead: STREAM_LOOKAHEAD_CHARS,
            saw_body: false,
            body_emitted: false,
        }
    }

    /// Feeds one delta; returns body text now safe to forward.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        let mut emitted = Vec::new();

        match self.state {
            FrameState::PostBody => {
                self.side.push_str(delta);
            }
            FrameState::PreBody => {
                let scan_from = rescan_point(&self.buffer, BODY_START.len());
                self.buffer.push_str(delta);
                if let Some(found) = self.buffer[scan_from..].find(BODY_START) {
                    let body_start = scan_from + found + BODY_START.len();
                    self.buffer.drain(..body_start);
                    self.state = FrameState::Body;
                    self.saw_body = true;
                    self.drain_body(0, &mut emitted);
                }
            }
            FrameState::Body => {
                let scan_from = rescan_point(&self.buffer, BODY_END.len());
                self.buffer.push_str(delta);
                self.drain_body(scan_from, &mut emitted);
            }
        }

        emitted
    }

    fn drain_body(&mut self, mut scan_from: usize, emitted: &mut Vec<String>) {
        // Whitespace separating BODY_START from the answer is framing, not
        // body; drop it until real body text has gone out.
        if !self.body_emitted {
            let trimmed_len = self.buffer.trim_start().len();
            let cut = self.buffer.len() - trimmed_len;
            if cut > 0 {
                self.buffer.drain(..cut);
            }
            scan_from = 0;
        }

        if let Some(found) = self.buffer[scan_from..].find(BODY_END) {
            let end = scan_from + found;
            let body = self.buffer[..end].trim_end();
            if !body.is_empty() {
                emitted.push(body.to_string());
                self.body_emitted = true;
            }
            let trailing = self.buffer[end + BODY_END.len()..].to_string();
            self.side.push_str(&trailing);
            self.buffer.clear();
            self.state = FrameState::PostBody;
            return;
        }

        // Flush everything but the lookahead window.
        let char_count = self.buffer.chars().count();
        if char_count > self.lookahead {
            let keep_from = char_floor(&self.buffer, char_count - self.lookahead);
            let tail = self.buffer.split_off(keep_from);
            let head = std::mem::replace(&mut self.buffer, tail);
            if !head.is_empty() {
                emitted.push(head);
                self.body_emitted = true;
            }
        }
    }

    /// Ends the stream and parses the trailing metadata.
    pub fn finish(self) -> FrameOutcome {
        let needs_more_context = self
            .side
            .split_once(NOT_ENOUGH_CONTEXT_KEY)
            .map(|(_, value)| value.trim().to_lowercase().starts_with("true"))
            .unwrap_or(false);

        FrameOutcome {
            needs_more_context,
            trailing: self.side,
            saw_body: self.saw_body,
        }
    }
}

/// Byte offset to restart a marker search from: far enough back that a
/// marker straddling old and new input is still found, snapped to a char
/// boundary.
fn rescan_point(buffer: &str, marker_len: usize) -> usize {
    char_floor(buffer, buffer.chars().count().saturating_sub(marker_len - 1))
}

/// Byte index of the `n`-th char, snapped to the buffer end.
fn char_floor(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
