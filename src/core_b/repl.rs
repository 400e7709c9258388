//! USB-CDC REPL line framing and the Core A/B command mailbox (spec.md §6
//! "REPL framing", §3 "Shared mailbox"). The raw byte transport and the
//! general expression grammar are named as external collaborators in
//! spec.md §1; what lives here is the part spec.md still assigns to this
//! engine: turning a byte stream into discrete lines (honoring backspace,
//! escape-to-abort, and the triple-backtick multiline fence) and handing
//! one command across the single-slot mailbox at a time, grounded on
//! `original_source/releases/41_blackbird/lib/mailbox.c`.

use crate::error::ReplError;
use core::sync::atomic::{AtomicBool, Ordering};
use heapless::String;

pub const MAX_LINE_LEN: usize = 128;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const ESCAPE: u8 = 0x1b;
const FENCE: &[u8] = b"```";

/// A single command slot shared between the REPL's line assembler (Core B)
/// and whichever side consumes it. `mailbox.c`'s handshake is two flags:
/// the producer sets `ready`, the consumer clears it once it has copied the
/// payload out; a second write before the first is consumed is rejected
/// rather than silently overwritten, matching spec.md's "single in-flight
/// command" invariant.
pub struct Mailbox<T> {
    slot: Option<T>,
    ready: AtomicBool,
}

impl<T> Mailbox<T> {
    pub const fn new() -> Self {
        Self {
            slot: None,
            ready: AtomicBool::new(false),
        }
    }

    /// Deposit a command. Fails with `MailboxBusy` if the previous one
    /// hasn't been taken yet.
    pub fn post(&mut self, value: T) -> Result<(), ReplError> {
        if self.ready.load(Ordering::Acquire) {
            return Err(ReplError::MailboxBusy);
        }
        self.slot = Some(value);
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Take the pending command, if any, clearing the slot.
    pub fn take(&mut self) -> Option<T> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let v = self.slot.take();
        self.ready.store(false, Ordering::Release);
        v
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One line ready for the parser, or a control event the line assembler
/// recognized on its own (spec.md §6).
#[derive(Debug, PartialEq, Eq)]
pub enum Framed {
    Line(String<MAX_LINE_LEN>),
    /// The script host sent ESC: abort whatever multiline capture is
    /// in-flight and discard the partial buffer.
    Aborted,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Line,
    /// Inside a triple-backtick fence: newlines are captured verbatim into
    /// the line buffer instead of ending it.
    Multiline,
}

/// Byte-at-a-time line assembler. One instance per REPL transport.
pub struct LineAssembler {
    buf: String<MAX_LINE_LEN>,
    mode: Mode,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buf: String::new(),
            mode: Mode::Line,
        }
    }

    fn ends_with_fence(&self) -> bool {
        self.buf.as_bytes().ends_with(FENCE)
    }

    /// Feed one byte. Returns `Some` when a full line (or an abort) is
    /// ready; `None` while still accumulating.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Framed>, ReplError> {
        if byte == ESCAPE {
            self.buf.clear();
            self.mode = Mode::Line;
            return Ok(Some(Framed::Aborted));
        }
        if byte == BACKSPACE || byte == DELETE {
            self.buf.pop();
            return Ok(None);
        }

        let is_terminator = matches!(byte, b'\n' | b'\r' | 0);
        if is_terminator && self.mode == Mode::Line {
            if self.buf.as_str() == "```" {
                // Opening fence on its own line: switch to multiline and
                // keep accumulating (the fence text itself is discarded).
                self.buf.clear();
                self.mode = Mode::Multiline;
                return Ok(None);
            }
            if self.buf.is_empty() {
                return Ok(None);
            }
            let mut line = String::new();
            line.push_str(self.buf.as_str()).map_err(|_| ReplError::ChunkTooLong)?;
            self.buf.clear();
            return Ok(Some(Framed::Line(line)));
        }

        if is_terminator && self.mode == Mode::Multiline {
            if self.ends_with_fence() {
                let close_at = self.buf.len() - FENCE.len();
                let body = &self.buf.as_str()[..close_at];
                let mut line = String::new();
                line.push_str(body).map_err(|_| ReplError::ChunkTooLong)?;
                self.buf.clear();
                self.mode = Mode::Line;
                return Ok(Some(Framed::Line(line)));
            }
            self.buf.push('\n').map_err(|_| ReplError::ChunkTooLong)?;
            return Ok(None);
        }

        self.buf.push(byte as char).map_err(|_| ReplError::ChunkTooLong)?;
        Ok(None)
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(a: &mut LineAssembler, s: &str) -> heapless::Vec<Framed, 8> {
        let mut out = heapless::Vec::new();
        for b in s.bytes() {
            if let Some(f) = a.feed(b).unwrap() {
                let _ = out.push(f);
            }
        }
        out
    }

    #[test]
    fn single_line_terminated_by_newline() {
        let mut a = LineAssembler::new();
        let frames = feed_all(&mut a, "output[1].volts = 3.0\n");
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Framed::Line(l) => assert_eq!(l.as_str(), "output[1].volts = 3.0"),
            _ => panic!("expected line"),
        }
    }

    #[test]
    fn backspace_erases_last_character() {
        let mut a = LineAssembler::new();
        let frames = feed_all(&mut a, "abcx\u{8}\n");
        match &frames[0] {
            Framed::Line(l) => assert_eq!(l.as_str(), "abc"),
            _ => panic!("expected line"),
        }
    }

    #[test]
    fn escape_aborts_and_clears_buffer() {
        let mut a = LineAssembler::new();
        let frames = feed_all(&mut a, "partial\u{1b}");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], Framed::Aborted);
        let frames2 = feed_all(&mut a, "fresh\n");
        match &frames2[0] {
            Framed::Line(l) => assert_eq!(l.as_str(), "fresh"),
            _ => panic!("expected line"),
        }
    }

    #[test]
    fn triple_backtick_fence_captures_multiline_body() {
        let mut a = LineAssembler::new();
        let frames = feed_all(&mut a, "```\nfunction()\nend\n```\n");
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Framed::Line(l) => assert_eq!(l.as_str(), "function()\nend"),
            _ => panic!("expected one fenced line"),
        }
    }

    #[test]
    fn mailbox_rejects_second_post_before_take() {
        let mut mbox: Mailbox<u32> = Mailbox::new();
        mbox.post(1).unwrap();
        assert!(matches!(mbox.post(2), Err(ReplError::MailboxBusy)));
        assert_eq!(mbox.take(), Some(1));
        assert_eq!(mbox.take(), None);
        mbox.post(3).unwrap();
        assert_eq!(mbox.take(), Some(3));
    }
}
