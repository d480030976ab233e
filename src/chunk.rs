//! Splitting long outbound text into messages the service will accept.
//!
//! A message may hold at most [`ChunkLimits::max_chars`] characters and
//! [`ChunkLimits::max_lines`] newlines. Longer text is cut, in order of
//! preference:
//!
//! 1. right after the `max_lines`-th newline, when the window has too many lines;
//! 2. at the last newline in the window (the newline is consumed);
//! 3. at the last whitespace or punctuation/bracket in the window (consumed);
//! 4. hard, at exactly `max_chars` characters.
//!
//! Characters are Unicode scalar values, so cuts always land on UTF-8
//! boundaries.

use crate::constants::{MAX_MESSAGE_CHARS, MAX_MESSAGE_LINES};

/// Punctuation and brackets that make acceptable word breaks.
const BREAK_PUNCTUATION: &str = ".,/\\-(){}[]|=+*&";

/// Per-message size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Maximum characters per message (at least 1).
    pub max_chars: usize,
    /// Maximum newlines per message.
    pub max_lines: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_chars: MAX_MESSAGE_CHARS,
            max_lines: MAX_MESSAGE_LINES,
        }
    }
}

impl ChunkLimits {
    /// Whether `text` can be sent as a single message.
    pub fn fits(&self, text: &str) -> bool {
        newlines(text) <= self.max_lines && text.chars().count() <= self.max_chars.max(1)
    }
}

/// One cut: the text to send and the separator consumed after it, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'a> {
    /// Text of this message (possibly empty).
    pub text: &'a str,
    /// Boundary character dropped between this message and the rest.
    pub consumed: Option<char>,
    /// Bytes of input covered, including `consumed`.
    len: usize,
}

impl<'a> Split<'a> {
    fn new(rest: &'a str, end: usize, consumed: Option<char>) -> Self {
        let len = end + consumed.map_or(0, char::len_utf8);
        Self {
            text: &rest[..end],
            consumed,
            len,
        }
    }
}

/// Choose the first cut of a non-empty `rest`.
pub fn split_first(rest: &str, limits: ChunkLimits) -> Split<'_> {
    let max_chars = limits.max_chars.max(1);

    let window_end = rest
        .char_indices()
        .nth(max_chars)
        .map_or(rest.len(), |(i, _)| i);
    let window = &rest[..window_end];
    let window_lines = newlines(window);

    if window_end == rest.len() && window_lines <= limits.max_lines {
        return Split::new(rest, rest.len(), None);
    }

    if window_lines > limits.max_lines {
        if limits.max_lines == 0 {
            let first = window.find('\n').unwrap_or(window_end);
            return Split::new(rest, first, Some('\n'));
        }
        // Window holds more than max_lines newlines, so the nth exists.
        let after_nth = window
            .match_indices('\n')
            .nth(limits.max_lines - 1)
            .map_or(window_end, |(i, _)| i + 1);
        return Split::new(rest, after_nth, None);
    }

    if let Some(i) = window.rfind('\n') {
        return Split::new(rest, i, Some('\n'));
    }

    if let Some(i) = window.rfind(is_break) {
        let c = window[i..].chars().next().unwrap_or(' ');
        return Split::new(rest, i, Some(c));
    }

    Split::new(rest, window_end, None)
}

fn is_break(c: char) -> bool {
    c.is_whitespace() || BREAK_PUNCTUATION.contains(c)
}

fn newlines(text: &str) -> usize {
    text.bytes().filter(|&b| b == b'\n').count()
}

/// Iterator over the non-empty messages `text` splits into.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a str,
    limits: ChunkLimits,
}

/// Split `text` into messages within `limits`.
pub fn chunks(text: &str, limits: ChunkLimits) -> Chunks<'_> {
    Chunks { rest: text, limits }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        while !self.rest.is_empty() {
            let split = split_first(self.rest, self.limits);
            self.rest = &self.rest[split.len..];
            if !split.text.is_empty() {
                return Some(split.text);
            }
        }
        None
    }
}
