//! Online sentence segmentation
//!
//! Accumulates dialogue text and emits complete sentences as soon as a
//! terminator is confirmed. The terminator rule is a pure function over
//! strings so it can be tuned without touching any concurrency code.
//!
//! Extraction is deliberately deferred while a terminator run could still
//! extend (a closing quote or another terminator may follow), which makes
//! the emitted sequence identical whether input arrives in one chunk or
//! byte by byte.

/// Sentence-ending characters (mixed Chinese/ASCII rule)
const TERMINATORS: &[char] = &['。', '！', '？', '；', '…', '.', '!', '?', ';'];

/// Closing quotes/brackets that attach to a preceding terminator
const CLOSERS: &[char] = &[
    '"', '\'', '”', '’', '」', '』', '〉', '》', ')', '）', ']', '】',
];

fn is_terminator(c: char) -> bool {
    TERMINATORS.contains(&c)
}

fn is_closer(c: char) -> bool {
    CLOSERS.contains(&c)
}

fn is_colon(c: char) -> bool {
    c == ':' || c == '：'
}

/// Find the first confirmed sentence boundary in `s`.
///
/// Returns the byte offset one past the end of the extractable sentence
/// (terminator run included), or `None` when no boundary is confirmed yet.
/// A boundary is confirmed only when at least one character follows the
/// terminator run, so a run at the very end of the buffer waits for more
/// input (or for `finish`).
pub fn find_boundary(s: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = s.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i].1;

        if is_terminator(c) {
            // Absorb the run: further terminators and closing quotes
            let mut j = i + 1;
            while j < chars.len() && (is_terminator(chars[j].1) || is_closer(chars[j].1)) {
                j += 1;
            }
            if j < chars.len() {
                return Some(chars[j].0);
            }
            return None;
        }

        if is_colon(c) && i + 1 < chars.len() && chars[i + 1].1 == '\n' {
            return Some(chars[i + 1].0);
        }

        if c == '\n' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].1 == '\n' {
                j += 1;
            }
            if j - i >= 2 {
                if j < chars.len() {
                    return Some(chars[j].0);
                }
                return None;
            }
            i = j;
            continue;
        }

        i += 1;
    }
    None
}

/// True when the candidate is nothing but terminators, closers, and
/// whitespace (such lines are dropped, not spoken)
pub fn is_terminator_only(s: &str) -> bool {
    s.chars()
        .all(|c| is_terminator(c) || is_closer(c) || is_colon(c) || c.is_whitespace())
}

/// Streaming sentence accumulator
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buf: String,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append dialogue text; returns every sentence completed by it
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buf.push_str(text);
        let mut out = Vec::new();

        while let Some(end) = find_boundary(&self.buf) {
            let raw: String = self.buf.drain(..end).collect();
            let trimmed = raw.trim();
            if !trimmed.is_empty() && !is_terminator_only(trimmed) {
                out.push(trimmed.to_string());
            }
        }
        out
    }

    /// Flush the trailing partial sentence, if any
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buf);
        let trimmed = raw.trim();
        if trimmed.is_empty() || is_terminator_only(trimmed) {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Text currently held without a confirmed boundary
    pub fn pending(&self) -> &str {
        &self.buf
    }
}
