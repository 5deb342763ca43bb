//! Think-region filter
//!
//! Splits the raw LLM token stream into dialogue and thinking segments by
//! tracking `<think>`/`</think>` tags across chunk boundaries. Tags may be
//! split between chunks, so the filter carries at most one partial tag
//! prefix (8 bytes) and emits dialogue bytes as soon as they are known to
//! lie outside any tag. Nesting is flat: a second `<think>` inside a
//! thinking region is a no-op, and `</think>` always returns to dialogue.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Classification of a stream segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Dialogue,
    Thinking,
}

/// Carry-over state machine over string chunks
#[derive(Debug)]
pub struct ThinkFilter {
    mode: StreamMode,
    carry: String,
}

impl Default for ThinkFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self {
            mode: StreamMode::Dialogue,
            carry: String::new(),
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Feed one chunk; returns classified segments in stream order.
    /// Adjacent segments always alternate modes.
    pub fn push(&mut self, chunk: &str) -> Vec<(String, StreamMode)> {
        let input = if self.carry.is_empty() {
            chunk.to_string()
        } else {
            let mut s = std::mem::take(&mut self.carry);
            s.push_str(chunk);
            s
        };

        let mut segments: Vec<(String, StreamMode)> = Vec::new();
        let mut pending = String::new();
        let bytes = input.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'<' {
                // Advance to the next '<' or end of input
                let next = input[i..]
                    .find('<')
                    .map(|off| i + off)
                    .unwrap_or(bytes.len());
                pending.push_str(&input[i..next]);
                i = next;
                continue;
            }

            let rest = &input[i..];
            if let Some(tag_len) = match_tag(rest, OPEN_TAG) {
                self.flush_segment(&mut segments, &mut pending);
                self.mode = StreamMode::Thinking;
                i += tag_len;
            } else if let Some(tag_len) = match_tag(rest, CLOSE_TAG) {
                self.flush_segment(&mut segments, &mut pending);
                self.mode = StreamMode::Dialogue;
                i += tag_len;
            } else if is_tag_prefix(rest) {
                // Possible tag split across the chunk boundary; hold it back
                self.flush_segment(&mut segments, &mut pending);
                self.carry = rest.to_string();
                return segments;
            } else {
                // A lone '<' that cannot start a tag is ordinary text
                pending.push('<');
                i += 1;
            }
        }

        self.flush_segment(&mut segments, &mut pending);
        segments
    }

    /// Flush any held-back partial tag as literal text in the current mode
    pub fn finish(&mut self) -> Option<(String, StreamMode)> {
        if self.carry.is_empty() {
            return None;
        }
        Some((std::mem::take(&mut self.carry), self.mode))
    }

    fn flush_segment(&self, segments: &mut Vec<(String, StreamMode)>, pending: &mut String) {
        if pending.is_empty() {
            return;
        }
        let text = std::mem::take(pending);
        match segments.last_mut() {
            Some((last, mode)) if *mode == self.mode => last.push_str(&text),
            _ => segments.push((text, self.mode)),
        }
    }
}

/// If `s` starts with `tag`, return the tag's byte length
fn match_tag(s: &str, tag: &str) -> Option<usize> {
    s.starts_with(tag).then_some(tag.len())
}

/// True when `s` is a proper prefix of either tag (the whole remaining
/// input could still grow into a tag)
fn is_tag_prefix(s: &str) -> bool {
    s.len() < CLOSE_TAG.len() && (OPEN_TAG.starts_with(s) || CLOSE_TAG.starts_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialogue_of(segments: &[(String, StreamMode)]) -> String {
        segments
            .iter()
            .filter(|(_, m)| *m == StreamMode::Dialogue)
            .map(|(t, _)| t.as_str())
            .collect()
    }

    fn thinking_of(segments: &[(String, StreamMode)]) -> String {
        segments
            .iter()
            .filter(|(_, m)| *m == StreamMode::Thinking)
            .map(|(t, _)| t.as_str())
            .collect()
    }

    fn run_chunked(chunks: &[&str]) -> Vec<(String, StreamMode)> {
        let mut filter = ThinkFilter::new();
        let mut all = Vec::new();
        for chunk in chunks {
            all.extend(filter.push(chunk));
        }
        if let Some(tail) = filter.finish() {
            all.push(tail);
        }
        all
    }

    #[test]
    fn test_plain_dialogue_passthrough() {
        let segs = run_chunked(&["hello world"]);
        assert_eq!(dialogue_of(&segs), "hello world");
        assert_eq!(thinking_of(&segs), "");
    }

    #[test]
    fn test_single_think_region() {
        let segs = run_chunked(&["a<think>b</think>c"]);
        assert_eq!(dialogue_of(&segs), "ac");
        assert_eq!(thinking_of(&segs), "b");
    }

    #[test]
    fn test_tag_split_across_chunks() {
        // Seed scenario 1: the open tag straddles the chunk boundary
        let segs = run_chunked(&["hi <thi", "nk>secret</think> there.\n"]);
        assert_eq!(dialogue_of(&segs), "hi  there.\n");
        assert_eq!(thinking_of(&segs), "secret");
    }

    #[test]
    fn test_nested_open_is_flat() {
        let segs = run_chunked(&["<think>a<think>b</think>c"]);
        assert_eq!(thinking_of(&segs), "ab");
        assert_eq!(dialogue_of(&segs), "c");
    }

    #[test]
    fn test_stray_close_returns_to_dialogue() {
        let segs = run_chunked(&["a</think>b"]);
        assert_eq!(dialogue_of(&segs), "ab");
    }

    #[test]
    fn test_lone_angle_bracket_is_text() {
        let segs = run_chunked(&["1 < 2 and 3 <four>"]);
        assert_eq!(dialogue_of(&segs), "1 < 2 and 3 <four>");
    }

    #[test]
    fn test_partial_tag_at_end_is_flushed_as_text() {
        let segs = run_chunked(&["done <thi"]);
        assert_eq!(dialogue_of(&segs), "done <thi");
    }

    #[test]
    fn test_byte_split_equivalence() {
        // Invariant: any chunking of the input classifies the same bytes
        let input = "say <think>plan: 1<2</think> hi <think>x</think>!<done";
        let whole = run_chunked(&[input]);

        let byte_chunks: Vec<String> = input.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = byte_chunks.iter().map(|s| s.as_str()).collect();
        let split = run_chunked(&refs);

        assert_eq!(dialogue_of(&whole), dialogue_of(&split));
        assert_eq!(thinking_of(&whole), thinking_of(&split));
        assert_eq!(dialogue_of(&whole), "say  hi !<done");
    }

    #[test]
    fn test_close_tag_split_across_three_chunks() {
        let segs = run_chunked(&["<think>abc</", "thi", "nk>done."]);
        assert_eq!(thinking_of(&segs), "abc");
        assert_eq!(dialogue_of(&segs), "done.");
    }
}
