//! Splits the LLM token stream into synthesizer-ready segments and detects
//! the in-band hangup sentinel.
//!
//! The extractor keeps one rolling buffer of unsegmented text. Sentinel
//! detection always scans the whole buffer, never individual tokens, so a
//! sentinel split across token boundaries cannot slip through. A buffer
//! tail that could still grow into the sentinel is withheld from both
//! segmentation and client token forwarding until it either completes or a
//! non-matching character resolves it back into ordinary text.

/// Literal token ending the call, matched ASCII case-insensitively.
pub const HANGUP_SENTINEL: &str = "[HANGUP]";

/// Maximum characters per synthesized segment.
pub const SEGMENT_CHAR_BUDGET: usize = 250;

/// One synthesizer-bound slice of the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// True only on the last segment of a turn that ends in a hangup.
    pub is_final: bool,
}

/// Result of feeding one token into the extractor.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Text newly safe to forward to the client as `llm_token` content.
    /// Concatenated over a turn this equals the token stream minus the
    /// sentinel and everything after it.
    pub cleared: String,
    /// Segments ready for synthesis, in order.
    pub segments: Vec<Segment>,
    /// The sentinel was detected; the LLM stream should be cancelled.
    pub hangup: bool,
}

pub struct SegmentExtractor {
    /// Unsegmented text; segments drain from the front.
    buf: String,
    /// Byte offset into `buf` already released as cleared text.
    cleared_to: usize,
    /// Set after hangup detection or `finish`; further input is ignored.
    done: bool,
}

impl SegmentExtractor {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            cleared_to: 0,
            done: false,
        }
    }

    /// Append one LLM token and extract whatever it unlocks.
    pub fn push(&mut self, token: &str) -> PushOutcome {
        if self.done {
            return PushOutcome::default();
        }
        self.buf.push_str(token);

        if let Some(at) = find_sentinel(&self.buf) {
            self.done = true;
            let cleared = self.buf[self.cleared_to.min(at)..at].to_string();
            let closing = strip_partial_sentinel(self.buf[..at].trim_end())
                .trim_end()
                .to_string();
            self.buf.clear();
            self.cleared_to = 0;
            return PushOutcome {
                cleared,
                // Empty closing text still produces the final marker: the
                // client needs its `segment_done` even with no audio.
                segments: vec![Segment {
                    text: closing,
                    is_final: true,
                }],
                hangup: true,
            };
        }

        // Everything before a possible sentinel prefix at the tail is safe.
        let held = partial_sentinel_suffix(&self.buf);
        let mut safe_end = self.buf.len() - held;
        let cleared = if safe_end > self.cleared_to {
            let text = self.buf[self.cleared_to..safe_end].to_string();
            self.cleared_to = safe_end;
            text
        } else {
            String::new()
        };

        let mut segments = Vec::new();
        while let Some(cut) = next_boundary(&self.buf[..safe_end]) {
            segments.push(Segment {
                text: self.buf[..cut].to_string(),
                is_final: false,
            });
            self.buf.drain(..cut);
            safe_end -= cut;
            self.cleared_to -= cut;
        }

        PushOutcome {
            cleared,
            segments,
            hangup: false,
        }
    }

    /// Close the stream: release any withheld tail as ordinary text and
    /// flush the residual buffer as one sub-threshold segment.
    pub fn finish(&mut self) -> (String, Option<Segment>) {
        if self.done {
            return (String::new(), None);
        }
        self.done = true;
        let cleared = self.buf[self.cleared_to..].to_string();
        let residual = self.buf.trim();
        let segment = (!residual.is_empty()).then(|| Segment {
            text: residual.to_string(),
            is_final: false,
        });
        self.buf.clear();
        self.cleared_to = 0;
        (cleared, segment)
    }
}

impl Default for SegmentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of the first complete sentinel, if any. The sentinel is pure
/// ASCII, so any byte match starts at a char boundary.
fn find_sentinel(haystack: &str) -> Option<usize> {
    let needle = HANGUP_SENTINEL.as_bytes();
    let bytes = haystack.as_bytes();
    if bytes.len() < needle.len() {
        return None;
    }
    (0..=bytes.len() - needle.len())
        .find(|&i| bytes[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Length in bytes of the longest buffer suffix that is a proper prefix of
/// the sentinel; that much must be withheld until it resolves.
fn partial_sentinel_suffix(haystack: &str) -> usize {
    let needle = HANGUP_SENTINEL.as_bytes();
    let bytes = haystack.as_bytes();
    let max = (needle.len() - 1).min(bytes.len());
    (1..=max)
        .rev()
        .find(|&k| bytes[bytes.len() - k..].eq_ignore_ascii_case(&needle[..k]))
        .unwrap_or(0)
}

fn strip_partial_sentinel(text: &str) -> &str {
    let k = partial_sentinel_suffix(text);
    &text[..text.len() - k]
}

/// Where to cut the next segment out of `region`, in bytes: after the
/// rightmost sentence-ending punctuation within the character budget, or at
/// the budget boundary when the region holds a full budget with no
/// punctuation. `None` means wait for more text.
fn next_boundary(region: &str) -> Option<usize> {
    let mut chars_seen = 0;
    let mut window_end = 0;
    let mut boundary = None;
    for (idx, ch) in region.char_indices() {
        if chars_seen == SEGMENT_CHAR_BUDGET {
            break;
        }
        chars_seen += 1;
        window_end = idx + ch.len_utf8();
        if matches!(ch, '.' | '!' | '?' | '…') {
            boundary = Some(window_end);
        }
    }
    boundary.or((chars_seen == SEGMENT_CHAR_BUDGET).then_some(window_end))
}
