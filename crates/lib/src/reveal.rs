//! Reply presentation: file-link detection and the typing reveal.
//!
//! Purely derived from transcript content that has already been applied; the
//! controller never waits on any of this. Timers belong to the consumer.

/// Replies starting with this path are downloadable artifacts stored by the
/// backend; they render as a link and are never animated.
pub const FILES_PREFIX: &str = "/files/";

/// Delay of the three-dot typing indicator shown before a reply, in ms.
pub const TYPING_INDICATOR_MS: u64 = 1200;

/// Suggested pause between reveal chunks, in ms.
pub const TYPING_TICK_MS: u64 = 15;

/// How an assistant reply should be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderContent {
    /// Plain text, revealed through the typing animation.
    Text(String),
    /// Downloadable artifact: server path plus the full URL for `origin`.
    FileLink { path: String, url: String },
}

impl RenderContent {
    /// Classify a reply. `origin` is the server base URL used to complete
    /// file links.
    pub fn from_reply(reply: &str, origin: &str) -> Self {
        let trimmed = reply.trim();
        if trimmed.starts_with(FILES_PREFIX) {
            return RenderContent::FileLink {
                path: trimmed.to_string(),
                url: format!("{}{}", origin.trim_end_matches('/'), trimmed),
            };
        }
        RenderContent::Text(reply.to_string())
    }

    pub fn is_file_link(&self) -> bool {
        matches!(self, RenderContent::FileLink { .. })
    }
}

/// Iterator yielding a text reply in fixed-size character chunks for the
/// reveal animation. Chunks concatenate back to the original text.
pub struct TypingReveal {
    chars: Vec<char>,
    pos: usize,
    chunk: usize,
}

impl TypingReveal {
    pub fn new(text: &str) -> Self {
        Self::with_chunk_size(text, 3)
    }

    pub fn with_chunk_size(text: &str, chunk: usize) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            chunk: chunk.max(1),
        }
    }
}

impl Iterator for TypingReveal {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.pos >= self.chars.len() {
            return None;
        }
        let end = (self.pos + self.chunk).min(self.chars.len());
        let out: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        Some(out)
    }
}
