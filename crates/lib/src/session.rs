//! Chat transcript types: messages, sessions, and the saved-chat list.
//!
//! A session holds an append-only ordered transcript. Insertion order is the
//! only ordering guarantee; timestamps are display-only and never serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a transcript. Serializes as `{"role": ..., "content": ...}`
/// for the backend history snapshot; `sent_at` and `local` stay client-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Display timestamp; not part of the wire format.
    #[serde(skip)]
    pub sent_at: DateTime<Utc>,
    /// Client-local message (the greeting); excluded from history snapshots.
    #[serde(skip)]
    pub local: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sent_at: Utc::now(),
            local: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sent_at: Utc::now(),
            local: false,
        }
    }

    /// Assistant message that exists only on this client (never sent upstream).
    pub fn local_assistant(content: impl Into<String>) -> Self {
        Self {
            local: true,
            ..Self::assistant(content)
        }
    }
}

/// One conversation: optional server-assigned id, display title, transcript.
///
/// A session is "new" until the backend assigns an id on the first successful
/// exchange; that transition happens at most once.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    pub id: Option<String>,
    pub title: Option<String>,
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// True until the backend has assigned an id.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Bind the server-assigned id. Only the first bind takes effect.
    pub fn bind_id(&mut self, id: impl Into<String>) {
        if self.id.is_some() {
            log::warn!("session already has an id, ignoring rebind");
            return;
        }
        self.id = Some(id.into());
    }

    /// Transcript snapshot for the backend: everything except local messages.
    pub fn wire_history(&self) -> Vec<ChatMessage> {
        self.messages.iter().filter(|m| !m.local).cloned().collect()
    }
}

/// Summary entry in the saved-chat sidebar list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
}

/// Cached list of saved chats with at most one selected entry.
#[derive(Debug, Clone, Default)]
pub struct SessionList {
    entries: Vec<SessionSummary>,
    active: Option<String>,
}

impl SessionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[SessionSummary] {
        &self.entries
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn title_of(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.title.as_str())
    }

    /// Newly persisted chats go to the front, matching recency order.
    pub fn insert_front(&mut self, entry: SessionSummary) {
        self.entries.retain(|e| e.id != entry.id);
        self.entries.insert(0, entry);
    }

    /// Mark `id` as the selected entry. No-op when the id is unknown.
    pub fn select(&mut self, id: &str) {
        if self.entries.iter().any(|e| e.id == id) {
            self.active = Some(id.to_string());
        }
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Remove an entry; clears the selection if it pointed at `id`.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        self.entries.len() != before
    }

    /// Replace all entries (a fresh listing from the backend). The selection
    /// is kept only if the selected id is still present.
    pub fn replace(&mut self, entries: Vec<SessionSummary>) {
        self.entries = entries;
        if let Some(active) = self.active.clone() {
            if !self.entries.iter().any(|e| e.id == active) {
                self.active = None;
            }
        }
    }
}

/// Longest title kept before truncation.
pub const TITLE_MAX_CHARS: usize = 30;

/// Derive a sidebar title from the first question: truncated to
/// [`TITLE_MAX_CHARS`] characters with a trailing ellipsis.
pub fn derive_title(question: &str) -> String {
    let question = question.trim();
    if question.chars().count() <= TITLE_MAX_CHARS {
        return question.to_string();
    }
    let truncated: String = question.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", truncated)
}
