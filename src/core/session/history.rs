//! Bounded conversation history.
//!
//! Single-writer: only the session supervisor mutates the store. Readers
//! get a snapshot copy for prompt construction. The lock is a plain mutex
//! and is never held across an await point.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::core::llm::{ChatMessage, Role};

/// Oldest entries are discarded beyond this many.
pub const HISTORY_LIMIT: usize = 64;

pub struct HistoryStore {
    entries: Mutex<VecDeque<ChatMessage>>,
    limit: usize,
}

impl HistoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            limit,
        }
    }

    /// Record a user transcript. When the newest entry is already a user
    /// entry (the assistant reply in between was barged and discarded), the
    /// text is merged into it so roles keep strictly alternating.
    pub fn push_user(&self, text: &str) {
        let mut entries = self.entries.lock();
        match entries.back_mut() {
            Some(last) if last.role == Role::User => {
                last.content.push(' ');
                last.content.push_str(text);
            }
            _ => {
                entries.push_back(ChatMessage::user(text));
                Self::truncate(&mut entries, self.limit);
            }
        }
    }

    /// Commit a completed assistant reply. Callers only pass fully
    /// accumulated turn text; drafts of cancelled turns never reach here.
    pub fn commit_assistant(&self, text: &str) {
        let mut entries = self.entries.lock();
        entries.push_back(ChatMessage::assistant(text));
        Self::truncate(&mut entries, self.limit);
    }

    /// Stable copy for LLM prompt construction.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn truncate(entries: &mut VecDeque<ChatMessage>, limit: usize) {
        while entries.len() > limit {
            entries.pop_front();
        }
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}
