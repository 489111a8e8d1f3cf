//! Bounded conversation history
//!
//! The system message is set at session start and never evicted. User and
//! assistant turns are appended as pairs and the oldest pairs are evicted
//! first when either the turn bound or the token bound is exceeded.
//! Only the event loop mutates this type.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Rough token estimate: ~4 grapheme clusters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.graphemes(true).count().max(1) / 4 + 1
}

/// History bounds. A "turn" is one user/assistant pair.
#[derive(Debug, Clone, Copy)]
pub struct HistoryLimits {
    pub max_turns: usize,
    pub max_tokens: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_turns: 16,
            max_tokens: 4096,
        }
    }
}

/// Ordered (role, text) sequence with a pinned system message.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    system: Option<String>,
    messages: Vec<(Role, String)>,
    limits: HistoryLimits,
}

impl ConversationHistory {
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            system: None,
            messages: Vec::new(),
            limits,
        }
    }

    /// Set the system message. Called once at session start.
    pub fn set_system(&mut self, text: impl Into<String>) {
        self.system = Some(text.into());
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Append a completed turn: the user's final transcript and the
    /// assistant's assembled text (possibly a prefix, after a barge-in).
    pub fn push_turn(&mut self, user_text: &str, assistant_text: &str) {
        self.messages.push((Role::User, user_text.to_string()));
        self.messages
            .push((Role::Assistant, assistant_text.to_string()));
        self.evict();
    }

    /// Full sequence including the system message, oldest first.
    pub fn messages(&self) -> Vec<(Role, String)> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(ref system) = self.system {
            out.push((Role::System, system.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Number of user/assistant pairs currently retained.
    pub fn turn_count(&self) -> usize {
        self.messages.len() / 2
    }

    fn token_count(&self) -> usize {
        self.messages
            .iter()
            .map(|(_, text)| estimate_tokens(text))
            .sum()
    }

    fn evict(&mut self) {
        while self.turn_count() > self.limits.max_turns
            || (self.token_count() > self.limits.max_tokens && self.turn_count() > 1)
        {
            // Oldest pair first; the system message lives outside `messages`
            // and is never touched.
            self.messages.drain(0..2.min(self.messages.len()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_survives_eviction() {
        let mut history = ConversationHistory::new(HistoryLimits {
            max_turns: 2,
            max_tokens: 4096,
        });
        history.set_system("you are a helpful assistant");

        for i in 0..5 {
            history.push_turn(&format!("question {i}"), &format!("answer {i}"));
        }

        assert_eq!(history.turn_count(), 2);
        let messages = history.messages();
        assert_eq!(messages[0].0, Role::System);
        // Oldest turns evicted first
        assert_eq!(messages[1].1, "question 3");
    }

    #[test]
    fn test_token_bound_evicts_oldest_pairs() {
        let mut history = ConversationHistory::new(HistoryLimits {
            max_turns: 100,
            max_tokens: 50,
        });
        let long = "word ".repeat(40);
        history.push_turn(&long, &long);
        history.push_turn("short", "reply");

        // The first oversized pair must be gone, the latest retained
        assert_eq!(history.turn_count(), 1);
        assert_eq!(history.messages()[0].1, "short");
    }

    #[test]
    fn test_latest_turn_retained_even_if_over_budget() {
        let mut history = ConversationHistory::new(HistoryLimits {
            max_turns: 16,
            max_tokens: 4,
        });
        let long = "word ".repeat(40);
        history.push_turn(&long, &long);
        assert_eq!(history.turn_count(), 1);
    }

    #[test]
    fn test_estimate_tokens_monotonic() {
        assert!(estimate_tokens("a few words here") < estimate_tokens(&"many ".repeat(50)));
    }
}
