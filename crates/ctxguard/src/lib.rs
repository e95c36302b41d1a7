//! Context-window accounting for LLM agent conversations.
//!
//! `ctxguard` answers two questions an agent loop has to ask before every
//! model request:
//!
//! 1. **How many tokens is this conversation?** The
//!    [`estimate_tokens`](context::estimator::estimate_tokens) estimator returns
//!    the authoritative count from the last real API call when one is cached,
//!    and otherwise picks a characters-per-token divisor from the shape of the
//!    content. Tool output and code tokenize far worse than prose, so a flat
//!    four-characters-per-token rule undercounts JSON-heavy histories by a
//!    third or more.
//!
//! 2. **Is it time to compact?** The
//!    [`should_compact`](context::trigger::should_compact) trigger classifies
//!    the usage ratio into [`CompactionDecision::None`],
//!    [`CompactionDecision::Preventive`] (70% of the budget) or
//!    [`CompactionDecision::Forced`] (the hard ceiling).
//!
//! Both are pure functions over a [`Conversation`] snapshot. The
//! [`PreCallGuard`](guard::PreCallGuard) wires them together with a caller
//! supplied [`Compactor`](guard::Compactor), running the preventive check
//! and then the 100% ceiling check on every turn.
//!
//! # Example
//!
//! ```
//! use ctxguard::prelude::*;
//!
//! let mut conversation = Conversation::new();
//! conversation.push(Message::system("You are a coding assistant."));
//! conversation.push(Message::user("Read src/auth.py"));
//! conversation.push(Message::tool(r#"{"name": "auth.py", "content": "def authenticate(): pass"}"#));
//!
//! let estimated = estimate_tokens(&conversation);
//! let decision = should_compact(estimated, 8_000);
//! assert_eq!(decision, CompactionDecision::None);
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Estimator, trigger, usage snapshots, drift tracking, placeholder compaction |
//! | [`conversation`] | Ordered message history with the cached authoritative count |
//! | [`guard`] | Pre-call validation: preventive and forced compaction passes |
//! | [`config`] | [`CompactionConfig`](config::CompactionConfig) and TOML loading |
//! | [`error`] | Crate error type |

pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod guard;
pub mod prelude;

use serde::{Deserialize, Serialize};

pub use context::trigger::CompactionDecision;
pub use conversation::Conversation;
pub use error::{Error, Result};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A single chat message.
///
/// Fields are read through accessors only, so a message cannot change once
/// built; compaction replaces whole messages rather than editing them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    role: MessageRole,
    #[serde(default)]
    content: String,
    /// Token count reported by the provider for this message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exact_token_count: Option<usize>,
}

impl Message {
    /// Create a message with the given role and content.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            exact_token_count: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn exact_token_count(&self) -> Option<usize> {
        self.exact_token_count
    }

    /// Attach a provider-reported token count.
    pub fn with_exact_token_count(mut self, tokens: usize) -> Self {
        self.exact_token_count = Some(tokens);
        self
    }

    /// Length of the content in characters (Unicode scalar values, not bytes).
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}
