//! Ordered conversation history.
//!
//! A [`Conversation`] is append-only from the agent loop's point of view. The
//! one other mutation is compaction, which swaps a contiguous run of
//! messages for a single summary message at the position of the earliest
//! removed message.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::{Message, MessageRole};

/// Conversation snapshot handed to the estimator and the trigger.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
    /// Input token count reported by the most recent real API call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_api_input_tokens: Option<usize>,
}

impl Conversation {
    /// Create an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
            last_api_input_tokens: None,
        }
    }

    /// Parse a conversation from JSON. Accepts either the full object form
    /// (`{"messages": [...], "last_api_input_tokens": 123}`) or a bare array
    /// of messages.
    pub fn from_json(json: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Full(Conversation),
            Bare(Vec<Message>),
        }

        Ok(match serde_json::from_str::<Repr>(json)? {
            Repr::Full(conversation) => conversation,
            Repr::Bare(messages) => Self::from_messages(messages),
        })
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Authoritative input count from the last real call, if still valid.
    pub fn last_api_input_tokens(&self) -> Option<usize> {
        self.last_api_input_tokens
    }

    /// Cache the input token count reported by a real model call.
    pub fn record_api_usage(&mut self, input_tokens: usize) {
        debug!(input_tokens, "Recorded authoritative input token count");
        self.last_api_input_tokens = Some(input_tokens);
    }

    /// Number of leading system messages. Compactors keep these in place.
    pub fn pinned_prefix_len(&self) -> usize {
        self.messages
            .iter()
            .take_while(|m| m.role() == MessageRole::System)
            .count()
    }

    /// Replace `range` with `summary`.
    ///
    /// The summary takes the index of `range.start`; messages after the range
    /// keep their relative order. The cached authoritative count is dropped
    /// since it described the old history.
    pub fn replace_range_with_summary(
        &mut self,
        range: Range<usize>,
        summary: Message,
    ) -> Result<Vec<Message>> {
        if range.start >= range.end || range.end > self.messages.len() {
            return Err(Error::InvalidRange {
                start: range.start,
                end: range.end,
                len: self.messages.len(),
            });
        }

        let removed: Vec<Message> = self
            .messages
            .splice(range.clone(), std::iter::once(summary))
            .collect();
        self.last_api_input_tokens = None;

        debug!(
            start = range.start,
            removed = removed.len(),
            remaining = self.messages.len(),
            "Replaced messages with summary"
        );
        Ok(removed)
    }

    /// Replace the first `count` messages with `summary`.
    pub fn compact_prefix(&mut self, count: usize, summary: Message) -> Result<Vec<Message>> {
        self.replace_range_with_summary(0..count, summary)
    }
}
