//! Placeholder compaction: collapse the oldest messages into one line.
//!
//! The real compaction routine summarizes older turns with an LLM call. This
//! module is the fallback that needs no model at all: it replaces a run of the
//! oldest messages with a single placeholder that records how much was
//! dropped. Leading system messages and the most recent messages are never
//! touched.
//!
//! For a preventive pass the run grows only until the estimate falls under
//! the target. A forced pass removes everything it is allowed to. A later pass
//! folds earlier placeholders into its own, so the counts stay cumulative.

use std::ops::Range;

use tracing::debug;

use crate::Message;
use crate::config::CompactionConfig;
use crate::context::estimator::{
    calibrated, calibration, estimate_from_counts, is_code_message, measure,
};
use crate::context::trigger::CompactionDecision;
use crate::conversation::Conversation;
use crate::error::Error;
use crate::guard::{CompactFuture, Compactor};

/// Prefix used for compaction placeholders.
pub const COMPACTED_PREFIX: &str = "[Compacted:";

const DEFAULT_KEEP_RECENT: usize = 4;

/// Target usage after a preventive pass (50% of the budget).
const DEFAULT_TARGET_RATIO: f64 = 0.50;

/// LLM-free [`Compactor`] that swaps old messages for a placeholder.
#[derive(Debug, Clone)]
pub struct PlaceholderCompactor {
    /// Number of trailing messages never compacted.
    keep_recent: usize,
    /// Fraction of `max_history_tokens` a preventive pass aims for.
    target_ratio: f64,
}

impl Default for PlaceholderCompactor {
    fn default() -> Self {
        Self {
            keep_recent: DEFAULT_KEEP_RECENT,
            target_ratio: DEFAULT_TARGET_RATIO,
        }
    }
}

impl PlaceholderCompactor {
    /// Create a compactor with default settings (keep 4 recent, target 50%).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of recent messages kept verbatim.
    pub fn with_keep_recent(mut self, n: usize) -> Self {
        self.keep_recent = n;
        self
    }

    /// Set the usage fraction a preventive pass compacts down to.
    pub fn with_target_ratio(mut self, ratio: f64) -> Self {
        self.target_ratio = ratio;
        self
    }

    /// Decide which messages to replace. `None` when nothing is compactable.
    ///
    /// When the provider's count is cached, every heuristic figure is scaled
    /// by its [`calibration`] so the stop check compares real usage with the
    /// target. Earlier placeholders inside the run are folded into the new
    /// one with their message and token counts carried forward.
    fn plan(
        &self,
        conversation: &Conversation,
        tier: CompactionDecision,
        config: &CompactionConfig,
    ) -> Option<(Range<usize>, Message)> {
        let messages = conversation.messages();
        let start = conversation.pinned_prefix_len();
        let limit = messages.len().saturating_sub(self.keep_recent).max(start);
        if limit <= start {
            return None;
        }

        let factor = calibration(conversation).unwrap_or(1.0);
        let (total_chars, code_chars) = measure(messages);
        let target = (config.max_history_tokens as f64 * self.target_ratio) as usize;

        let mut removed_chars = 0;
        let mut removed_code = 0;
        // Counts for messages that were not placeholders already.
        let mut fresh_chars = 0;
        let mut fresh_code = 0;
        let mut represented = 0;
        let mut carried_tokens = 0;
        let mut planned = None;

        for end in start + 1..=limit {
            let msg = &messages[end - 1];
            let len = msg.char_len();
            let code = if is_code_message(msg) { len } else { 0 };
            removed_chars += len;
            removed_code += code;

            match parse_placeholder(msg.content()) {
                Some((count, tokens)) => {
                    represented += count;
                    carried_tokens += tokens;
                }
                None => {
                    represented += 1;
                    fresh_chars += len;
                    fresh_code += code;
                }
            }

            let placeholder = placeholder_message(
                represented,
                carried_tokens + calibrated(estimate_from_counts(fresh_chars, fresh_code), factor),
            );
            let after = calibrated(
                estimate_from_counts(
                    total_chars - removed_chars + placeholder.char_len(),
                    code_chars - removed_code,
                ),
                factor,
            );
            planned = Some((start..end, placeholder));

            if tier != CompactionDecision::Forced && after <= target {
                break;
            }
        }

        // Swapping a lone placeholder for an equivalent one frees nothing.
        if let Some((range, _)) = &planned
            && range.len() == 1
            && parse_placeholder(messages[range.start].content()).is_some()
        {
            return None;
        }
        planned
    }
}

fn placeholder_message(messages: usize, tokens: usize) -> Message {
    Message::user(format!(
        "{COMPACTED_PREFIX} {messages} earlier messages, ~{tokens} tokens removed]"
    ))
}

/// Read `(messages, tokens)` back out of a placeholder written by this module.
fn parse_placeholder(content: &str) -> Option<(usize, usize)> {
    let rest = content.strip_prefix(COMPACTED_PREFIX)?.trim_start();
    let (messages, rest) = rest.split_once(" earlier messages, ~")?;
    let (tokens, _) = rest.split_once(" tokens removed]")?;
    Some((messages.parse().ok()?, tokens.parse().ok()?))
}

impl Compactor for PlaceholderCompactor {
    fn compact<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        tier: CompactionDecision,
        config: &'a CompactionConfig,
    ) -> CompactFuture<'a> {
        let plan = self.plan(conversation, tier, config);
        Box::pin(async move {
            match plan {
                Some((range, placeholder)) => {
                    debug!(
                        %tier,
                        start = range.start,
                        end = range.end,
                        "Replacing messages with placeholder"
                    );
                    conversation.replace_range_with_summary(range, placeholder)?;
                }
                None => debug!(%tier, "Nothing to compact outside pinned and recent messages"),
            }
            Ok::<(), Error>(())
        })
    }
}
