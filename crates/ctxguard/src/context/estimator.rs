//! Content-aware token estimation.
//!
//! Before a model call there is no tokenizer output to go on, so the history
//! is measured in characters and divided by a characters-per-token ratio.
//! Prose averages about four characters per token; JSON, code and tool
//! output land closer to two or three. Using a single ratio for both
//! undercounts tool-heavy conversations badly enough to overflow the
//! context window before the compaction threshold is reached.
//!
//! The ratio is therefore chosen from the share of the history that looks
//! like code:
//!
//! | code ratio | chars per token |
//! |------------|-----------------|
//! | > 0.5      | 2.5             |
//! | > 0.2      | 3.0             |
//! | otherwise  | 4.0             |

use serde::Serialize;
use tracing::{debug, trace};

use crate::conversation::Conversation;
use crate::{Message, MessageRole};

/// Flat ratio used by the naive estimator. Kept for comparisons and drift
/// reports.
pub const NAIVE_CHARS_PER_TOKEN: f64 = 4.0;

/// Substrings that suggest structured or source content.
const CODE_INDICATORS: [&str; 6] = ["{", "[", "def ", "class ", "function ", "```"];

/// How many distinct indicators must appear before content counts as code.
/// A lone brace or bracket in prose is common; three different markers are not.
const CODE_INDICATOR_THRESHOLD: usize = 3;

/// Intermediate numbers behind an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EstimateBreakdown {
    pub total_chars: usize,
    pub code_chars: usize,
    pub code_ratio: f64,
    pub chars_per_token: f64,
    pub estimated_tokens: usize,
    /// Set when the estimate is the cached provider count rather than a
    /// heuristic.
    pub authoritative: bool,
}

/// Estimate the token count of the whole conversation.
///
/// Returns [`Conversation::last_api_input_tokens`] unchanged when present.
pub fn estimate_tokens(conversation: &Conversation) -> usize {
    breakdown(conversation).estimated_tokens
}

/// Like [`estimate_tokens`] but keeps the intermediate values.
pub fn breakdown(conversation: &Conversation) -> EstimateBreakdown {
    let (total_chars, code_chars) = measure(conversation.messages());
    let code_ratio = code_ratio(total_chars, code_chars);
    let chars_per_token = chars_per_token_for(code_ratio);

    if let Some(exact) = conversation.last_api_input_tokens() {
        debug!(exact, "Using authoritative input token count");
        return EstimateBreakdown {
            total_chars,
            code_chars,
            code_ratio,
            chars_per_token,
            estimated_tokens: exact,
            authoritative: true,
        };
    }

    let estimated_tokens = estimate_from_counts(total_chars, code_chars);

    trace!(
        total_chars,
        code_chars,
        code_ratio,
        chars_per_token,
        estimated_tokens,
        "Estimated conversation tokens"
    );

    EstimateBreakdown {
        total_chars,
        code_chars,
        code_ratio,
        chars_per_token,
        estimated_tokens,
        authoritative: false,
    }
}

/// Heuristic estimate from raw character counts.
pub fn estimate_from_counts(total_chars: usize, code_chars: usize) -> usize {
    let chars_per_token = chars_per_token_for(code_ratio(total_chars, code_chars));
    (total_chars as f64 / chars_per_token) as usize
}

/// Ratio of the cached provider count to the heuristic for the same history.
///
/// `None` without a cached count, or when the heuristic is zero. Compaction
/// drops the cached count, so callers that keep estimating afterwards capture
/// this first and feed it to [`calibrated`].
pub fn calibration(conversation: &Conversation) -> Option<f64> {
    let exact = conversation.last_api_input_tokens()?;
    let (total_chars, code_chars) = measure(conversation.messages());
    let heuristic = estimate_from_counts(total_chars, code_chars);
    (heuristic > 0).then(|| exact as f64 / heuristic as f64)
}

/// Scale a heuristic estimate by a [`calibration`] factor, rounding up.
pub fn calibrated(heuristic: usize, factor: f64) -> usize {
    (heuristic as f64 * factor).ceil() as usize
}

/// Flat four-characters-per-token estimate, ignoring any cached count.
pub fn naive_estimate(conversation: &Conversation) -> usize {
    let (total_chars, _) = measure(conversation.messages());
    (total_chars as f64 / NAIVE_CHARS_PER_TOKEN) as usize
}

/// Whether a message counts toward the code share.
pub fn is_code_message(message: &Message) -> bool {
    message.role() == MessageRole::Tool || is_code_like(message.content())
}

/// At least three distinct code indicators occur in `content`.
pub fn is_code_like(content: &str) -> bool {
    CODE_INDICATORS
        .iter()
        .filter(|&&indicator| content.contains(indicator))
        .count()
        >= CODE_INDICATOR_THRESHOLD
}

/// Divisor for a given code ratio. Comparisons are strict: a ratio of exactly
/// 0.5 selects 3.0.
pub fn chars_per_token_for(code_ratio: f64) -> f64 {
    if code_ratio > 0.5 {
        2.5
    } else if code_ratio > 0.2 {
        3.0
    } else {
        4.0
    }
}

fn code_ratio(total_chars: usize, code_chars: usize) -> f64 {
    if total_chars == 0 {
        0.0
    } else {
        code_chars as f64 / total_chars as f64
    }
}

/// Returns `(total_chars, code_chars)`.
pub fn measure(messages: &[Message]) -> (usize, usize) {
    messages.iter().fold((0, 0), |(total, code), msg| {
        let len = msg.char_len();
        let code_len = if is_code_message(msg) { len } else { 0 };
        (total + len, code + code_len)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(messages: Vec<Message>) -> Conversation {
        Conversation::from_messages(messages)
    }

    #[test]
    fn empty_conversation_is_zero() {
        let b = breakdown(&Conversation::new());
        assert_eq!(b.estimated_tokens, 0);
        assert_eq!(b.code_ratio, 0.0);
        assert_eq!(b.chars_per_token, 4.0);
        assert!(!b.authoritative);
    }

    #[test]
    fn authoritative_count_wins() {
        let mut c = conv(vec![Message::tool("x".repeat(10_000))]);
        c.record_api_usage(42);
        assert_eq!(estimate_tokens(&c), 42);
        assert!(breakdown(&c).authoritative);

        // Zero is a valid authoritative count too.
        c.record_api_usage(0);
        assert_eq!(estimate_tokens(&c), 0);
    }

    #[test]
    fn three_indicators_are_code_like() {
        assert!(is_code_like("def foo(): class Bar: x = {1}"));
        assert!(is_code_like("```\nfunction go() { return [1]; }\n```"));
    }

    #[test]
    fn two_indicators_are_not_code_like() {
        assert!(!is_code_like("a set {1} and a list [2]"));
        assert!(!is_code_like("{{{{[[[[ repeated markers still count once"));
        assert!(!is_code_like(""));
    }

    #[test]
    fn empty_tool_message_is_scanned_but_adds_nothing() {
        let c = conv(vec![Message::tool(""), Message::user("a".repeat(100))]);
        let b = breakdown(&c);
        assert!(is_code_message(&c.messages()[0]));
        assert_eq!(b.code_chars, 0);
        assert_eq!(b.total_chars, 100);
        assert_eq!(b.estimated_tokens, 25);
    }

    #[test]
    fn divisor_bands_use_strict_comparisons() {
        assert_eq!(chars_per_token_for(0.6), 2.5);
        assert_eq!(chars_per_token_for(0.5), 3.0);
        assert_eq!(chars_per_token_for(0.3), 3.0);
        assert_eq!(chars_per_token_for(0.2), 4.0);
        assert_eq!(chars_per_token_for(0.1), 4.0);
        assert_eq!(chars_per_token_for(1.0), 2.5);
    }

    #[test]
    fn mixed_history_picks_middle_band() {
        // 30 code chars of 100 → ratio 0.3 → 3.0 chars per token.
        let c = conv(vec![Message::tool("t".repeat(30)), Message::user("p".repeat(70))]);
        let b = breakdown(&c);
        assert!((b.code_ratio - 0.3).abs() < 1e-9);
        assert_eq!(b.chars_per_token, 3.0);
        assert_eq!(b.estimated_tokens, 33);
    }

    #[test]
    fn code_heavy_history_picks_lowest_divisor() {
        let c = conv(vec![Message::tool("t".repeat(60)), Message::user("p".repeat(40))]);
        assert_eq!(estimate_tokens(&c), 40);
    }

    #[test]
    fn code_like_user_message_counts_as_code() {
        let snippet = "```python\ndef f():\n    return {'a': [1]}\n```";
        let c = conv(vec![Message::user(snippet)]);
        let b = breakdown(&c);
        assert_eq!(b.code_chars, b.total_chars);
        assert_eq!(b.chars_per_token, 2.5);
    }

    #[test]
    fn estimate_floors() {
        // 7 prose chars / 4.0 = 1.75 → 1.
        assert_eq!(estimate_tokens(&conv(vec![Message::user("abcdefg")])), 1);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let c = conv(vec![Message::user("é".repeat(8))]);
        assert_eq!(breakdown(&c).total_chars, 8);
        assert_eq!(estimate_tokens(&c), 2);
    }

    #[test]
    fn monotonic_in_total_chars_for_fixed_ratio() {
        let mut last = 0;
        for n in 0..50 {
            let c = conv(vec![Message::user("w".repeat(n * 7))]);
            let est = estimate_tokens(&c);
            assert!(est >= last);
            last = est;
        }
    }

    #[test]
    fn calibration_compares_cached_count_with_heuristic() {
        let mut c = conv(vec![Message::user("a".repeat(2000))]);
        assert_eq!(calibration(&c), None);

        c.record_api_usage(1500);
        assert_eq!(calibration(&c), Some(3.0));
        assert_eq!(calibrated(101, 3.0), 303);
        assert_eq!(calibrated(7, 1.0), 7);
        // 13 * 1.5 = 19.5
        assert_eq!(calibrated(13, 1.5), 20);

        // Nothing to scale against.
        let mut empty = Conversation::new();
        empty.record_api_usage(10);
        assert_eq!(calibration(&empty), None);
    }

    #[test]
    fn naive_estimate_ignores_shape_and_cached_count() {
        let mut c = conv(vec![Message::tool("x".repeat(400))]);
        c.record_api_usage(9);
        assert_eq!(naive_estimate(&c), 100);
    }
}
