//! Compaction triggering: classifies context usage against the budget.
//!
//! Two thresholds, both measured against `max_history_tokens`:
//!
//! - **Preventive** at 70%. Fires early so estimation error has room to be
//!   wrong before the hard ceiling is hit.
//! - **Forced** at 100%. The last-resort net; the history must never be sent
//!   over the limit without compacting first.
//!
//! The decision is recomputed from the ratio on every call. Nothing is
//! remembered between calls, so repeated calls with the same inputs always
//! agree.

use serde::Serialize;

/// Usage ratio at which preventive compaction fires.
pub const PREVENTIVE_THRESHOLD: f64 = 0.70;

/// Usage ratio at which compaction is forced.
pub const FORCED_THRESHOLD: f64 = 1.0;

/// What the agent loop should do before the next model call.
///
/// Variants are ordered by urgency, so `decision >= Preventive` reads as
/// "some compaction is due".
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CompactionDecision {
    /// Below the preventive threshold.
    None,
    /// Between the preventive threshold and the ceiling.
    Preventive,
    /// At or over the ceiling.
    Forced,
}

impl CompactionDecision {
    /// Whether any compaction is due.
    pub fn is_due(self) -> bool {
        self != CompactionDecision::None
    }
}

impl std::fmt::Display for CompactionDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionDecision::None => write!(f, "none"),
            CompactionDecision::Preventive => write!(f, "preventive"),
            CompactionDecision::Forced => write!(f, "forced"),
        }
    }
}

/// `estimated / max_history_tokens`.
///
/// Only meaningful for a positive `max_history_tokens`; configuration
/// loading rejects zero.
pub fn usage_ratio(estimated_tokens: usize, max_history_tokens: usize) -> f64 {
    estimated_tokens as f64 / max_history_tokens as f64
}

/// Classify usage with the default 70% preventive threshold.
pub fn should_compact(estimated_tokens: usize, max_history_tokens: usize) -> CompactionDecision {
    should_compact_with(estimated_tokens, max_history_tokens, PREVENTIVE_THRESHOLD)
}

/// Classify usage with a custom preventive threshold. Both bounds are
/// inclusive.
pub fn should_compact_with(
    estimated_tokens: usize,
    max_history_tokens: usize,
    preventive_threshold: f64,
) -> CompactionDecision {
    classify(estimated_tokens, max_history_tokens, preventive_threshold)
}

/// Boundaries are compared on the token counts, not on the rounded ratio, so
/// large budgets cannot round across them.
fn classify(estimated: usize, max: usize, preventive_threshold: f64) -> CompactionDecision {
    if estimated >= max {
        CompactionDecision::Forced
    } else if reaches_preventive(estimated, max, preventive_threshold) {
        CompactionDecision::Preventive
    } else {
        CompactionDecision::None
    }
}

fn reaches_preventive(estimated: usize, max: usize, threshold: f64) -> bool {
    if threshold == PREVENTIVE_THRESHOLD {
        // estimated / max >= 7 / 10
        estimated as u128 * 10 >= max as u128 * 7
    } else {
        estimated as f64 >= max as f64 * threshold
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextUsage {
    /// Estimated tokens consumed.
    pub estimated_tokens: usize,
    /// Configured history budget.
    pub max_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
    /// Trigger decision for this snapshot.
    pub decision: CompactionDecision,
}

impl ContextUsage {
    /// Snapshot `estimated_tokens` against `max_tokens`, classified with the
    /// given preventive threshold.
    pub fn new(estimated_tokens: usize, max_tokens: usize, preventive_threshold: f64) -> Self {
        Self {
            estimated_tokens,
            max_tokens,
            usage_pct: usage_ratio(estimated_tokens, max_tokens),
            decision: classify(estimated_tokens, max_tokens, preventive_threshold),
        }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {}, compaction: {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.max_tokens,
            self.decision,
        )
    }
}
