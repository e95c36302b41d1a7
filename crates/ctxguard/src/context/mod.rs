//! Context window accounting: estimation, triggering, drift, compaction.
//!
//! 1. **[`estimator`]**: Adaptive characters-per-token estimation. Returns the
//!    cached authoritative count when one exists, otherwise scales the divisor
//!    by how much of the history is code or tool output.
//!
//! 2. **[`trigger`]**: [`should_compact`] maps a usage ratio onto
//!    [`CompactionDecision`]: preventive at 70%, forced at 100%.
//!    [`ContextUsage`] bundles the numbers for logging.
//!
//! 3. **[`drift`]**: [`DriftTracker`] compares pre-call estimates with the
//!    counts the provider reports afterwards.
//!
//! 4. **[`eviction`]**: [`PlaceholderCompactor`] collapses the oldest
//!    messages into one placeholder without an LLM call.

pub mod drift;
pub mod estimator;
pub mod eviction;
pub mod trigger;

pub use drift::DriftTracker;
pub use estimator::{EstimateBreakdown, NAIVE_CHARS_PER_TOKEN, estimate_tokens, naive_estimate};
pub use eviction::PlaceholderCompactor;
pub use trigger::{
    CompactionDecision, ContextUsage, FORCED_THRESHOLD, PREVENTIVE_THRESHOLD, should_compact,
    usage_ratio,
};
