//! Convenience re-exports for the common case.
//!
//! ```
//! use ctxguard::prelude::*;
//! ```

pub use crate::config::CompactionConfig;
pub use crate::context::drift::DriftTracker;
pub use crate::context::estimator::{estimate_tokens, naive_estimate};
pub use crate::context::eviction::PlaceholderCompactor;
pub use crate::context::trigger::{CompactionDecision, ContextUsage, should_compact, usage_ratio};
pub use crate::conversation::Conversation;
pub use crate::error::{Error, Result};
pub use crate::guard::{CompactFuture, Compactor, GuardReport, PreCallGuard};
pub use crate::{Message, MessageRole};
