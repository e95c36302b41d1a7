//! Pre-call validation: compact before the request, not after the overflow.
//!
//! [`PreCallGuard::run`] is meant to be called once per turn, right before the
//! model request. It performs two independent checks:
//!
//! 1. **Preventive**: If the estimate is at or above the safety threshold
//!    (70% by default), compact.
//! 2. **Forced**: Re-estimate, and if usage is still at or above 100%,
//!    compact again. This check always runs, whether or not step 1 fired.
//!
//! Compaction clears the provider's cached count. Re-estimates after a pass
//! scale the heuristic by the ratio observed before the first pass, so a
//! history the heuristic undercounts is not reported as safe.
//!
//! Compaction itself is delegated to a [`Compactor`]. The guard only decides
//! when it is due and reports what happened.
//!
//! ```ignore
//! let guard = PreCallGuard::new(config);
//! let report = guard.run(&mut conversation, &my_summarizer).await?;
//! tracing::info!("{}", report.final_usage.to_log_string());
//! ```

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CompactionConfig;
use crate::context::estimator::{calibrated, calibration, estimate_tokens};
use crate::context::trigger::{CompactionDecision, ContextUsage};
use crate::conversation::Conversation;
use crate::error::Result;

/// Boxed future returned by [`Compactor::compact`].
///
/// Type alias to keep trait signatures and implementations readable.
pub type CompactFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A routine that shrinks a conversation, typically by summarizing older
/// turns.
///
/// Uses a boxed future so that the trait is dyn-compatible.
pub trait Compactor: Send + Sync {
    /// Rewrite `conversation` in place. `tier` is the decision that caused
    /// the call, so implementations can compact harder when forced.
    fn compact<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        tier: CompactionDecision,
        config: &'a CompactionConfig,
    ) -> CompactFuture<'a>;
}

/// One compaction pass run by the guard.
#[derive(Debug, Clone, Serialize)]
pub struct CompactionPass {
    pub tier: CompactionDecision,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Outcome of [`PreCallGuard::run`].
#[derive(Debug, Clone, Serialize)]
pub struct GuardReport {
    pub initial_usage: ContextUsage,
    pub final_usage: ContextUsage,
    pub passes: Vec<CompactionPass>,
}

impl GuardReport {
    /// Whether any compaction pass ran.
    pub fn compacted(&self) -> bool {
        !self.passes.is_empty()
    }
}

/// Runs the preventive and forced checks before a model call.
#[derive(Debug, Clone)]
pub struct PreCallGuard {
    config: CompactionConfig,
}

impl PreCallGuard {
    /// Create a guard for the given budget and threshold.
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// Budget and threshold this guard checks against.
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Estimate the conversation and classify the result.
    pub fn check(&self, conversation: &Conversation) -> ContextUsage {
        ContextUsage::new(
            estimate_tokens(conversation),
            self.config.max_history_tokens,
            self.config.safety_threshold_ratio,
        )
    }

    /// Run both checks, compacting as needed.
    ///
    /// # Errors
    /// Returns the compactor's error if a pass fails. Passes that completed
    /// before the failure have already rewritten the conversation.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        compactor: &dyn Compactor,
    ) -> Result<GuardReport> {
        let initial_usage = self.check(conversation);
        let calibration = calibration(conversation);
        if let Some(factor) = calibration {
            debug!(factor, "Calibrating post-compaction estimates");
        }
        let mut passes = Vec::new();

        if initial_usage.decision >= CompactionDecision::Preventive {
            warn!(
                estimated = initial_usage.estimated_tokens,
                threshold = self.config.threshold_tokens(),
                ratio = self.config.safety_threshold_ratio,
                "Preventive compaction"
            );
            passes.push(
                self.pass(
                    conversation,
                    compactor,
                    CompactionDecision::Preventive,
                    initial_usage,
                    calibration,
                )
                .await?,
            );
        }

        // The ceiling check runs every turn, independent of the preventive one.
        let usage = self.recheck(conversation, calibration);
        if usage.decision == CompactionDecision::Forced {
            warn!(
                estimated = usage.estimated_tokens,
                max = usage.max_tokens,
                "Pre-send guard: compacting at 100%"
            );
            passes.push(
                self.pass(
                    conversation,
                    compactor,
                    CompactionDecision::Forced,
                    usage,
                    calibration,
                )
                .await?,
            );
        }

        let final_usage = self.recheck(conversation, calibration);
        if final_usage.decision == CompactionDecision::Forced {
            warn!(
                "Context still over budget after compaction: {}",
                final_usage.to_log_string()
            );
        }

        Ok(GuardReport {
            initial_usage,
            final_usage,
            passes,
        })
    }

    /// [`check`](Self::check), scaled by `calibration` once the cached count
    /// is gone.
    fn recheck(&self, conversation: &Conversation, calibration: Option<f64>) -> ContextUsage {
        match calibration {
            Some(factor) if conversation.last_api_input_tokens().is_none() => ContextUsage::new(
                calibrated(estimate_tokens(conversation), factor),
                self.config.max_history_tokens,
                self.config.safety_threshold_ratio,
            ),
            _ => self.check(conversation),
        }
    }

    async fn pass(
        &self,
        conversation: &mut Conversation,
        compactor: &dyn Compactor,
        tier: CompactionDecision,
        before: ContextUsage,
        calibration: Option<f64>,
    ) -> Result<CompactionPass> {
        compactor.compact(conversation, tier, &self.config).await?;
        let after = self.recheck(conversation, calibration);
        info!(
            %tier,
            tokens_before = before.estimated_tokens,
            tokens_after = after.estimated_tokens,
            "Compaction pass complete"
        );
        Ok(CompactionPass {
            tier,
            tokens_before: before.estimated_tokens,
            tokens_after: after.estimated_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use crate::error::Error;
    use std::sync::Mutex;

    /// Records calls and drops a fixed number of leading messages per pass.
    struct DropOldest {
        per_pass: usize,
        calls: Mutex<Vec<CompactionDecision>>,
    }

    impl DropOldest {
        fn new(per_pass: usize) -> Self {
            Self {
                per_pass,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<CompactionDecision> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Compactor for DropOldest {
        fn compact<'a>(
            &'a self,
            conversation: &'a mut Conversation,
            tier: CompactionDecision,
            _config: &'a CompactionConfig,
        ) -> CompactFuture<'a> {
            self.calls.lock().unwrap().push(tier);
            let count = self.per_pass.min(conversation.len());
            Box::pin(async move {
                if count > 0 {
                    conversation.compact_prefix(count, Message::user("summary"))?;
                }
                Ok::<(), Error>(())
            })
        }
    }

    struct Failing;

    impl Compactor for Failing {
        fn compact<'a>(
            &'a self,
            _conversation: &'a mut Conversation,
            _tier: CompactionDecision,
            _config: &'a CompactionConfig,
        ) -> CompactFuture<'a> {
            Box::pin(async { Err::<(), _>(Error::Compaction("summarizer unavailable".into())) })
        }
    }

    fn prose(chars: usize) -> Message {
        Message::user("a".repeat(chars))
    }

    /// 100 tokens per prose message at 4 chars per token.
    fn conversation(messages: usize) -> Conversation {
        Conversation::from_messages((0..messages).map(|_| prose(400)))
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let guard = PreCallGuard::new(CompactionConfig::new(1000));
        let compactor = DropOldest::new(1);
        let mut conv = conversation(6);

        let report = guard.run(&mut conv, &compactor).await.unwrap();
        assert!(!report.compacted());
        assert_eq!(report.initial_usage.decision, CompactionDecision::None);
        assert!(compactor.calls().is_empty());
        assert_eq!(conv.len(), 6);
    }

    #[tokio::test]
    async fn preventive_zone_compacts_once() {
        let guard = PreCallGuard::new(CompactionConfig::new(1000));
        let compactor = DropOldest::new(3);
        let mut conv = conversation(7);

        let report = guard.run(&mut conv, &compactor).await.unwrap();
        assert_eq!(compactor.calls(), [CompactionDecision::Preventive]);
        assert_eq!(report.passes.len(), 1);
        assert_eq!(report.passes[0].tokens_before, 700);
        assert_eq!(report.final_usage.decision, CompactionDecision::None);
    }

    #[tokio::test]
    async fn forced_check_runs_after_preventive_pass() {
        let guard = PreCallGuard::new(CompactionConfig::new(1000));
        // Removing one message per pass leaves the history over the ceiling.
        let compactor = DropOldest::new(1);
        let mut conv = conversation(13);

        let report = guard.run(&mut conv, &compactor).await.unwrap();
        assert_eq!(
            compactor.calls(),
            [CompactionDecision::Preventive, CompactionDecision::Forced]
        );
        assert_eq!(report.initial_usage.decision, CompactionDecision::Forced);
        assert_eq!(report.passes[1].tier, CompactionDecision::Forced);
    }

    #[tokio::test]
    async fn compactor_errors_propagate() {
        let guard = PreCallGuard::new(CompactionConfig::new(100));
        let mut conv = conversation(2);

        let err = guard.run(&mut conv, &Failing).await.unwrap_err();
        assert!(matches!(err, Error::Compaction(_)));
    }

    #[test]
    fn check_uses_configured_threshold() {
        let guard = PreCallGuard::new(CompactionConfig::new(1000).with_safety_threshold_ratio(0.5));
        let usage = guard.check(&conversation(5));
        assert_eq!(usage.estimated_tokens, 500);
        assert_eq!(usage.decision, CompactionDecision::Preventive);
    }

    #[test]
    fn check_prefers_authoritative_count() {
        let guard = PreCallGuard::new(CompactionConfig::new(1000));
        let mut conv = conversation(1);
        conv.record_api_usage(1000);
        assert_eq!(guard.check(&conv).decision, CompactionDecision::Forced);
    }

    #[tokio::test]
    async fn recheck_keeps_the_reported_scale() {
        // Heuristic 500, provider 1500: every later estimate is tripled.
        let guard = PreCallGuard::new(CompactionConfig::new(1000));
        let compactor = DropOldest::new(1);
        let mut conv = conversation(5);
        conv.record_api_usage(1500);

        let report = guard.run(&mut conv, &compactor).await.unwrap();
        assert_eq!(
            compactor.calls(),
            [CompactionDecision::Preventive, CompactionDecision::Forced]
        );
        // "summary" plus four prose messages: 1607 chars → 401 → 1203.
        assert_eq!(report.passes[0].tokens_after, 1203);
        assert_eq!(report.final_usage.estimated_tokens, 1203);
        assert_eq!(report.final_usage.decision, CompactionDecision::Forced);
    }
}
