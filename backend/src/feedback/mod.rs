//! Outcome ingestion and learning updates.
//!
//! Runs beside the decision path, never on it: outcomes arrive through a
//! queue, learning updates leave through another, and a failing memory store
//! only costs dropped updates.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use common::time::Clock;
use corelib::{CandidateSignature, CycleId, OutcomeRecord, PolicyKind};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::FeedbackError;
use crate::metrics::counters::{Counters, bump};
use crate::recorder::DecisionRecorder;
use crate::recorder::repository::AttachStatus;
use crate::scope::ScopeRegistry;

/// What the memory/classifier store learns from one attached outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningUpdate {
    pub cycle_id: CycleId,
    pub scope: String,
    pub signature: CandidateSignature,
    pub kind: PolicyKind,
    pub success: bool,
    pub realized_metric: f64,
    pub critique_summary: String,
    pub observed_at_ms: u64,
}

/// External memory/classifier store.
#[async_trait]
pub trait MemorySink: Send + Sync {
    async fn apply(&self, update: &LearningUpdate) -> anyhow::Result<()>;
}

/// Memory sink that only logs; used when no store is wired in.
pub struct LoggingMemorySink;

#[async_trait]
impl MemorySink for LoggingMemorySink {
    async fn apply(&self, update: &LearningUpdate) -> anyhow::Result<()> {
        info!(
            target: "feedback",
            cycle_id = %update.cycle_id,
            signature = %update.signature,
            success = update.success,
            "learning update"
        );
        Ok(())
    }
}

pub struct FeedbackCollector {
    recorder: Arc<DecisionRecorder>,
    scopes: Arc<ScopeRegistry>,
    updates: mpsc::Sender<LearningUpdate>,
    counters: Counters,
    clock: Arc<dyn Clock>,
}

impl FeedbackCollector {
    /// Returns the collector and the receiving end of its learning-update queue.
    pub fn new(
        recorder: Arc<DecisionRecorder>,
        scopes: Arc<ScopeRegistry>,
        counters: Counters,
        clock: Arc<dyn Clock>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<LearningUpdate>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                recorder,
                scopes,
                updates: tx,
                counters,
                clock,
            },
            rx,
        )
    }

    /// Attaches `outcome` to the audit record of `cycle_id`.
    ///
    /// A later observation replaces an earlier one; an older or equal one is
    /// ignored and reported as `StaleIgnored`. Unknown cycles mutate nothing.
    #[instrument(skip_all, target = "feedback", fields(cycle_id = %cycle_id))]
    pub async fn attach_outcome(
        &self,
        cycle_id: CycleId,
        mut outcome: OutcomeRecord,
    ) -> Result<AttachStatus, FeedbackError> {
        outcome.cycle_id = cycle_id;
        if !outcome.realized_metric.is_finite() {
            warn!(target: "feedback", "outcome with non-finite metric rejected");
            return Err(FeedbackError::NonFiniteMetric(cycle_id));
        }

        let Some(entry) = self.recorder.fetch(cycle_id).await? else {
            bump(&self.counters.outcomes_unknown);
            warn!(target: "feedback", "outcome for unknown cycle rejected");
            return Err(FeedbackError::UnknownCycle(cycle_id));
        };

        let (status, previous) = match self.recorder.attach_outcome(&outcome).await? {
            Some(a) => (a.status, a.previous),
            None => {
                bump(&self.counters.outcomes_unknown);
                return Err(FeedbackError::UnknownCycle(cycle_id));
            }
        };

        if status == AttachStatus::StaleIgnored {
            bump(&self.counters.outcomes_stale);
            debug!(
                target: "feedback",
                observed_at_ms = outcome.observed_at_ms,
                "older outcome ignored"
            );
            return Ok(status);
        }
        bump(&self.counters.outcomes_attached);

        let decision = &entry.record.decision;
        let now = self.clock.now_ms();
        let lag = now.saturating_sub(decision.decided_at_ms);
        self.counters.feedback_lag_ms.store(lag, Ordering::Relaxed);

        // `previous` is read atomically with the write, so concurrent losing
        // reports for one cycle record a single loss.
        let signature = decision.winner.candidate.signature();
        let already_lost = previous.as_ref().is_some_and(|prev| !prev.success);
        if !outcome.success && !already_lost {
            self.scopes.record_loss(&entry.record.scope, signature.clone(), now);
        }

        let update = LearningUpdate {
            cycle_id,
            scope: entry.record.scope.clone(),
            signature,
            kind: decision.kind(),
            success: outcome.success,
            realized_metric: outcome.realized_metric,
            critique_summary: outcome.critique_summary.clone(),
            observed_at_ms: outcome.observed_at_ms,
        };
        match self.updates.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                bump(&self.counters.learning_dropped);
                warn!(target: "feedback", "learning queue full; update dropped");
            }
            Err(TrySendError::Closed(_)) => {
                bump(&self.counters.learning_dropped);
                warn!(target: "feedback", "memory sink gone; update dropped");
            }
        }

        info!(target: "feedback", lag_ms = lag, success = outcome.success, "outcome attached");
        Ok(status)
    }
}

/// Delivers learning updates until the queue closes. Sink failures are logged
/// and never retried.
pub async fn run_memory_sink(mut rx: mpsc::Receiver<LearningUpdate>, sink: Arc<dyn MemorySink>) {
    while let Some(update) = rx.recv().await {
        if let Err(e) = sink.apply(&update).await {
            warn!(
                target: "feedback",
                cycle_id = %update.cycle_id,
                error = %format!("{e:#}"),
                "memory sink rejected learning update"
            );
        }
    }
    debug!(target: "feedback", "learning queue closed; memory sink stopped");
}

/// Processes submitted outcomes on a separate task. The returned sender is the
/// outcome intake; dropping it stops the worker.
pub fn spawn_outcome_worker(
    collector: Arc<FeedbackCollector>,
    capacity: usize,
) -> (mpsc::Sender<OutcomeRecord>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<OutcomeRecord>(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            let cycle_id = outcome.cycle_id;
            if let Err(e) = collector.attach_outcome(cycle_id, outcome).await {
                warn!(target: "feedback", %cycle_id, error = %e, "outcome not attached");
            }
        }
    });
    (tx, handle)
}
