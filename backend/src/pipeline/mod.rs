//! Cycle orchestrator.
//!
//! Responsibilities:
//! - Build the cycle context from the signal board (abort when stale).
//! - Resolve the scope's intent and novelty snapshot under the scope lock.
//! - Generate, validate and rank candidates under the cycle's cancellation token.
//! - Commit the audit record, then publish the decision.
//!
//! Safety properties:
//! - A decision is published only after its audit record is durable.
//! - Cycle ids come from a monotonic allocator seeded past the highest stored id.
//! - A superseded cycle aborts before commit; after commit it is authoritative.
//! - Every abort path leaves the audit store untouched.

mod sink;

pub use sink::{DecisionSink, LoggingDecisionSink};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use common::logger::{TraceId, annotate_cycle, cycle_span, warn_if_slow};
use common::time::Clock;
use corelib::{AuditRecord, CycleId, Decision, Intent};
use tracing::{Instrument, debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::generator::fallback::conservative_default;
use crate::generator::source::ProposalSource;
use crate::generator::{CandidateGenerator, GeneratorConfig};
use crate::metrics::counters::{Counters, add, bump};
use crate::ranker::Ranker;
use crate::recorder::{CommitReceipt, DecisionRecorder};
use crate::scope::{Cancelled, ScopeRegistry};
use crate::signal::{SignalAggregator, SignalBoard};
use crate::validator::Validator;
use crate::validator::risk_gate::{GlobalConstraints, HardConstraint, RiskGate};
use crate::validator::scorer::Scorer;

/// Collaborators the pipeline is wired to.
pub struct PipelineDeps {
    pub board: SignalBoard,
    pub scopes: Arc<ScopeRegistry>,
    pub recorder: Arc<DecisionRecorder>,
    pub sources: Vec<Arc<dyn ProposalSource>>,
    pub scorer: Arc<dyn Scorer>,
    pub gate: Arc<dyn RiskGate>,
    pub sink: Arc<dyn DecisionSink>,
    pub counters: Counters,
    pub clock: Arc<dyn Clock>,
}

/// Result of a completed cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub decision: Decision,
    pub receipt: CommitReceipt,
    /// Generation fell back to the conservative default.
    pub degraded: bool,
    /// False when the downstream sink failed after commit.
    pub published: bool,
}

pub struct DecisionPipeline {
    board: SignalBoard,
    aggregator: SignalAggregator,
    generator: CandidateGenerator,
    validator: Validator,
    ranker: Ranker,
    recorder: Arc<DecisionRecorder>,
    sink: Arc<dyn DecisionSink>,
    scopes: Arc<ScopeRegistry>,
    hard_constraints: Vec<HardConstraint>,

    /// Operator override: prefer the conservative default when present.
    conservative: AtomicBool,
    /// Operator approval for `FullShutdown` escalations.
    shutdown_approved: AtomicBool,
    next_cycle: AtomicU64,

    /// Observability counters (does not affect behavior).
    counters: Counters,
    clock: Arc<dyn Clock>,
}

impl DecisionPipeline {
    /// Wires the pipeline and seeds the cycle allocator from the audit store.
    pub async fn new(cfg: &PipelineConfig, deps: PipelineDeps) -> anyhow::Result<Self> {
        let last = deps.recorder.last_cycle_id().await?;
        let next = last.map(|c| c.get() + 1).unwrap_or(1);
        info!(target: "pipeline", next_cycle_id = next, "cycle allocator seeded");

        Ok(Self {
            board: deps.board,
            aggregator: SignalAggregator::new(cfg.freshness_window_ms),
            generator: CandidateGenerator::new(
                deps.sources,
                GeneratorConfig {
                    max_candidates: cfg.max_candidates,
                    proposal_timeout: cfg.proposal_timeout(),
                    min_confidence: cfg.min_proposal_confidence,
                },
            ),
            validator: Validator::new(
                deps.scorer,
                deps.gate,
                cfg.scoring_timeout(),
                cfg.scoring_fan_out,
            ),
            ranker: Ranker::new(cfg.weights.clone()),
            recorder: deps.recorder,
            sink: deps.sink,
            scopes: deps.scopes,
            hard_constraints: cfg.hard_constraints.clone(),
            conservative: AtomicBool::new(cfg.conservative_mode),
            shutdown_approved: AtomicBool::new(false),
            next_cycle: AtomicU64::new(next),
            counters: deps.counters,
            clock: deps.clock,
        })
    }

    pub fn board(&self) -> &SignalBoard {
        &self.board
    }

    pub fn recorder(&self) -> &Arc<DecisionRecorder> {
        &self.recorder
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn set_conservative_mode(&self, on: bool) {
        self.conservative.store(on, Ordering::SeqCst);
        info!(target: "pipeline", on, "conservative mode toggled");
    }

    pub fn approve_full_shutdown(&self, approved: bool) {
        self.shutdown_approved.store(approved, Ordering::SeqCst);
        info!(target: "pipeline", approved, "full shutdown approval toggled");
    }

    /// Accepts a new intent for `scope` after boundary validation.
    ///
    /// Returns true when it superseded an in-flight cycle of that scope.
    pub fn submit_intent(&self, scope: &str, intent: Intent) -> Result<bool, PipelineError> {
        if let Err(e) = intent.validate() {
            warn!(target: "pipeline", scope, error = %e, "malformed intent rejected");
            return Err(e.into());
        }
        Ok(self.scopes.replace_intent(scope, intent))
    }

    /// Runs one decision cycle for `scope` inside its own root span.
    pub async fn run_cycle(&self, scope: &str) -> Result<CycleOutcome, PipelineError> {
        let trace_id = TraceId::default();
        self.run_cycle_inner(scope)
            .instrument(cycle_span(&trace_id, scope))
            .await
    }

    async fn run_cycle_inner(&self, scope: &str) -> Result<CycleOutcome, PipelineError> {
        bump(&self.counters.cycles_started);
        debug!("starting decision cycle");

        // 1) Context. Stale or missing feeds abort before anything is allocated.
        let (sentiment, telemetry) = self.board.latest(scope).await;
        let ctx = match self
            .aggregator
            .build(sentiment.as_ref(), telemetry.as_ref(), self.clock.as_ref())
        {
            Ok(ctx) => ctx,
            Err(e) => {
                bump(&self.counters.cycles_stale);
                warn!(target: "pipeline", error = %e, "cycle aborted on stale input");
                return Err(e.into());
            }
        };

        // 2) Scope state. The lock is released before any await.
        let (intent, token, novelty) = {
            let handle = self.scopes.handle(scope);
            let mut state = handle.lock();
            let Some(intent) = state.last_intent.clone() else {
                bump(&self.counters.cycles_no_intent);
                info!(target: "pipeline", "no intent for scope yet; cycle skipped");
                return Err(PipelineError::NoIntent {
                    scope: scope.to_string(),
                });
            };
            let token = state.begin_cycle();
            let novelty = state.novelty.snapshot(ctx.timestamp_ms);
            (intent, token, novelty)
        };

        let cycle_id = CycleId(self.next_cycle.fetch_add(1, Ordering::SeqCst));
        annotate_cycle(cycle_id.get());

        // 3) Generation.
        let generation = self
            .generator
            .propose(&ctx, &intent, &token)
            .await
            .map_err(|Cancelled| self.superseded(scope))?;
        if generation.summary.degraded {
            bump(&self.counters.generation_degraded);
        }

        let conservative = self.conservative.load(Ordering::SeqCst);
        let mut candidates = generation.candidates;
        if conservative && !candidates.iter().any(|c| c.is_fallback) {
            let ordinal = candidates.len() as u32;
            candidates.push(conservative_default(&intent, ordinal));
        }

        // 4) Validation.
        let globals = GlobalConstraints {
            rules: self.hard_constraints.clone(),
            full_shutdown_approved: self.shutdown_approved.load(Ordering::SeqCst),
        };
        let validation = self
            .validator
            .validate(candidates, &ctx, &intent, &globals, &novelty, &token)
            .await
            .map_err(|Cancelled| self.superseded(scope))?;
        add(&self.counters.candidates_rejected, validation.rejected.len());
        add(&self.counters.scoring_unavailable, validation.scoring_failures());

        // 5) Ranking.
        let now_ms = self.clock.now_ms();
        let ranking = match self.ranker.select_winner(
            cycle_id,
            scope,
            &validation.accepted,
            conservative,
            now_ms,
        ) {
            Ok(r) => r,
            Err(e) => {
                bump(&self.counters.cycles_no_viable);
                error!(target: "pipeline", alert = true, "cycle aborted: {e}");
                return Err(e.into());
            }
        };

        if token.is_cancelled() {
            return Err(self.superseded(scope));
        }

        // 6) Persist before release.
        let record = AuditRecord {
            cycle_id,
            scope: scope.to_string(),
            context: ctx,
            intent,
            generation: generation.summary,
            accepted: validation.accepted,
            rejected: validation.rejected,
            standings: ranking.standings,
            decision: ranking.decision,
            conservative_mode: conservative,
            created_at_ms: now_ms,
        };
        let receipt = match self.recorder.commit(&record).await {
            Ok(r) => r,
            Err(e) => {
                if matches!(e, crate::error::RecorderError::DuplicateCycle(_)) {
                    bump(&self.counters.duplicate_commits);
                }
                error!(target: "pipeline", error = %e, "commit failed; decision withheld");
                return Err(e.into());
            }
        };
        bump(&self.counters.cycles_committed);

        // 7) Release.
        let decision = record.decision;
        let published = match warn_if_slow(
            "sink_publish",
            Duration::from_millis(250),
            self.sink.publish(&decision),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                bump(&self.counters.publish_failures);
                error!(
                    target: "pipeline",
                    error = %format!("{e:#}"),
                    "publish failed after commit; decision remains on record"
                );
                false
            }
        };

        info!(
            target: "pipeline",
            kind = %decision.kind(),
            fallback = decision.is_fallback(),
            degraded = record.generation.degraded,
            rank = decision.rank,
            "cycle complete"
        );

        Ok(CycleOutcome {
            degraded: record.generation.degraded,
            decision,
            receipt,
            published,
        })
    }

    fn superseded(&self, scope: &str) -> PipelineError {
        bump(&self.counters.cycles_superseded);
        info!(target: "pipeline", "cycle superseded; in-flight calls cancelled");
        PipelineError::Superseded {
            scope: scope.to_string(),
        }
    }
}
