//! Scoring and risk filtering of generated candidates.

pub mod novelty;
pub mod risk_gate;
pub mod scorer;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::logger::warn_if_slow;
use corelib::{CandidatePolicy, Context, Intent, ScoreMetrics, ScoredCandidate};
use futures::{StreamExt, stream};
use tracing::{debug, error, info, instrument, warn};

use crate::scope::{CallError, Cancelled, CycleToken};
use novelty::NoveltySnapshot;
use risk_gate::{GlobalConstraints, LIMIT_MAX_DRAWDOWN_PROJECTED, RiskGate, SCORING_UNAVAILABLE};
use scorer::Scorer;

/// Validator output, both lists in generation order.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub accepted: Vec<ScoredCandidate>,
    /// Each entry carries a non-empty `risk_violations`.
    pub rejected: Vec<ScoredCandidate>,
}

impl Validation {
    pub fn scoring_failures(&self) -> usize {
        self.rejected
            .iter()
            .filter(|s| s.risk_violations.contains(SCORING_UNAVAILABLE))
            .count()
    }
}

pub struct Validator {
    scorer: Arc<dyn Scorer>,
    gate: Arc<dyn RiskGate>,
    scoring_timeout: Duration,
    fan_out: usize,
}

impl Validator {
    pub fn new(
        scorer: Arc<dyn Scorer>,
        gate: Arc<dyn RiskGate>,
        scoring_timeout: Duration,
        fan_out: usize,
    ) -> Self {
        Self {
            scorer,
            gate,
            scoring_timeout,
            fan_out: fan_out.max(1),
        }
    }

    /// Scores every candidate (at most `fan_out` at a time) and applies the
    /// risk gate. Per-candidate failures become violations; only cancellation
    /// aborts.
    #[instrument(skip_all, target = "validator", fields(candidates = candidates.len()))]
    pub async fn validate(
        &self,
        candidates: Vec<CandidatePolicy>,
        ctx: &Context,
        intent: &Intent,
        globals: &GlobalConstraints,
        novelty: &NoveltySnapshot,
        token: &CycleToken,
    ) -> Result<Validation, Cancelled> {
        let scored: Vec<Result<ScoredCandidate, Cancelled>> = stream::iter(candidates)
            .map(|c| self.assess(c, ctx, intent, globals, novelty, token))
            .buffered(self.fan_out)
            .collect()
            .await;

        let mut out = Validation::default();
        for s in scored {
            let s = s?;
            if s.risk_violations.is_empty() {
                out.accepted.push(s);
            } else {
                info!(
                    target: "validator",
                    candidate_id = %s.candidate.id,
                    kind = %s.candidate.kind,
                    violations = ?s.risk_violations,
                    "candidate rejected by risk gate"
                );
                out.rejected.push(s);
            }
        }

        debug!(
            accepted = out.accepted.len(),
            rejected = out.rejected.len(),
            "validation complete"
        );
        Ok(out)
    }

    async fn assess(
        &self,
        candidate: CandidatePolicy,
        ctx: &Context,
        intent: &Intent,
        globals: &GlobalConstraints,
        novelty: &NoveltySnapshot,
        token: &CycleToken,
    ) -> Result<ScoredCandidate, Cancelled> {
        let call = warn_if_slow(
            "scorer.score",
            self.scoring_timeout / 2,
            self.scorer.score(&candidate, ctx, intent),
        );
        let metrics = match token.bounded(self.scoring_timeout, call).await {
            Err(CallError::Cancelled) => return Err(Cancelled),
            Err(CallError::Timeout) => {
                warn!(candidate_id = %candidate.id, "scoring timed out");
                None
            }
            Ok(Err(e)) => {
                warn!(candidate_id = %candidate.id, error = %format!("{e:#}"), "scoring failed");
                None
            }
            Ok(Ok(m)) if !m.is_finite() => {
                warn!(candidate_id = %candidate.id, ?m, "scorer returned non-finite metrics");
                None
            }
            Ok(Ok(m)) => Some(m),
        };

        let mut violations: BTreeSet<String> =
            self.gate.evaluate(&candidate, &intent.risk_limits, globals);
        match metrics {
            None => {
                violations.insert(SCORING_UNAVAILABLE.to_string());
            }
            Some(m) if m.drawdown > intent.risk_limits.max_drawdown => {
                violations.insert(LIMIT_MAX_DRAWDOWN_PROJECTED.to_string());
            }
            Some(_) => {}
        }

        let mut metrics = metrics;
        if candidate.is_fallback {
            if violations.iter().any(|v| v != SCORING_UNAVAILABLE) {
                error!(
                    target: "validator",
                    alert = true,
                    violations = ?violations,
                    "conservative default breaches hard constraints; check configuration"
                );
            }
            violations.clear();
            metrics = Some(metrics.unwrap_or(ScoreMetrics {
                expected_return: 0.0,
                drawdown: 0.0,
            }));
        }

        Ok(ScoredCandidate {
            intent_alignment: intent.alignment_with(&candidate.entry_conditions),
            novelty_penalty: novelty.penalty(&candidate.signature()),
            candidate,
            metrics,
            risk_violations: violations,
        })
    }
}
