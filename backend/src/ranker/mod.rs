//! Deterministic composite ranking and winner selection.
//!
//! `composite = w1*norm(er) - w2*norm(dd) + w3*alignment - w4*novelty`, with
//! min-max normalization over the candidates being ranked. Scores are
//! compared after quantization so that float noise can never reorder two
//! candidates that are equal for all practical purposes.

use std::cmp::Ordering;

use corelib::{CycleId, Decision, ScoredCandidate, Standing};
use tracing::{debug, error, instrument};

use crate::error::NoViableCandidateError;

#[derive(Clone, Debug, PartialEq)]
pub struct RankingWeights {
    pub expected_return: f64,
    pub drawdown: f64,
    pub intent_alignment: f64,
    pub novelty: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            expected_return: 1.0,
            drawdown: 1.0,
            intent_alignment: 0.5,
            novelty: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub decision: Decision,
    /// Every ranked candidate, best first.
    pub standings: Vec<Standing>,
}

const QUANTUM: f64 = 1e9;

fn quantize(v: f64) -> i64 {
    if v.is_finite() {
        (v * QUANTUM).round() as i64
    } else {
        i64::MIN
    }
}

/// Min-max scaler over one ranking round. A zero range maps everything to 0.
struct MinMax {
    min: f64,
    range: f64,
}

impl MinMax {
    fn over(values: impl Iterator<Item = f64>) -> Self {
        let (min, max) = values
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        if min.is_finite() && max > min {
            Self {
                min,
                range: max - min,
            }
        } else {
            Self { min: 0.0, range: 0.0 }
        }
    }

    fn apply(&self, v: f64) -> f64 {
        if self.range == 0.0 || !v.is_finite() {
            0.0
        } else {
            (v - self.min) / self.range
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ranker {
    weights: RankingWeights,
}

impl Ranker {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Composite scores aligned with `scored`.
    pub fn composite_scores(&self, scored: &[ScoredCandidate]) -> Vec<f64> {
        let w = &self.weights;
        let er = MinMax::over(scored.iter().map(ScoredCandidate::expected_return));
        let dd = MinMax::over(scored.iter().map(ScoredCandidate::drawdown));

        scored
            .iter()
            .map(|s| {
                w.expected_return * er.apply(s.expected_return())
                    - w.drawdown * dd.apply(s.drawdown())
                    + w.intent_alignment * s.intent_alignment
                    - w.novelty * s.novelty_penalty
            })
            .collect()
    }

    /// Orders `scored` and picks the winner.
    ///
    /// A fallback candidate wins only as the sole survivor, or when the
    /// operator's conservative mode asks for it.
    #[instrument(skip_all, target = "ranker", fields(candidates = scored.len(), conservative = conservative))]
    pub fn select_winner(
        &self,
        cycle_id: CycleId,
        scope: &str,
        scored: &[ScoredCandidate],
        conservative: bool,
        now_ms: u64,
    ) -> Result<Ranking, NoViableCandidateError> {
        if scored.is_empty() {
            error!(target: "ranker", alert = true, %cycle_id, "{}", NoViableCandidateError);
            return Err(NoViableCandidateError);
        }

        let composites = self.composite_scores(scored);
        let mut order: Vec<usize> = (0..scored.len()).collect();
        order.sort_by(|&a, &b| Self::compare(scored, &composites, a, b));

        let standings: Vec<Standing> = order
            .iter()
            .map(|&i| Standing {
                candidate_id: scored[i].candidate.id,
                composite_score: composites[i],
            })
            .collect();

        let fallback_pos = order.iter().position(|&i| scored[i].candidate.is_fallback);
        let first_real = order.iter().position(|&i| !scored[i].candidate.is_fallback);

        let mut reason_trace = Vec::new();
        let pos = match (conservative, fallback_pos, first_real) {
            (true, Some(p), _) => {
                reason_trace.push("conservative mode: fallback preferred by operator".to_string());
                p
            }
            (_, _, Some(p)) => p,
            (_, Some(p), None) => {
                reason_trace.push("fallback is the sole surviving candidate".to_string());
                p
            }
            (_, None, None) => return Err(NoViableCandidateError),
        };

        let idx = order[pos];
        let winner = &scored[idx];
        reason_trace.insert(
            0,
            format!(
                "rank {} of {}: composite {:.6} (return {:.6}, drawdown {:.6}, alignment {:.3}, novelty {:.3})",
                pos + 1,
                scored.len(),
                composites[idx],
                winner.expected_return(),
                winner.drawdown(),
                winner.intent_alignment,
                winner.novelty_penalty,
            ),
        );
        if let Some(&next) = order.get(pos + 1)
            && quantize(composites[next]) == quantize(composites[idx])
        {
            reason_trace.push(format!(
                "tie on composite with candidate {} broken by {}",
                scored[next].candidate.id,
                Self::tie_breaker(&scored[idx], &scored[next]),
            ));
        }
        reason_trace.push(format!(
            "{} from source {} (ordinal {})",
            winner.candidate.kind, winner.candidate.source, winner.candidate.ordinal
        ));

        debug!(
            winner = %winner.candidate.id,
            kind = %winner.candidate.kind,
            rank = pos + 1,
            "winner selected"
        );

        Ok(Ranking {
            decision: Decision {
                cycle_id,
                scope: scope.to_string(),
                rank: (pos + 1) as u32,
                composite_score: composites[idx],
                winner: winner.clone(),
                reason_trace,
                decided_at_ms: now_ms,
            },
            standings,
        })
    }

    fn compare(scored: &[ScoredCandidate], composites: &[f64], a: usize, b: usize) -> Ordering {
        let (sa, sb) = (&scored[a], &scored[b]);
        quantize(composites[b])
            .cmp(&quantize(composites[a]))
            .then_with(|| quantize(sb.intent_alignment).cmp(&quantize(sa.intent_alignment)))
            .then_with(|| quantize(sa.novelty_penalty).cmp(&quantize(sb.novelty_penalty)))
            .then_with(|| sa.candidate.ordinal.cmp(&sb.candidate.ordinal))
    }

    fn tie_breaker(winner: &ScoredCandidate, runner_up: &ScoredCandidate) -> &'static str {
        if quantize(winner.intent_alignment) != quantize(runner_up.intent_alignment) {
            "intent alignment"
        } else if quantize(winner.novelty_penalty) != quantize(runner_up.novelty_penalty) {
            "novelty penalty"
        } else {
            "generation order"
        }
    }
}
