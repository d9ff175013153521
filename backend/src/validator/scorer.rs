use async_trait::async_trait;
use corelib::{CandidatePolicy, Context, Intent, Metric, PolicyKind, ScoreMetrics};

/// External scoring/backtest capability.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(
        &self,
        candidate: &CandidatePolicy,
        ctx: &Context,
        intent: &Intent,
    ) -> anyhow::Result<ScoreMetrics>;
}

/// Closed-form estimate used when no backtester is wired in.
///
/// Edge comes from the signal the policy kind trades on and is damped by how
/// many of the candidate's entry conditions hold right now. Drawdown is the
/// exposure times the stop distance (or three volatilities without a stop),
/// capped by the kill switch.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicScorer {
    pub default_volatility: f64,
    /// Threat gauge level treated as maximal mitigation value.
    pub threat_scale: f64,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            default_volatility: 0.05,
            threat_scale: 20.0,
        }
    }
}

impl HeuristicScorer {
    fn assets<'a>(&self, candidate: &'a CandidatePolicy, intent: &'a Intent) -> Vec<&'a str> {
        let mut assets: Vec<&str> = candidate
            .entry_conditions
            .iter()
            .map(|c| c.asset.as_str())
            .collect();
        if assets.is_empty() {
            assets = intent.target_assets.iter().map(String::as_str).collect();
        }
        assets.sort_unstable();
        assets.dedup();
        assets
    }

    fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
        let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    fn edge(&self, candidate: &CandidatePolicy, ctx: &Context, assets: &[&str]) -> f64 {
        match candidate.kind {
            PolicyKind::Momentum => Self::mean(
                assets
                    .iter()
                    .filter_map(|a| ctx.sentiment_for(a))
                    .map(|s| s.score * s.confidence),
            )
            .unwrap_or(0.0),
            PolicyKind::MeanReversion => Self::mean(
                assets
                    .iter()
                    .filter_map(|a| ctx.asset(a)?.rsi)
                    .map(|rsi| (50.0 - rsi) / 100.0),
            )
            .unwrap_or(0.0),
            PolicyKind::Arbitrage => 0.01,
            PolicyKind::Contain | PolicyKind::Isolate | PolicyKind::Deceive => {
                let threat = candidate
                    .entry_conditions
                    .iter()
                    .find_map(|c| match &c.metric {
                        Metric::Telemetry(key) => ctx.telemetry.get(key).copied(),
                        _ => None,
                    })
                    .unwrap_or(0.0);
                (threat / self.threat_scale).clamp(0.0, 1.0) * 0.05
            }
            PolicyKind::HoldDefault => 0.0,
        }
    }
}

#[async_trait]
impl Scorer for HeuristicScorer {
    async fn score(
        &self,
        candidate: &CandidatePolicy,
        ctx: &Context,
        intent: &Intent,
    ) -> anyhow::Result<ScoreMetrics> {
        let assets = self.assets(candidate, intent);
        let exposure = candidate.sizing.exposure;
        if !exposure.is_finite() {
            anyhow::bail!("candidate {} has non-finite exposure", candidate.id);
        }

        let observed: Vec<bool> = candidate
            .entry_conditions
            .iter()
            .filter_map(|c| c.holds(ctx))
            .collect();
        let holding = if observed.is_empty() {
            1.0
        } else {
            observed.iter().filter(|h| **h).count() as f64 / observed.len() as f64
        };

        let edge = self.edge(candidate, ctx, &assets) * (0.5 + 0.5 * holding);
        let expected_return = match candidate.kind {
            // Defensive policies are valued by mitigation, not position size.
            PolicyKind::Contain | PolicyKind::Isolate | PolicyKind::Deceive => edge,
            _ => exposure * edge,
        };

        let vol = Self::mean(
            assets
                .iter()
                .filter_map(|a| ctx.asset(a)?.volatility)
                .filter(|v| v.is_finite()),
        )
        .unwrap_or(self.default_volatility);
        let mut drawdown = exposure * candidate.sizing.stop_loss.unwrap_or(3.0 * vol);
        if let Some(ks) = &candidate.kill_switch {
            drawdown = drawdown.min(ks.max_drawdown);
        }

        Ok(ScoreMetrics {
            expected_return,
            drawdown: drawdown.max(0.0),
        })
    }
}
