use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};

use crate::ranker::RankingWeights;
use crate::validator::risk_gate::HardConstraint;

/// Tunables of the decision pipeline itself.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Maximum age of a sentiment or telemetry record used to build a context.
    pub freshness_window_ms: u64,

    /// K: upper bound on distinct candidates kept per cycle.
    pub max_candidates: usize,

    /// Per proposal source. A source that exceeds it contributes nothing.
    pub proposal_timeout_ms: u64,

    /// Proposals reporting a lower confidence are discarded.
    pub min_proposal_confidence: f64,

    /// Per candidate scoring call. A timeout drops only that candidate.
    pub scoring_timeout_ms: u64,

    /// Concurrent scoring calls per cycle.
    pub scoring_fan_out: usize,

    /// w1..w4 of the composite score.
    pub weights: RankingWeights,

    /// How long a losing candidate signature keeps penalizing look-alikes.
    pub novelty_lookback_ms: u64,

    /// Global hard constraints enforced on every non-fallback candidate.
    pub hard_constraints: Vec<HardConstraint>,

    /// Initial value of the operator's conservative-mode override.
    pub conservative_mode: bool,
}

impl PipelineConfig {
    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }

    pub fn scoring_timeout(&self) -> Duration {
        Duration::from_millis(self.scoring_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: 30_000,
            max_candidates: 5,
            proposal_timeout_ms: 2_000,
            min_proposal_confidence: 0.5,
            scoring_timeout_ms: 1_500,
            scoring_fan_out: 4,
            weights: RankingWeights::default(),
            novelty_lookback_ms: 86_400_000,
            hard_constraints: vec![
                HardConstraint::FullShutdownRequiresApproval,
                HardConstraint::KillSwitchRequired,
            ],
            conservative_mode: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Audit store connection string.
    pub database_url: String,

    /// Emit JSON logs (production).
    pub json_logs: bool,

    /// Scope the daemon's tick loop drives.
    pub scope: String,

    /// Cadence of decision cycles.
    pub cycle_interval_ms: u64,

    /// Bounded queue between outcome attachment and the memory store.
    /// When full, learning updates are dropped (never the decision path).
    pub feedback_queue_capacity: usize,

    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = PipelineConfig::default();

        let hard_constraints = match lookup("HARD_CONSTRAINTS") {
            Some(raw) => parse_constraints(&raw)?,
            None => d.hard_constraints.clone(),
        };

        let pipeline = PipelineConfig {
            freshness_window_ms: parse_or(&lookup, "FRESHNESS_WINDOW_MS", d.freshness_window_ms)?,
            max_candidates: parse_or(&lookup, "MAX_CANDIDATES", d.max_candidates)?.max(1),
            proposal_timeout_ms: parse_or(&lookup, "PROPOSAL_TIMEOUT_MS", d.proposal_timeout_ms)?,
            min_proposal_confidence: parse_fraction(
                &lookup,
                "MIN_PROPOSAL_CONFIDENCE",
                d.min_proposal_confidence,
            )?,
            scoring_timeout_ms: parse_or(&lookup, "SCORING_TIMEOUT_MS", d.scoring_timeout_ms)?,
            scoring_fan_out: parse_or(&lookup, "SCORING_FAN_OUT", d.scoring_fan_out)?.max(1),
            weights: RankingWeights {
                expected_return: parse_weight(
                    &lookup,
                    "RANK_W_RETURN",
                    d.weights.expected_return,
                )?,
                drawdown: parse_weight(&lookup, "RANK_W_DRAWDOWN", d.weights.drawdown)?,
                intent_alignment: parse_weight(
                    &lookup,
                    "RANK_W_ALIGNMENT",
                    d.weights.intent_alignment,
                )?,
                novelty: parse_weight(&lookup, "RANK_W_NOVELTY", d.weights.novelty)?,
            },
            novelty_lookback_ms: parse_or(&lookup, "NOVELTY_LOOKBACK_MS", d.novelty_lookback_ms)?,
            hard_constraints,
            conservative_mode: parse_or(&lookup, "CONSERVATIVE_MODE", d.conservative_mode)?,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://strategist_dev.db?mode=rwc".to_string()),
            json_logs: lookup("APP_ENV").as_deref() == Some("production"),
            scope: lookup("STRATEGIST_SCOPE").unwrap_or_else(|| "default".to_string()),
            cycle_interval_ms: parse_or(&lookup, "CYCLE_INTERVAL_MS", 1_000u64)?.max(10),
            feedback_queue_capacity: parse_or(&lookup, "FEEDBACK_QUEUE_CAPACITY", 256usize)?
                .max(1),
            pipeline,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

/// Ranking weights must be finite; NaN or infinities poison every composite.
fn parse_weight<F>(lookup: &F, key: &str, default: f64) -> anyhow::Result<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let w = parse_or(lookup, key, default)?;
    if !w.is_finite() {
        bail!("invalid value for {key}: weight must be finite, got {w}");
    }
    Ok(w)
}

/// A finite value within `[0, 1]`.
fn parse_fraction<F>(lookup: &F, key: &str, default: f64) -> anyhow::Result<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let v = parse_or(lookup, key, default)?;
    if !(v.is_finite() && (0.0..=1.0).contains(&v)) {
        bail!("invalid value for {key}: expected a number in [0, 1], got {v}");
    }
    Ok(v)
}

fn parse_constraints(raw: &str) -> anyhow::Result<Vec<HardConstraint>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<HardConstraint>().context("invalid HARD_CONSTRAINTS entry"))
        .collect()
}
