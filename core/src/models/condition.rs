use std::fmt;

use serde::{Deserialize, Serialize};

use super::Context;

/// Observable quantity a predicate is written against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Sentiment,
    SentimentConfidence,
    Rsi,
    Price,
    Volatility,
    /// System gauge from the telemetry feed, looked up by key.
    Telemetry(String),
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Sentiment => f.write_str("sentiment"),
            Metric::SentimentConfidence => f.write_str("sentiment_confidence"),
            Metric::Rsi => f.write_str("rsi"),
            Metric::Price => f.write_str("price"),
            Metric::Volatility => f.write_str("volatility"),
            Metric::Telemetry(key) => write!(f, "telemetry.{key}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    fn is_upper_bound(self) -> bool {
        matches!(self, Comparator::Lt | Comparator::Le)
    }

    fn eval(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        })
    }
}

/// Predicate descriptor: `<asset>.<metric> <cmp> <threshold>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub asset: String,
    pub metric: Metric,
    pub cmp: Comparator,
    pub threshold: f64,
}

impl Condition {
    pub fn new(asset: impl Into<String>, metric: Metric, cmp: Comparator, threshold: f64) -> Self {
        Self {
            asset: asset.into(),
            metric,
            cmp,
            threshold,
        }
    }

    /// Canonical text form; thresholds are rounded so that materially identical
    /// conditions share a signature.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}{}{:.4}",
            self.asset, self.metric, self.cmp, self.threshold
        )
    }

    /// True when every state satisfying `self` also satisfies `other`.
    pub fn implies(&self, other: &Condition) -> bool {
        if self.asset != other.asset
            || self.metric != other.metric
            || self.cmp.is_upper_bound() != other.cmp.is_upper_bound()
        {
            return false;
        }

        let (a, b) = (self.threshold, other.threshold);
        match (self.cmp, other.cmp) {
            (Comparator::Le, Comparator::Lt) => a < b,
            (Comparator::Ge, Comparator::Gt) => a > b,
            (c, _) if c.is_upper_bound() => a <= b,
            _ => a >= b,
        }
    }

    /// Evaluates against a context; `None` when the metric is not observed.
    pub fn holds(&self, ctx: &Context) -> Option<bool> {
        let value = match &self.metric {
            Metric::Sentiment => ctx.sentiment_for(&self.asset)?.score,
            Metric::SentimentConfidence => ctx.sentiment_for(&self.asset)?.confidence,
            Metric::Rsi => ctx.asset(&self.asset)?.rsi?,
            Metric::Price => ctx.asset(&self.asset)?.price,
            Metric::Volatility => ctx.asset(&self.asset)?.volatility?,
            Metric::Telemetry(key) => *ctx.telemetry.get(key)?,
        };
        Some(self.cmp.eval(value, self.threshold))
    }

    pub fn is_well_formed(&self) -> bool {
        !self.asset.trim().is_empty() && self.threshold.is_finite()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}
