use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Condition;

/// Hard limits the user attached to the intent. Fractions of capital in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_drawdown: f64,
    pub stop_loss: f64,
    pub max_exposure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingRules {
    /// Preferred position size as a fraction of capital.
    pub base_fraction: f64,
    /// Scale positions by sentiment confidence.
    #[serde(default)]
    pub scale_by_confidence: bool,
}

/// Structured user intent, produced by the intent-extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub target_assets: BTreeSet<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub sizing: SizingRules,
    pub risk_limits: RiskLimits,
    pub horizon_ms: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum IntentError {
    #[error("intent names no target assets")]
    NoTargets,

    #[error("risk limit `{name}` must be a finite fraction in [0, 1], got {value}")]
    InvalidLimit { name: &'static str, value: f64 },

    #[error("sizing base_fraction must be a finite fraction in [0, 1], got {0}")]
    InvalidSizing(f64),

    #[error("horizon must be positive")]
    ZeroHorizon,

    #[error("condition #{index} is malformed: {detail}")]
    MalformedCondition { index: usize, detail: String },
}

fn fraction(name: &'static str, value: f64) -> Result<(), IntentError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(IntentError::InvalidLimit { name, value })
    }
}

impl Intent {
    /// Boundary check. Malformed intents never enter the pipeline.
    pub fn validate(&self) -> Result<(), IntentError> {
        if self.target_assets.is_empty() || self.target_assets.iter().any(|a| a.trim().is_empty())
        {
            return Err(IntentError::NoTargets);
        }

        fraction("max_drawdown", self.risk_limits.max_drawdown)?;
        fraction("stop_loss", self.risk_limits.stop_loss)?;
        fraction("max_exposure", self.risk_limits.max_exposure)?;

        let base = self.sizing.base_fraction;
        if !(base.is_finite() && (0.0..=1.0).contains(&base)) {
            return Err(IntentError::InvalidSizing(base));
        }

        if self.horizon_ms == 0 {
            return Err(IntentError::ZeroHorizon);
        }

        for (index, c) in self.conditions.iter().enumerate() {
            if !c.is_well_formed() {
                return Err(IntentError::MalformedCondition {
                    index,
                    detail: c.signature(),
                });
            }
        }

        Ok(())
    }

    /// Fraction of this intent's conditions satisfied by `stated`.
    /// An intent without conditions is trivially aligned.
    pub fn alignment_with(&self, stated: &[Condition]) -> f64 {
        if self.conditions.is_empty() {
            return 1.0;
        }
        let met = self
            .conditions
            .iter()
            .filter(|want| stated.iter().any(|c| c.implies(want)))
            .count();
        met as f64 / self.conditions.len() as f64
    }
}
