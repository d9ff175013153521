//! Hard-constraint predicate over candidates.
//!
//! The gate is pure: same candidate, limits and constraints always yield the
//! same set of violated rule ids. An empty set means the candidate may run.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use corelib::{CandidatePolicy, PolicyKind, RiskLimits};
use thiserror::Error;

pub const LIMIT_MAX_DRAWDOWN: &str = "limit.max_drawdown";
pub const LIMIT_MAX_DRAWDOWN_PROJECTED: &str = "limit.max_drawdown.projected";
pub const LIMIT_STOP_LOSS: &str = "limit.stop_loss";
pub const LIMIT_MAX_EXPOSURE: &str = "limit.max_exposure";
pub const GLOBAL_FULL_SHUTDOWN: &str = "global.full_shutdown_requires_approval";
pub const GLOBAL_KILL_SWITCH: &str = "global.kill_switch_required";
pub const GLOBAL_FORBIDDEN_KIND: &str = "global.forbidden_kind";
pub const GLOBAL_MAX_EXPOSURE: &str = "global.max_exposure";
pub const SCORING_UNAVAILABLE: &str = "scoring_unavailable";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HardConstraint {
    /// `FullShutdown` escalation only with the operator's approval flag set.
    FullShutdownRequiresApproval,
    /// Every candidate must carry a kill switch.
    KillSwitchRequired,
    /// Exposure cap applied on top of the intent's own limit.
    MaxExposure(f64),
    ForbidKind(PolicyKind),
}

impl fmt::Display for HardConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardConstraint::FullShutdownRequiresApproval => f.write_str("full_shutdown_requires_approval"),
            HardConstraint::KillSwitchRequired => f.write_str("kill_switch_required"),
            HardConstraint::MaxExposure(cap) => write!(f, "max_exposure:{cap}"),
            HardConstraint::ForbidKind(kind) => write!(f, "forbid:{kind}"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConstraintParseError {
    #[error("unknown constraint `{0}`")]
    Unknown(String),
    #[error("invalid exposure cap `{0}`")]
    InvalidCap(String),
    #[error("unknown policy kind `{0}`")]
    UnknownKind(String),
    #[error("the conservative default kind cannot be forbidden")]
    ForbidsFallback,
}

impl FromStr for HardConstraint {
    type Err = ConstraintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            None => match s {
                "full_shutdown_requires_approval" => Ok(HardConstraint::FullShutdownRequiresApproval),
                "kill_switch_required" => Ok(HardConstraint::KillSwitchRequired),
                other => Err(ConstraintParseError::Unknown(other.to_string())),
            },
            Some(("max_exposure", raw)) => match raw.trim().parse::<f64>() {
                Ok(cap) if cap.is_finite() && cap >= 0.0 => Ok(HardConstraint::MaxExposure(cap)),
                _ => Err(ConstraintParseError::InvalidCap(raw.to_string())),
            },
            Some(("forbid", raw)) => {
                let kind: PolicyKind = serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
                    .map_err(|_| ConstraintParseError::UnknownKind(raw.to_string()))?;
                if kind == PolicyKind::HoldDefault {
                    return Err(ConstraintParseError::ForbidsFallback);
                }
                Ok(HardConstraint::ForbidKind(kind))
            }
            Some(_) => Err(ConstraintParseError::Unknown(s.to_string())),
        }
    }
}

/// Process-wide constraints plus the operator's approval flag, as seen by one cycle.
#[derive(Debug, Clone, Default)]
pub struct GlobalConstraints {
    pub rules: Vec<HardConstraint>,
    pub full_shutdown_approved: bool,
}

pub trait RiskGate: Send + Sync {
    /// Violated rule ids; empty when the candidate is compliant.
    fn evaluate(
        &self,
        candidate: &CandidatePolicy,
        limits: &RiskLimits,
        globals: &GlobalConstraints,
    ) -> BTreeSet<String>;
}

/// Intent limits first, then every configured global constraint.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRiskGate;

/// NaN never passes a limit.
fn exceeds(value: f64, limit: f64) -> bool {
    !value.is_finite() || value > limit
}

impl RiskGate for StandardRiskGate {
    fn evaluate(
        &self,
        candidate: &CandidatePolicy,
        limits: &RiskLimits,
        globals: &GlobalConstraints,
    ) -> BTreeSet<String> {
        let mut violated = BTreeSet::new();
        let exposure = candidate.sizing.exposure;
        let takes_risk = !exposure.is_finite() || exposure > 0.0;

        match &candidate.kill_switch {
            Some(ks) if exceeds(ks.max_drawdown, limits.max_drawdown) => {
                violated.insert(LIMIT_MAX_DRAWDOWN.to_string());
            }
            None if takes_risk => {
                violated.insert(LIMIT_MAX_DRAWDOWN.to_string());
            }
            _ => {}
        }

        if takes_risk {
            match candidate.sizing.stop_loss {
                Some(stop) if !exceeds(stop, limits.stop_loss) => {}
                _ => {
                    violated.insert(LIMIT_STOP_LOSS.to_string());
                }
            }
        }

        if exposure < 0.0 || exceeds(exposure, limits.max_exposure) {
            violated.insert(LIMIT_MAX_EXPOSURE.to_string());
        }

        for rule in &globals.rules {
            let breached = match rule {
                HardConstraint::FullShutdownRequiresApproval => {
                    candidate.requests_full_shutdown() && !globals.full_shutdown_approved
                }
                HardConstraint::KillSwitchRequired => candidate.kill_switch.is_none(),
                HardConstraint::MaxExposure(cap) => exceeds(exposure, *cap),
                HardConstraint::ForbidKind(kind) => candidate.kind == *kind,
            };
            if breached {
                violated.insert(global_rule_id(rule).to_string());
            }
        }

        violated
    }
}

fn global_rule_id(rule: &HardConstraint) -> &'static str {
    match rule {
        HardConstraint::FullShutdownRequiresApproval => GLOBAL_FULL_SHUTDOWN,
        HardConstraint::KillSwitchRequired => GLOBAL_KILL_SWITCH,
        HardConstraint::MaxExposure(_) => GLOBAL_MAX_EXPOSURE,
        HardConstraint::ForbidKind(_) => GLOBAL_FORBIDDEN_KIND,
    }
}
