use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Condition, CycleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Momentum,
    MeanReversion,
    Arbitrage,
    Contain,
    Isolate,
    Deceive,
    /// Hold positions and alert an operator. Only produced as the fallback.
    HoldDefault,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Momentum => "momentum",
            PolicyKind::MeanReversion => "mean_reversion",
            PolicyKind::Arbitrage => "arbitrage",
            PolicyKind::Contain => "contain",
            PolicyKind::Isolate => "isolate",
            PolicyKind::Deceive => "deceive",
            PolicyKind::HoldDefault => "hold_default",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sizing {
    /// Gross exposure as a fraction of capital.
    pub exposure: f64,
    /// Stop distance as a fraction of entry; `None` means no stop.
    #[serde(default)]
    pub stop_loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Escalation {
    Hedge { asset: String, ratio: f64 },
    Alert { channel: String },
    Isolate { target: String },
    FullShutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitch {
    /// Drawdown (fraction of capital) at which the policy unwinds itself.
    pub max_drawdown: f64,
    #[serde(default)]
    pub halt_on_feed_loss: bool,
}

/// Candidate as emitted by a proposal source, before the generator assigns
/// identity and order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDraft {
    pub kind: PolicyKind,
    #[serde(default)]
    pub entry: Vec<Condition>,
    #[serde(default)]
    pub exit: Vec<Condition>,
    pub sizing: Sizing,
    #[serde(default)]
    pub escalation: Vec<Escalation>,
    #[serde(default)]
    pub kill_switch: Option<KillSwitch>,
    #[serde(default)]
    pub rationale: String,
}

impl CandidateDraft {
    pub fn signature(&self) -> CandidateSignature {
        CandidateSignature::new(self.kind, &self.entry, &self.exit)
    }

    /// First field that cannot be stored faithfully, if any. Non-finite
    /// numbers do not survive the audit trail's JSON form.
    pub fn malformed_field(&self) -> Option<&'static str> {
        if !self.entry.iter().all(Condition::is_well_formed) {
            return Some("entry condition");
        }
        if !self.exit.iter().all(Condition::is_well_formed) {
            return Some("exit condition");
        }
        if !self.sizing.exposure.is_finite() {
            return Some("sizing.exposure");
        }
        if self.sizing.stop_loss.is_some_and(|s| !s.is_finite()) {
            return Some("sizing.stop_loss");
        }
        if self.kill_switch.as_ref().is_some_and(|k| !k.max_drawdown.is_finite()) {
            return Some("kill_switch.max_drawdown");
        }
        let bad_hedge = self
            .escalation
            .iter()
            .any(|e| matches!(e, Escalation::Hedge { ratio, .. } if !ratio.is_finite()));
        if bad_hedge {
            return Some("escalation.hedge.ratio");
        }
        None
    }
}

/// `kind` plus the sorted condition signatures; the unit of dedup and novelty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateSignature(String);

impl CandidateSignature {
    pub fn new(kind: PolicyKind, entry: &[Condition], exit: &[Condition]) -> Self {
        let sorted = |cs: &[Condition]| {
            let set: BTreeSet<String> = cs.iter().map(Condition::signature).collect();
            set.into_iter().collect::<Vec<_>>().join("&")
        };
        Self(format!("{}|{}|{}", kind, sorted(entry), sorted(exit)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CandidateSignature {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Immutable candidate for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePolicy {
    pub id: Uuid,
    /// Position in generation order; the last tie-breaker.
    pub ordinal: u32,
    /// Proposal source that produced it.
    pub source: String,
    pub kind: PolicyKind,
    pub entry_conditions: Vec<Condition>,
    pub exit_conditions: Vec<Condition>,
    pub sizing: Sizing,
    pub escalation: Vec<Escalation>,
    pub kill_switch: Option<KillSwitch>,
    pub rationale: String,
    pub is_fallback: bool,
}

impl CandidatePolicy {
    pub fn from_draft(draft: CandidateDraft, ordinal: u32, source: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            ordinal,
            source: source.to_string(),
            kind: draft.kind,
            entry_conditions: draft.entry,
            exit_conditions: draft.exit,
            sizing: draft.sizing,
            escalation: draft.escalation,
            kill_switch: draft.kill_switch,
            rationale: draft.rationale,
            is_fallback: false,
        }
    }

    pub fn signature(&self) -> CandidateSignature {
        CandidateSignature::new(self.kind, &self.entry_conditions, &self.exit_conditions)
    }

    pub fn requests_full_shutdown(&self) -> bool {
        self.escalation
            .iter()
            .any(|e| matches!(e, Escalation::FullShutdown))
    }
}

/// Output of the external scoring/backtest capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetrics {
    pub expected_return: f64,
    /// Projected peak-to-trough loss as a fraction of capital.
    pub drawdown: f64,
}

impl ScoreMetrics {
    pub fn is_finite(&self) -> bool {
        self.expected_return.is_finite() && self.drawdown.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: CandidatePolicy,
    /// `None` when scoring was unavailable.
    pub metrics: Option<ScoreMetrics>,
    pub intent_alignment: f64,
    pub novelty_penalty: f64,
    pub risk_violations: BTreeSet<String>,
}

impl ScoredCandidate {
    pub fn expected_return(&self) -> f64 {
        self.metrics.map(|m| m.expected_return).unwrap_or(0.0)
    }

    pub fn drawdown(&self) -> f64 {
        self.metrics.map(|m| m.drawdown).unwrap_or(0.0)
    }
}

/// The single authoritative output of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub cycle_id: CycleId,
    pub scope: String,
    /// 1-based position of the winner in composite-score order.
    pub rank: u32,
    pub composite_score: f64,
    pub winner: ScoredCandidate,
    pub reason_trace: Vec<String>,
    pub decided_at_ms: u64,
}

impl Decision {
    pub fn kind(&self) -> PolicyKind {
        self.winner.candidate.kind
    }

    pub fn is_fallback(&self) -> bool {
        self.winner.candidate.is_fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comparator, Metric};

    fn draft(entry: Vec<Condition>) -> CandidateDraft {
        CandidateDraft {
            kind: PolicyKind::Momentum,
            entry,
            exit: vec![],
            sizing: Sizing {
                exposure: 0.1,
                stop_loss: Some(0.02),
            },
            escalation: vec![],
            kill_switch: None,
            rationale: String::new(),
        }
    }

    #[test]
    fn signature_ignores_condition_order() {
        let a = Condition::new("SOL", Metric::Rsi, Comparator::Lt, 30.0);
        let b = Condition::new("SOL", Metric::Sentiment, Comparator::Gt, 0.5);
        assert_eq!(
            draft(vec![a.clone(), b.clone()]).signature(),
            draft(vec![b, a]).signature()
        );
    }

    #[test]
    fn non_finite_fields_are_reported() {
        let rsi = Condition::new("SOL", Metric::Rsi, Comparator::Lt, 30.0);
        assert_eq!(draft(vec![rsi.clone()]).malformed_field(), None);

        let mut d = draft(vec![rsi.clone()]);
        d.sizing.exposure = f64::NAN;
        assert_eq!(d.malformed_field(), Some("sizing.exposure"));

        let mut d = draft(vec![rsi.clone()]);
        d.kill_switch = Some(KillSwitch {
            max_drawdown: f64::INFINITY,
            halt_on_feed_loss: false,
        });
        assert_eq!(d.malformed_field(), Some("kill_switch.max_drawdown"));

        let mut d = draft(vec![rsi]);
        d.escalation.push(Escalation::Hedge {
            asset: "SOL".into(),
            ratio: f64::NEG_INFINITY,
        });
        assert_eq!(d.malformed_field(), Some("escalation.hedge.ratio"));

        let nan_threshold = Condition::new("SOL", Metric::Rsi, Comparator::Lt, f64::NAN);
        assert_eq!(draft(vec![nan_threshold]).malformed_field(), Some("entry condition"));
    }

    #[test]
    fn draft_json_uses_snake_case_kinds() {
        let json = r#"{"kind":"mean_reversion","sizing":{"exposure":0.1},"escalation":[{"action":"full_shutdown"}]}"#;
        let d: CandidateDraft = serde_json::from_str(json).unwrap();
        assert_eq!(d.kind, PolicyKind::MeanReversion);
        let policy = CandidatePolicy::from_draft(d, 0, "test");
        assert!(policy.requests_full_shutdown());
        assert!(!policy.is_fallback);
    }
}
