use corelib::{CandidatePolicy, Escalation, Intent, KillSwitch, PolicyKind, Sizing};
use uuid::Uuid;

pub const FALLBACK_SOURCE: &str = "fallback";

/// The always-safe candidate: hold, no new exposure, alert an operator.
///
/// Zero exposure, a stop equal to the limit and a zero-drawdown kill switch
/// satisfy every risk limit an intent can validly carry.
pub fn conservative_default(intent: &Intent, ordinal: u32) -> CandidatePolicy {
    CandidatePolicy {
        id: Uuid::new_v4(),
        ordinal,
        source: FALLBACK_SOURCE.to_string(),
        kind: PolicyKind::HoldDefault,
        entry_conditions: vec![],
        exit_conditions: vec![],
        sizing: Sizing {
            exposure: 0.0,
            stop_loss: Some(intent.risk_limits.stop_loss),
        },
        escalation: vec![Escalation::Alert {
            channel: "operator".to_string(),
        }],
        kill_switch: Some(KillSwitch {
            max_drawdown: 0.0,
            halt_on_feed_loss: true,
        }),
        rationale: "conservative default: hold positions and alert".to_string(),
        is_fallback: true,
    }
}
