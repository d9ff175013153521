use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Context, Decision, Intent, ScoredCandidate};

/// Monotonic cycle identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(pub u64);

impl CycleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a proposal source's output was not used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DegradeReason {
    Timeout { source: String },
    LowConfidence { source: String, confidence: f64, min: f64 },
    Malformed { source: String, detail: String },
    Failed { source: String, detail: String },
    /// Every source answered but nothing survived dedup.
    Empty,
}

/// Reference to one prompt/response exchange with a proposal source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRef {
    pub source: String,
    /// SHA-256 of prompt and response; `None` for sources without a transcript.
    pub digest: Option<String>,
    pub confidence: Option<f64>,
    pub accepted: bool,
    pub candidates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    /// The fallback candidate stands in for generated ones.
    pub degraded: bool,
    pub degrade_reasons: Vec<DegradeReason>,
    pub transcripts: Vec<TranscriptRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub candidate_id: Uuid,
    pub composite_score: f64,
}

/// Write-once justification for a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub cycle_id: CycleId,
    pub scope: String,
    pub context: Context,
    pub intent: Intent,
    pub generation: GenerationSummary,
    /// Candidates that passed the risk gate.
    pub accepted: Vec<ScoredCandidate>,
    /// Candidates filtered out, each with its violated rule ids.
    pub rejected: Vec<ScoredCandidate>,
    /// Composite order over `accepted`, best first.
    pub standings: Vec<Standing>,
    pub decision: Decision,
    pub conservative_mode: bool,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub cycle_id: CycleId,
    /// When the effects were observed; later observations replace earlier ones.
    pub observed_at_ms: u64,
    /// Realized PnL or mitigation metric.
    pub realized_metric: f64,
    pub success: bool,
    #[serde(default)]
    pub critique_summary: String,
}

/// Stored row as returned by audit queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub record: AuditRecord,
    pub digest: String,
    pub prev_digest: Option<String>,
    pub outcome: Option<OutcomeRecord>,
}
