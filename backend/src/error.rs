use corelib::{CycleId, IntentError};
use thiserror::Error;

/// A cycle input is missing or older than the freshness window.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("stale input `{feed}`: age {age_ms:?} ms exceeds freshness window {window_ms} ms")]
pub struct StaleInputError {
    pub feed: &'static str,
    /// `None` when the feed has never delivered a record.
    pub age_ms: Option<u64>,
    pub window_ms: u64,
}

/// Validation left nothing to rank. The fallback should make this unreachable.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("no viable candidate survived validation")]
pub struct NoViableCandidateError;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("cycle {0} already committed")]
    DuplicateCycle(CycleId),

    #[error("audit storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("no audit record for cycle {0}")]
    UnknownCycle(CycleId),

    #[error("outcome for cycle {0} has a non-finite realized metric")]
    NonFiniteMetric(CycleId),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// Structural failures that abort a cycle. None of them leave partial state.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    StaleInput(#[from] StaleInputError),

    #[error("no intent has been submitted for scope `{scope}`")]
    NoIntent { scope: String },

    #[error("cycle superseded in scope `{scope}`")]
    Superseded { scope: String },

    #[error(transparent)]
    NoViableCandidate(#[from] NoViableCandidateError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error("intent rejected at boundary: {0}")]
    InvalidIntent(#[from] IntentError),
}
