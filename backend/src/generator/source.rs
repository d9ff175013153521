use async_trait::async_trait;
use corelib::{CandidateDraft, Context, Intent};
use thiserror::Error;

/// Raw exchange with a model-backed source, kept for the audit digest.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub prompt: String,
    pub response: String,
}

#[derive(Debug, Clone)]
pub struct Proposal {
    pub candidates: Vec<CandidateDraft>,
    /// Source's own confidence in [0, 1].
    pub confidence: f64,
    pub transcript: Option<Transcript>,
}

#[derive(Debug, Error)]
pub enum ProposalError {
    /// Output was not JSON or did not match the candidate schema.
    #[error("non-conformant proposal: {detail}")]
    Malformed {
        detail: String,
        transcript: Option<Transcript>,
    },

    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

/// External strategy-proposal capability.
///
/// Implementations may call a model, a rule book, or several of either;
/// the generator only sees the drafts and the confidence.
#[async_trait]
pub trait ProposalSource: Send + Sync {
    /// Stable identifier recorded in the audit trail.
    fn id(&self) -> &str;

    async fn propose(&self, ctx: &Context, intent: &Intent) -> Result<Proposal, ProposalError>;
}
