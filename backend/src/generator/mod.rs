//! Candidate generation.
//!
//! Consults every proposal source concurrently under a per-source timeout and
//! the cycle's cancellation token, merges their drafts in source order, collapses
//! duplicates and truncates to K. Whenever nothing usable comes back the single
//! conservative default is returned instead, so a cycle always has a candidate.

pub mod fallback;
pub mod llm;
pub mod rules;
pub mod source;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use corelib::{
    CandidateDraft, CandidatePolicy, Context, DegradeReason, GenerationSummary, Intent,
    TranscriptRef, digest,
};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::scope::{CallError, Cancelled, CycleToken};
use fallback::conservative_default;
use source::{ProposalError, ProposalSource};

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub max_candidates: usize,
    pub proposal_timeout: Duration,
    pub min_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct Generation {
    /// Ordered, 1..=K entries; exactly one fallback when degraded.
    pub candidates: Vec<CandidatePolicy>,
    pub summary: GenerationSummary,
}

pub struct CandidateGenerator {
    sources: Vec<Arc<dyn ProposalSource>>,
    cfg: GeneratorConfig,
}

impl CandidateGenerator {
    pub fn new(sources: Vec<Arc<dyn ProposalSource>>, cfg: GeneratorConfig) -> Self {
        Self {
            sources,
            cfg: GeneratorConfig {
                max_candidates: cfg.max_candidates.max(1),
                ..cfg
            },
        }
    }

    #[instrument(
        skip_all,
        target = "generator",
        fields(sources = self.sources.len(), max_candidates = self.cfg.max_candidates)
    )]
    pub async fn propose(
        &self,
        ctx: &Context,
        intent: &Intent,
        token: &CycleToken,
    ) -> Result<Generation, Cancelled> {
        let calls = self.sources.iter().map(|src| async move {
            let res = token
                .bounded(self.cfg.proposal_timeout, src.propose(ctx, intent))
                .await;
            (src.id().to_string(), res)
        });
        let results = join_all(calls).await;

        let mut summary = GenerationSummary::default();
        let mut drafts: Vec<(String, CandidateDraft)> = Vec::new();

        for (source, res) in results {
            match res {
                Err(CallError::Cancelled) => return Err(Cancelled),
                Err(CallError::Timeout) => {
                    warn!(%source, "proposal source timed out");
                    summary.transcripts.push(unanswered(&source));
                    summary
                        .degrade_reasons
                        .push(DegradeReason::Timeout { source });
                }
                Ok(Err(ProposalError::Malformed { detail, transcript })) => {
                    warn!(%source, %detail, "proposal output rejected as non-conformant");
                    summary.transcripts.push(TranscriptRef {
                        digest: transcript
                            .as_ref()
                            .map(|t| digest::transcript_digest(&t.prompt, &t.response)),
                        ..unanswered(&source)
                    });
                    summary
                        .degrade_reasons
                        .push(DegradeReason::Malformed { source, detail });
                }
                Ok(Err(ProposalError::Unavailable(e))) => {
                    warn!(%source, error = %format!("{e:#}"), "proposal source failed");
                    summary.transcripts.push(unanswered(&source));
                    summary.degrade_reasons.push(DegradeReason::Failed {
                        source,
                        detail: format!("{e:#}"),
                    });
                }
                Ok(Ok(p)) if !p.confidence.is_finite() => {
                    warn!(%source, "proposal reported a non-finite confidence");
                    summary.transcripts.push(TranscriptRef {
                        digest: p
                            .transcript
                            .as_ref()
                            .map(|t| digest::transcript_digest(&t.prompt, &t.response)),
                        ..unanswered(&source)
                    });
                    summary.degrade_reasons.push(DegradeReason::Malformed {
                        source,
                        detail: "non-finite confidence".to_string(),
                    });
                }
                Ok(Ok(p)) => {
                    let accepted = p.confidence >= self.cfg.min_confidence;
                    summary.transcripts.push(TranscriptRef {
                        source: source.clone(),
                        digest: p
                            .transcript
                            .as_ref()
                            .map(|t| digest::transcript_digest(&t.prompt, &t.response)),
                        confidence: Some(p.confidence),
                        accepted,
                        candidates: p.candidates.len(),
                    });

                    if !accepted {
                        info!(
                            %source,
                            confidence = p.confidence,
                            min = self.cfg.min_confidence,
                            "proposal below confidence threshold"
                        );
                        summary.degrade_reasons.push(DegradeReason::LowConfidence {
                            source,
                            confidence: p.confidence,
                            min: self.cfg.min_confidence,
                        });
                        continue;
                    }

                    drafts.extend(p.candidates.into_iter().map(|d| (source.clone(), d)));
                }
            }
        }

        let candidates = self.merge(drafts, &mut summary);

        if candidates.is_empty() {
            if summary.degrade_reasons.is_empty() {
                summary.degrade_reasons.push(DegradeReason::Empty);
            }
            summary.degraded = true;
            warn!(
                reasons = summary.degrade_reasons.len(),
                "generation degraded; substituting conservative default"
            );
            return Ok(Generation {
                candidates: vec![conservative_default(intent, 0)],
                summary,
            });
        }

        debug!(count = candidates.len(), "candidates generated");
        Ok(Generation {
            candidates,
            summary,
        })
    }

    /// Keeps the first occurrence of each signature, in source order, up to K.
    /// Drafts with fields the audit trail cannot store are dropped as malformed.
    fn merge(
        &self,
        drafts: Vec<(String, CandidateDraft)>,
        summary: &mut GenerationSummary,
    ) -> Vec<CandidatePolicy> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for (source, draft) in drafts {
            if out.len() >= self.cfg.max_candidates {
                break;
            }
            if let Some(field) = draft.malformed_field() {
                warn!(%source, field, "dropping draft with non-finite field");
                summary.degrade_reasons.push(DegradeReason::Malformed {
                    source,
                    detail: format!("non-finite {field}"),
                });
                continue;
            }
            let sig = draft.signature();
            if !seen.insert(sig.clone()) {
                debug!(%source, signature = %sig, "collapsing duplicate candidate");
                continue;
            }
            let ordinal = out.len() as u32;
            out.push(CandidatePolicy::from_draft(draft, ordinal, &source));
        }

        out
    }
}

fn unanswered(source: &str) -> TranscriptRef {
    TranscriptRef {
        source: source.to_string(),
        digest: None,
        confidence: None,
        accepted: false,
        candidates: 0,
    }
}
