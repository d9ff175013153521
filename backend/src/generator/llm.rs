//! Model-backed proposal source.
//!
//! Builds a prompt from the context and intent, asks an [`LlmClient`] for
//! candidates and parses the reply as strict JSON:
//!
//! ```json
//! {"confidence": 0.8, "candidates": [{"kind": "momentum", "entry": [...], "sizing": {...}}]}
//! ```
//!
//! Anything else is reported as malformed together with the transcript, so
//! the audit trail can show exactly what the model said.

use anyhow::Context as _;
use async_trait::async_trait;
use corelib::{CandidateDraft, Context, Intent};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::source::{Proposal, ProposalError, ProposalSource, Transcript};

#[derive(Debug, Clone, Serialize)]
pub struct LlmParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
}

impl Default for LlmParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.9,
            max_tokens: 1024,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str, params: &LlmParams) -> anyhow::Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LlmOutput {
    confidence: f64,
    candidates: Vec<CandidateDraft>,
}

const SYSTEM_PROMPT: &str = "You are a strategy proposer for an automated trading and threat-response desk. \
Reply ONLY with valid JSON, no prose, no code fences.";

pub struct LlmProposer<C: LlmClient> {
    id: String,
    client: C,
    params: LlmParams,
}

impl<C: LlmClient> LlmProposer<C> {
    pub fn new(id: impl Into<String>, client: C) -> Self {
        Self {
            id: id.into(),
            client,
            params: LlmParams::default(),
        }
    }

    pub fn with_params(mut self, params: LlmParams) -> Self {
        self.params = params;
        self
    }

    fn build_prompt(&self, ctx: &Context, intent: &Intent) -> String {
        let schema = json!({
            "confidence": "0..1",
            "candidates": [{
                "kind": "momentum|mean_reversion|arbitrage|contain|isolate|deceive",
                "entry": [{"asset": "SOL", "metric": "rsi", "cmp": "lt", "threshold": 30.0}],
                "exit": [],
                "sizing": {"exposure": 0.1, "stop_loss": 0.02},
                "escalation": [{"action": "alert", "channel": "soc"}],
                "kill_switch": {"max_drawdown": 0.05, "halt_on_feed_loss": true},
                "rationale": "short"
            }]
        });
        format!(
            "Propose at most 5 distinct candidate policies.\nOutput schema: {schema}\n\
             Intent: {intent}\nMarket: {market}\nSentiment: {sentiment}\nTelemetry: {telemetry}\n",
            intent = json!(intent),
            market = json!(ctx.market),
            sentiment = json!(ctx.sentiment.readings),
            telemetry = json!(ctx.telemetry),
        )
    }
}

/// Parses and sanity-checks a model reply.
fn parse_reply(reply: &str) -> Result<LlmOutput, String> {
    let out: LlmOutput = serde_json::from_str(reply.trim()).map_err(|e| e.to_string())?;

    if !(0.0..=1.0).contains(&out.confidence) {
        return Err(format!("confidence {} outside [0, 1]", out.confidence));
    }
    for (i, c) in out.candidates.iter().enumerate() {
        if !c.entry.iter().chain(&c.exit).all(|cond| cond.is_well_formed()) {
            return Err(format!("candidate {i}: malformed condition"));
        }
        if !c.sizing.exposure.is_finite() || c.sizing.exposure < 0.0 {
            return Err(format!("candidate {i}: invalid exposure {}", c.sizing.exposure));
        }
        if c.sizing.stop_loss.is_some_and(|s| !s.is_finite() || s < 0.0) {
            return Err(format!("candidate {i}: invalid stop loss"));
        }
    }
    Ok(out)
}

#[async_trait]
impl<C: LlmClient> ProposalSource for LlmProposer<C> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn propose(&self, ctx: &Context, intent: &Intent) -> Result<Proposal, ProposalError> {
        let prompt = self.build_prompt(ctx, intent);
        let response = self
            .client
            .generate(SYSTEM_PROMPT, &prompt, &self.params)
            .await
            .with_context(|| format!("llm source {} did not answer", self.id))?;

        let transcript = Transcript { prompt, response };
        match parse_reply(&transcript.response) {
            Ok(out) => Ok(Proposal {
                candidates: out.candidates,
                confidence: out.confidence,
                transcript: Some(transcript),
            }),
            Err(detail) => Err(ProposalError::Malformed {
                detail,
                transcript: Some(transcript),
            }),
        }
    }
}
