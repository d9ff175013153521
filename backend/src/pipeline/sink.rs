use async_trait::async_trait;
use corelib::Decision;
use tracing::info;

/// Downstream execution collaborator. Receives only committed decisions.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn publish(&self, decision: &Decision) -> anyhow::Result<()>;
}

/// Emits each decision as a structured log line.
pub struct LoggingDecisionSink;

#[async_trait]
impl DecisionSink for LoggingDecisionSink {
    async fn publish(&self, decision: &Decision) -> anyhow::Result<()> {
        let policy = serde_json::to_string(&decision.winner.candidate)?;
        info!(
            target: "pipeline",
            cycle_id = %decision.cycle_id,
            scope = %decision.scope,
            kind = %decision.kind(),
            fallback = decision.is_fallback(),
            policy = %policy,
            "decision published"
        );
        Ok(())
    }
}
