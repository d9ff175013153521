//! JSON-lines feed intake for the daemon.
//!
//! One event per line, e.g.
//! `{"type":"sentiment","scope":"acct-1","data":{"ts_ms":1,"readings":{}}}`.
//! Events without a scope apply to the daemon's default scope.

use std::sync::Arc;

use anyhow::Context as _;
use corelib::{Intent, OutcomeRecord, SentimentVector, TelemetrySnapshot};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::pipeline::DecisionPipeline;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Sentiment {
        #[serde(default)]
        scope: Option<String>,
        data: SentimentVector,
    },
    Telemetry {
        #[serde(default)]
        scope: Option<String>,
        data: TelemetrySnapshot,
    },
    Intent {
        #[serde(default)]
        scope: Option<String>,
        data: Intent,
    },
    Outcome {
        data: OutcomeRecord,
    },
    ConservativeMode {
        on: bool,
    },
    ApproveShutdown {
        approved: bool,
    },
}

/// `None` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> anyhow::Result<Option<FeedEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let event = serde_json::from_str(line).context("invalid feed event")?;
    Ok(Some(event))
}

pub async fn apply_event(
    pipeline: &DecisionPipeline,
    outcomes: &mpsc::Sender<OutcomeRecord>,
    default_scope: &str,
    event: FeedEvent,
) -> anyhow::Result<()> {
    match event {
        FeedEvent::Sentiment { scope, data } => {
            let scope = scope.as_deref().unwrap_or(default_scope);
            pipeline.board().push_sentiment(scope, data).await;
        }
        FeedEvent::Telemetry { scope, data } => {
            let scope = scope.as_deref().unwrap_or(default_scope);
            pipeline.board().push_telemetry(scope, data).await;
        }
        FeedEvent::Intent { scope, data } => {
            let scope = scope.as_deref().unwrap_or(default_scope);
            let superseded = pipeline.submit_intent(scope, data)?;
            info!(scope, superseded, "intent accepted");
        }
        FeedEvent::Outcome { data } => {
            outcomes
                .send(data)
                .await
                .context("outcome worker stopped")?;
        }
        FeedEvent::ConservativeMode { on } => pipeline.set_conservative_mode(on),
        FeedEvent::ApproveShutdown { approved } => pipeline.approve_full_shutdown(approved),
    }
    Ok(())
}

/// Applies every event read from `reader` until EOF. Bad lines are logged
/// and skipped.
pub async fn run_feed<R>(
    reader: R,
    pipeline: Arc<DecisionPipeline>,
    outcomes: mpsc::Sender<OutcomeRecord>,
    default_scope: String,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut n = 0u64;
    while let Some(line) = lines.next_line().await.context("read feed")? {
        n += 1;
        let event = match parse_line(&line) {
            Ok(Some(ev)) => ev,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = n, error = %format!("{e:#}"), "skipping feed line");
                continue;
            }
        };
        if let Err(e) = apply_event(&pipeline, &outcomes, &default_scope, event).await {
            warn!(line = n, error = %format!("{e:#}"), "feed event rejected");
        }
    }
    debug!(lines = n, "feed closed");
    Ok(())
}
