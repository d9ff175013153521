use std::collections::HashMap;
use std::sync::Arc;

use corelib::{SentimentVector, TelemetrySnapshot};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Debug, Default)]
struct Feeds {
    sentiment: Option<SentimentVector>,
    telemetry: Option<TelemetrySnapshot>,
}

/// In-memory store of the latest sentiment and telemetry record per scope.
///
/// Feeds push into it at their own pace; each cycle reads whatever is newest.
/// Records older than the one already held are ignored.
#[derive(Clone, Default)]
pub struct SignalBoard {
    inner: Arc<RwLock<HashMap<String, Feeds>>>,
}

impl SignalBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the record was older than the current one.
    pub async fn push_sentiment(&self, scope: &str, v: SentimentVector) -> bool {
        let mut g = self.inner.write().await;
        let feeds = g.entry(scope.to_string()).or_default();
        if feeds.sentiment.as_ref().is_some_and(|cur| cur.ts_ms > v.ts_ms) {
            debug!(scope, ts_ms = v.ts_ms, "ignoring out-of-order sentiment record");
            return false;
        }
        feeds.sentiment = Some(v);
        true
    }

    /// Returns false if the record was older than the current one.
    pub async fn push_telemetry(&self, scope: &str, t: TelemetrySnapshot) -> bool {
        let mut g = self.inner.write().await;
        let feeds = g.entry(scope.to_string()).or_default();
        if feeds.telemetry.as_ref().is_some_and(|cur| cur.ts_ms > t.ts_ms) {
            debug!(scope, ts_ms = t.ts_ms, "ignoring out-of-order telemetry record");
            return false;
        }
        feeds.telemetry = Some(t);
        true
    }

    pub async fn latest(
        &self,
        scope: &str,
    ) -> (Option<SentimentVector>, Option<TelemetrySnapshot>) {
        let g = self.inner.read().await;
        match g.get(scope) {
            Some(f) => (f.sentiment.clone(), f.telemetry.clone()),
            None => (None, None),
        }
    }
}
