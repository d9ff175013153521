use std::collections::BTreeMap;

use common::time::Clock;
use corelib::{Context, MarketSnapshot, SentimentVector, TelemetrySnapshot, digest};
use tracing::{instrument, warn};

use crate::error::StaleInputError;

/// Merges the latest sentiment vector and telemetry snapshot into a cycle `Context`.
///
/// Pure apart from reading the clock: identical inputs and clock give an
/// identical context, fingerprint included.
#[derive(Clone, Debug)]
pub struct SignalAggregator {
    freshness_window_ms: u64,
}

impl SignalAggregator {
    pub fn new(freshness_window_ms: u64) -> Self {
        Self {
            freshness_window_ms,
        }
    }

    #[instrument(skip_all, target = "aggregator", fields(window_ms = self.freshness_window_ms))]
    pub fn build(
        &self,
        sentiment: Option<&SentimentVector>,
        telemetry: Option<&TelemetrySnapshot>,
        clock: &dyn Clock,
    ) -> Result<Context, StaleInputError> {
        let now_ms = clock.now_ms();

        let sentiment = sentiment.ok_or(self.stale("sentiment", None))?;
        let telemetry = telemetry.ok_or(self.stale("telemetry", None))?;

        self.check_age("sentiment", sentiment.ts_ms, now_ms)?;
        self.check_age("telemetry", telemetry.ts_ms, now_ms)?;

        let sentiment = sanitize_sentiment(sentiment);
        let market = sanitize_market(&telemetry.market);
        let telemetry_metrics: BTreeMap<String, f64> = telemetry
            .metrics
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let fingerprint = digest::fingerprint(&(
            now_ms,
            &market,
            &sentiment,
            telemetry.ts_ms,
            &telemetry_metrics,
        ))
        .unwrap_or_default();

        Ok(Context {
            timestamp_ms: now_ms,
            market,
            sentiment,
            telemetry_ts_ms: telemetry.ts_ms,
            telemetry: telemetry_metrics,
            fingerprint,
        })
    }

    fn stale(&self, feed: &'static str, age_ms: Option<u64>) -> StaleInputError {
        StaleInputError {
            feed,
            age_ms,
            window_ms: self.freshness_window_ms,
        }
    }

    fn check_age(&self, feed: &'static str, ts_ms: u64, now_ms: u64) -> Result<(), StaleInputError> {
        // Records stamped in the future count as fresh.
        let age = now_ms.saturating_sub(ts_ms);
        if age > self.freshness_window_ms {
            return Err(self.stale(feed, Some(age)));
        }
        Ok(())
    }
}

fn sanitize_sentiment(v: &SentimentVector) -> SentimentVector {
    let mut readings = BTreeMap::new();
    for (asset, r) in &v.readings {
        if !r.score.is_finite() || !r.confidence.is_finite() {
            warn!(target: "aggregator", %asset, "dropping non-finite sentiment reading");
            continue;
        }
        let mut r = r.clone();
        r.score = r.score.clamp(-1.0, 1.0);
        r.confidence = r.confidence.clamp(0.0, 1.0);
        readings.insert(asset.clone(), r);
    }
    SentimentVector {
        ts_ms: v.ts_ms,
        readings,
    }
}

fn sanitize_market(m: &MarketSnapshot) -> MarketSnapshot {
    let mut assets = BTreeMap::new();
    for (asset, metrics) in &m.assets {
        if !metrics.price.is_finite() {
            warn!(target: "aggregator", %asset, "dropping asset with non-finite price");
            continue;
        }
        let mut metrics = metrics.clone();
        metrics.rsi = metrics.rsi.filter(|v| v.is_finite());
        metrics.volatility = metrics.volatility.filter(|v| v.is_finite());
        assets.insert(asset.clone(), metrics);
    }
    MarketSnapshot { assets }
}
