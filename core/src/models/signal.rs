use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One asset's reading from the sentiment/threat feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    /// Directional score in [-1, 1].
    pub score: f64,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub themes: Vec<String>,
}

impl SentimentReading {
    pub fn new(score: f64, confidence: f64, themes: &[&str]) -> Self {
        Self {
            score,
            confidence,
            themes: themes.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Latest sentiment/threat vector as pushed by the clustering feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentVector {
    pub ts_ms: u64,
    pub readings: BTreeMap<String, SentimentReading>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetrics {
    pub price: f64,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub volatility: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub assets: BTreeMap<String, AssetMetrics>,
}

/// Market + system telemetry feed record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub ts_ms: u64,
    #[serde(default)]
    pub market: MarketSnapshot,
    /// Free-form system gauges (e.g. `threat.intrusions_per_min`).
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Immutable per-cycle view of every input signal.
///
/// Built once by the aggregator and owned by exactly one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub timestamp_ms: u64,
    pub market: MarketSnapshot,
    pub sentiment: SentimentVector,
    pub telemetry_ts_ms: u64,
    pub telemetry: BTreeMap<String, f64>,
    /// SHA-256 over the fields above.
    pub fingerprint: String,
}

impl Context {
    pub fn sentiment_for(&self, asset: &str) -> Option<&SentimentReading> {
        self.sentiment.readings.get(asset)
    }

    pub fn asset(&self, asset: &str) -> Option<&AssetMetrics> {
        self.market.assets.get(asset)
    }
}
