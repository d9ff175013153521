#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::time::{Clock, ManualClock};
use corelib::{
    AssetMetrics, CandidateDraft, Comparator, Condition, Context, Decision, Intent, KillSwitch,
    MarketSnapshot, Metric, PolicyKind, RiskLimits, ScoreMetrics, SentimentReading,
    SentimentVector, Sizing, SizingRules, TelemetrySnapshot, CandidatePolicy,
};
use parking_lot::Mutex;
use strategist::config::PipelineConfig;
use strategist::generator::source::{Proposal, ProposalError, ProposalSource};
use strategist::metrics::counters::Counters;
use strategist::pipeline::{DecisionPipeline, DecisionSink, PipelineDeps};
use strategist::recorder::DecisionRecorder;
use strategist::recorder::memory::InMemoryAuditRepository;
use strategist::recorder::repository::AuditRepository;
use strategist::scope::ScopeRegistry;
use strategist::signal::SignalBoard;
use strategist::validator::risk_gate::StandardRiskGate;
use strategist::validator::scorer::Scorer;
use tokio::sync::Notify;

pub const SCOPE: &str = "acct-1";
pub const NOW: u64 = 1_700_000_000_000;

pub fn intent() -> Intent {
    Intent {
        target_assets: BTreeSet::from(["SOL".to_string()]),
        conditions: vec![
            Condition::new("SOL", Metric::Sentiment, Comparator::Gt, 0.5),
            Condition::new("SOL", Metric::Rsi, Comparator::Lt, 30.0),
        ],
        sizing: SizingRules {
            base_fraction: 0.1,
            scale_by_confidence: false,
        },
        risk_limits: RiskLimits {
            max_drawdown: 0.10,
            stop_loss: 0.05,
            max_exposure: 0.25,
        },
        horizon_ms: 3_600_000,
    }
}

pub fn sentiment(ts_ms: u64) -> SentimentVector {
    SentimentVector {
        ts_ms,
        readings: BTreeMap::from([(
            "SOL".to_string(),
            SentimentReading::new(0.8, 0.9, &["ETF hype"]),
        )]),
    }
}

pub fn telemetry(ts_ms: u64) -> TelemetrySnapshot {
    TelemetrySnapshot {
        ts_ms,
        market: MarketSnapshot {
            assets: BTreeMap::from([(
                "SOL".to_string(),
                AssetMetrics {
                    price: 142.0,
                    rsi: Some(24.0),
                    volatility: Some(0.04),
                },
            )]),
        },
        metrics: BTreeMap::new(),
    }
}

/// A compliant draft; `entry` picks how many intent conditions it restates.
pub fn draft(kind: PolicyKind, sentiment_gt: Option<f64>, rsi_lt: Option<f64>) -> CandidateDraft {
    let mut entry = Vec::new();
    if let Some(t) = sentiment_gt {
        entry.push(Condition::new("SOL", Metric::Sentiment, Comparator::Gt, t));
    }
    if let Some(t) = rsi_lt {
        entry.push(Condition::new("SOL", Metric::Rsi, Comparator::Lt, t));
    }
    CandidateDraft {
        kind,
        entry,
        exit: vec![],
        sizing: Sizing {
            exposure: 0.1,
            stop_loss: Some(0.03),
        },
        escalation: vec![],
        kill_switch: Some(KillSwitch {
            max_drawdown: 0.08,
            halt_on_feed_loss: true,
        }),
        rationale: String::new(),
    }
}

/// Answers with a fixed proposal.
pub struct StaticSource {
    pub id: &'static str,
    pub confidence: f64,
    pub drafts: Vec<CandidateDraft>,
}

#[async_trait]
impl ProposalSource for StaticSource {
    fn id(&self) -> &str {
        self.id
    }

    async fn propose(&self, _: &Context, _: &Intent) -> Result<Proposal, ProposalError> {
        Ok(Proposal {
            candidates: self.drafts.clone(),
            confidence: self.confidence,
            transcript: None,
        })
    }
}

/// Signals when called, then never answers.
pub struct HangingSource {
    pub called: Arc<Notify>,
}

#[async_trait]
impl ProposalSource for HangingSource {
    fn id(&self) -> &str {
        "hanging"
    }

    async fn propose(&self, _: &Context, _: &Intent) -> Result<Proposal, ProposalError> {
        self.called.notify_one();
        std::future::pending::<()>().await;
        Err(anyhow::anyhow!("unreachable").into())
    }
}

/// Metrics looked up by policy kind; unknown kinds score zero.
#[derive(Default)]
pub struct TableScorer(pub HashMap<PolicyKind, ScoreMetrics>);

impl TableScorer {
    pub fn with(mut self, kind: PolicyKind, expected_return: f64, drawdown: f64) -> Self {
        self.0.insert(
            kind,
            ScoreMetrics {
                expected_return,
                drawdown,
            },
        );
        self
    }
}

#[async_trait]
impl Scorer for TableScorer {
    async fn score(
        &self,
        c: &CandidatePolicy,
        _: &Context,
        _: &Intent,
    ) -> anyhow::Result<ScoreMetrics> {
        Ok(self.0.get(&c.kind).copied().unwrap_or(ScoreMetrics {
            expected_return: 0.0,
            drawdown: 0.0,
        }))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<Decision>>,
    pub fail: bool,
}

#[async_trait]
impl DecisionSink for RecordingSink {
    async fn publish(&self, decision: &Decision) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("execution gateway unreachable");
        }
        self.published.lock().push(decision.clone());
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: Arc<DecisionPipeline>,
    pub repo: Arc<InMemoryAuditRepository>,
    pub recorder: Arc<DecisionRecorder>,
    pub scopes: Arc<ScopeRegistry>,
    pub sink: Arc<RecordingSink>,
    pub clock: ManualClock,
    pub counters: Counters,
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        proposal_timeout_ms: 200,
        scoring_timeout_ms: 200,
        ..PipelineConfig::default()
    }
}

pub async fn harness(
    sources: Vec<Arc<dyn ProposalSource>>,
    scorer: impl Scorer + 'static,
    cfg: PipelineConfig,
) -> Harness {
    harness_on(
        Arc::new(InMemoryAuditRepository::new()),
        sources,
        scorer,
        cfg,
        RecordingSink::default(),
    )
    .await
}

pub async fn harness_on(
    repo: Arc<InMemoryAuditRepository>,
    sources: Vec<Arc<dyn ProposalSource>>,
    scorer: impl Scorer + 'static,
    cfg: PipelineConfig,
    sink: RecordingSink,
) -> Harness {
    let clock = ManualClock::new(NOW);
    let counters = Counters::default();
    let scopes = Arc::new(ScopeRegistry::new(cfg.novelty_lookback_ms));
    let recorder = Arc::new(
        DecisionRecorder::open(repo.clone() as Arc<dyn AuditRepository>)
            .await
            .unwrap(),
    );
    let sink = Arc::new(sink);
    let board = SignalBoard::new();
    board.push_sentiment(SCOPE, sentiment(NOW - 1_000)).await;
    board.push_telemetry(SCOPE, telemetry(NOW - 500)).await;

    let pipeline = DecisionPipeline::new(
        &cfg,
        PipelineDeps {
            board,
            scopes: scopes.clone(),
            recorder: recorder.clone(),
            sources,
            scorer: Arc::new(scorer),
            gate: Arc::new(StandardRiskGate),
            sink: sink.clone(),
            counters: counters.clone(),
            clock: Arc::new(clock.clone()) as Arc<dyn Clock>,
        },
    )
    .await
    .unwrap();

    Harness {
        pipeline: Arc::new(pipeline),
        repo,
        recorder,
        scopes,
        sink,
        clock,
        counters,
    }
}

pub fn source(s: impl ProposalSource + 'static) -> Arc<dyn ProposalSource> {
    Arc::new(s)
}

pub const LONG: Duration = Duration::from_secs(3_600);
