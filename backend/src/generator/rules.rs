//! Deterministic rule-book proposal source.
//!
//! Reads the context for each target asset and proposes the textbook policy
//! for what it sees. It never times out and never hallucinates, which makes it
//! the natural companion to a model-backed source.

use async_trait::async_trait;
use corelib::{
    CandidateDraft, Comparator, Condition, Context, Escalation, Intent, KillSwitch, Metric,
    PolicyKind, Sizing,
};

use super::source::{Proposal, ProposalError, ProposalSource};

pub const RULES_SOURCE: &str = "rules";

/// Telemetry gauge read for threat containment.
pub const THREAT_GAUGE: &str = "threat.intrusions_per_min";

#[derive(Debug, Clone)]
pub struct RuleBook {
    pub bullish_score: f64,
    pub min_sentiment_confidence: f64,
    pub oversold_rsi: f64,
    pub contain_threat: f64,
    pub isolate_threat: f64,
}

impl Default for RuleBook {
    fn default() -> Self {
        Self {
            bullish_score: 0.3,
            min_sentiment_confidence: 0.5,
            oversold_rsi: 30.0,
            contain_threat: 5.0,
            isolate_threat: 20.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleProposer {
    book: RuleBook,
}

impl RuleProposer {
    pub fn new(book: RuleBook) -> Self {
        Self { book }
    }

    fn exposure(&self, intent: &Intent, confidence: f64) -> f64 {
        let base = intent.sizing.base_fraction;
        let scaled = if intent.sizing.scale_by_confidence {
            base * confidence
        } else {
            base
        };
        scaled.min(intent.risk_limits.max_exposure).max(0.0)
    }

    /// Entry conditions: the intent's own conditions for `asset` plus the rule trigger.
    fn entry_for(&self, intent: &Intent, asset: &str, trigger: Condition) -> Vec<Condition> {
        let mut entry: Vec<Condition> = intent
            .conditions
            .iter()
            .filter(|c| c.asset == asset)
            .cloned()
            .collect();
        if !entry.iter().any(|c| c.implies(&trigger)) {
            entry.push(trigger);
        }
        entry
    }

    fn directional(
        &self,
        kind: PolicyKind,
        intent: &Intent,
        asset: &str,
        (trigger, exit): (Condition, Condition),
        confidence: f64,
        rationale: String,
    ) -> CandidateDraft {
        let limits = &intent.risk_limits;
        CandidateDraft {
            kind,
            entry: self.entry_for(intent, asset, trigger),
            exit: vec![exit],
            sizing: Sizing {
                exposure: self.exposure(intent, confidence),
                stop_loss: Some(limits.stop_loss),
            },
            escalation: vec![],
            kill_switch: Some(KillSwitch {
                max_drawdown: limits.max_drawdown,
                halt_on_feed_loss: true,
            }),
            rationale,
        }
    }

    fn threat_response(&self, ctx: &Context, intent: &Intent) -> Option<CandidateDraft> {
        let level = *ctx.telemetry.get(THREAT_GAUGE)?;
        let (kind, threshold, escalation) = if level >= self.book.isolate_threat {
            (
                PolicyKind::Isolate,
                self.book.isolate_threat,
                vec![
                    Escalation::Isolate {
                        target: "affected-segment".to_string(),
                    },
                    Escalation::Alert {
                        channel: "soc".to_string(),
                    },
                ],
            )
        } else if level >= self.book.contain_threat {
            (
                PolicyKind::Contain,
                self.book.contain_threat,
                vec![Escalation::Alert {
                    channel: "soc".to_string(),
                }],
            )
        } else {
            return None;
        };

        let anchor = intent.target_assets.iter().next()?.clone();
        let metric = Metric::Telemetry(THREAT_GAUGE.to_string());
        Some(CandidateDraft {
            kind,
            entry: vec![Condition::new(
                anchor.clone(),
                metric.clone(),
                Comparator::Ge,
                threshold,
            )],
            exit: vec![Condition::new(anchor, metric, Comparator::Lt, threshold)],
            sizing: Sizing {
                exposure: 0.0,
                stop_loss: Some(intent.risk_limits.stop_loss),
            },
            escalation,
            kill_switch: Some(KillSwitch {
                max_drawdown: intent.risk_limits.max_drawdown,
                halt_on_feed_loss: true,
            }),
            rationale: format!("threat gauge at {level:.1}/min"),
        })
    }
}

#[async_trait]
impl ProposalSource for RuleProposer {
    fn id(&self) -> &str {
        RULES_SOURCE
    }

    async fn propose(&self, ctx: &Context, intent: &Intent) -> Result<Proposal, ProposalError> {
        let book = &self.book;
        let mut candidates = Vec::new();
        let mut confidences = Vec::new();

        if let Some(threat) = self.threat_response(ctx, intent) {
            candidates.push(threat);
        }

        for asset in &intent.target_assets {
            let sentiment = ctx.sentiment_for(asset);
            if let Some(s) = sentiment {
                confidences.push(s.confidence);
            }
            let confidence = sentiment.map(|s| s.confidence).unwrap_or(0.0);

            if let Some(s) = sentiment
                && s.score > book.bullish_score
                && s.confidence >= book.min_sentiment_confidence
            {
                candidates.push(self.directional(
                    PolicyKind::Momentum,
                    intent,
                    asset,
                    (
                        Condition::new(asset.as_str(), Metric::Sentiment, Comparator::Gt, book.bullish_score),
                        Condition::new(asset.as_str(), Metric::Sentiment, Comparator::Lt, 0.0),
                    ),
                    confidence,
                    format!("{asset} sentiment {:.2} ({:.0}% conf)", s.score, s.confidence * 100.0),
                ));
            }

            if let Some(rsi) = ctx.asset(asset).and_then(|m| m.rsi)
                && rsi < book.oversold_rsi
            {
                candidates.push(self.directional(
                    PolicyKind::MeanReversion,
                    intent,
                    asset,
                    (
                        Condition::new(asset.as_str(), Metric::Rsi, Comparator::Lt, book.oversold_rsi),
                        Condition::new(asset.as_str(), Metric::Rsi, Comparator::Gt, 50.0),
                    ),
                    confidence,
                    format!("{asset} oversold, rsi {rsi:.1}"),
                ));
            }
        }

        // The rule book is as sure as the signals it reads.
        let confidence = if confidences.is_empty() {
            if candidates.is_empty() { 0.0 } else { 1.0 }
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        Ok(Proposal {
            candidates,
            confidence,
            transcript: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{AssetMetrics, SentimentReading};

    fn scenario_ctx() -> Context {
        let mut ctx = super::super::tests::ctx();
        ctx.sentiment
            .readings
            .insert("SOL".into(), SentimentReading::new(0.8, 0.9, &["ETF hype"]));
        ctx.market.assets.insert(
            "SOL".into(),
            AssetMetrics {
                price: 140.0,
                rsi: Some(24.0),
                volatility: Some(0.04),
            },
        );
        ctx
    }

    #[tokio::test]
    async fn bullish_oversold_asset_gets_momentum_and_reversion() {
        let intent = super::super::tests::intent();
        let p = RuleProposer::default()
            .propose(&scenario_ctx(), &intent)
            .await
            .unwrap();

        let kinds: Vec<_> = p.candidates.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![PolicyKind::Momentum, PolicyKind::MeanReversion]);
        assert!((p.confidence - 0.9).abs() < 1e-9);

        for c in &p.candidates {
            assert!(c.sizing.exposure <= intent.risk_limits.max_exposure);
            assert_eq!(intent.alignment_with(&c.entry), 1.0);
        }
    }

    #[tokio::test]
    async fn threat_gauge_triggers_isolation() {
        let mut ctx = scenario_ctx();
        ctx.telemetry.insert(THREAT_GAUGE.into(), 42.0);

        let p = RuleProposer::default()
            .propose(&ctx, &super::super::tests::intent())
            .await
            .unwrap();

        assert_eq!(p.candidates[0].kind, PolicyKind::Isolate);
        assert_eq!(p.candidates[0].sizing.exposure, 0.0);
        assert!(!p.candidates[0]
            .escalation
            .iter()
            .any(|e| matches!(e, Escalation::FullShutdown)));
    }

    #[tokio::test]
    async fn quiet_market_proposes_nothing() {
        let p = RuleProposer::default()
            .propose(&super::super::tests::ctx(), &super::super::tests::intent())
            .await
            .unwrap();
        assert!(p.candidates.is_empty());
        assert_eq!(p.confidence, 0.0);
    }
}
