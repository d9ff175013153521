mod support;

use std::collections::BTreeSet;
use std::sync::Arc;

use corelib::{
    CycleId, DegradeReason, Escalation, OutcomeRecord, PolicyKind, RiskLimits,
};
use strategist::config::PipelineConfig;
use strategist::error::{FeedbackError, PipelineError};
use strategist::feedback::FeedbackCollector;
use strategist::recorder::repository::AttachStatus;
use strategist::validator::risk_gate::{
    GLOBAL_FULL_SHUTDOWN, GlobalConstraints, HardConstraint, LIMIT_MAX_DRAWDOWN, RiskGate,
    StandardRiskGate,
};
use tokio::sync::Notify;

use support::*;

fn bullish_momentum() -> corelib::CandidateDraft {
    draft(PolicyKind::Momentum, Some(0.6), Some(25.0))
}

fn collector(h: &Harness) -> (FeedbackCollector, tokio::sync::mpsc::Receiver<strategist::feedback::LearningUpdate>) {
    FeedbackCollector::new(
        h.recorder.clone(),
        h.scopes.clone(),
        h.counters.clone(),
        Arc::new(h.clock.clone()),
        8,
    )
}

#[tokio::test]
async fn risk_violating_candidate_is_rejected_and_best_survivor_wins() {
    let mut reckless = draft(PolicyKind::Arbitrage, Some(0.6), None);
    if let Some(ks) = reckless.kill_switch.as_mut() {
        ks.max_drawdown = 0.5;
    }
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![
            bullish_momentum(),
            draft(PolicyKind::MeanReversion, None, Some(30.0)),
            reckless,
        ],
    };
    let scorer = TableScorer::default()
        .with(PolicyKind::Momentum, 0.05, 0.04)
        .with(PolicyKind::MeanReversion, 0.03, 0.02);
    let h = harness(vec![source(src)], scorer, test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();

    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();

    assert_eq!(out.decision.kind(), PolicyKind::Momentum);
    assert_eq!(out.decision.rank, 1);
    assert!(!out.degraded);
    assert!(out.published);

    let entry = h.recorder.fetch(out.decision.cycle_id).await.unwrap().unwrap();
    let record = &entry.record;
    assert_eq!(record.accepted.len(), 2);
    assert_eq!(record.rejected.len(), 1);
    assert_eq!(record.rejected[0].candidate.kind, PolicyKind::Arbitrage);
    assert_eq!(
        record.rejected[0].risk_violations,
        BTreeSet::from([LIMIT_MAX_DRAWDOWN.to_string()])
    );
    assert_eq!(record.standings.len(), 2);
    assert_eq!(record.standings[0].candidate_id, out.decision.winner.candidate.id);
    assert_eq!(record.decision, out.decision);
    assert_eq!(
        record.context.sentiment.readings["SOL"].themes,
        vec!["ETF hype".to_string()]
    );

    let published = h.sink.published.lock().clone();
    assert_eq!(published, vec![out.decision.clone()]);
    assert_eq!(h.counters.snapshot().candidates_rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn proposal_timeout_yields_fallback_that_passes_every_constraint() {
    let hang = HangingSource {
        called: Arc::new(Notify::new()),
    };
    let h = harness(vec![source(hang)], TableScorer::default(), test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();

    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();

    assert!(out.degraded);
    assert!(out.decision.is_fallback());
    assert_eq!(out.decision.kind(), PolicyKind::HoldDefault);
    assert!(out.decision.winner.risk_violations.is_empty());

    let globals = GlobalConstraints {
        rules: PipelineConfig::default().hard_constraints,
        full_shutdown_approved: false,
    };
    let violations = StandardRiskGate.evaluate(
        &out.decision.winner.candidate,
        &intent().risk_limits,
        &globals,
    );
    assert!(violations.is_empty(), "{violations:?}");

    let record = h.recorder.fetch(out.decision.cycle_id).await.unwrap().unwrap().record;
    assert!(record.generation.degraded);
    assert_eq!(
        record.generation.degrade_reasons,
        vec![DegradeReason::Timeout {
            source: "hanging".to_string()
        }]
    );
    assert_eq!(h.counters.snapshot().generation_degraded, 1);
}

#[tokio::test]
async fn composite_tie_goes_to_earlier_proposal() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![
            draft(PolicyKind::MeanReversion, Some(0.6), Some(25.0)),
            bullish_momentum(),
        ],
    };
    let scorer = TableScorer::default()
        .with(PolicyKind::Momentum, 0.04, 0.02)
        .with(PolicyKind::MeanReversion, 0.04, 0.02);
    let h = harness(vec![source(src)], scorer, test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();

    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();

    assert_eq!(out.decision.kind(), PolicyKind::MeanReversion);
    assert_eq!(out.decision.winner.candidate.ordinal, 0);
    assert!(
        out.decision
            .reason_trace
            .iter()
            .any(|r| r.contains("generation order")),
        "{:?}",
        out.decision.reason_trace
    );
}

#[tokio::test]
async fn outcome_for_unknown_cycle_mutates_nothing() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![bullish_momentum()],
    };
    let h = harness(vec![source(src)], TableScorer::default(), test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();
    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();
    let (collector, mut rx) = collector(&h);

    let before = h.recorder.fetch(out.decision.cycle_id).await.unwrap();
    let err = collector
        .attach_outcome(
            CycleId(9999),
            OutcomeRecord {
                cycle_id: CycleId(9999),
                observed_at_ms: NOW + 10,
                realized_metric: -0.2,
                success: false,
                critique_summary: "stopped out".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FeedbackError::UnknownCycle(CycleId(9999))));
    assert_eq!(h.repo.len(), 1);
    assert_eq!(h.recorder.fetch(out.decision.cycle_id).await.unwrap(), before);
    assert!(h.recorder.fetch(CycleId(9999)).await.unwrap().is_none());
    assert!(rx.try_recv().is_err());
    assert!(h.scopes.handle(SCOPE).lock().novelty.is_empty());
    assert_eq!(h.counters.snapshot().outcomes_unknown, 1);
}

#[tokio::test]
async fn later_outcome_is_retained() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![bullish_momentum()],
    };
    let h = harness(vec![source(src)], TableScorer::default(), test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();
    let id = h.pipeline.run_cycle(SCOPE).await.unwrap().decision.cycle_id;
    let (collector, _rx) = collector(&h);

    let outcome = |observed_at_ms, success| OutcomeRecord {
        cycle_id: id,
        observed_at_ms,
        realized_metric: if success { 0.02 } else { -0.01 },
        success,
        critique_summary: String::new(),
    };

    assert_eq!(
        collector.attach_outcome(id, outcome(NOW + 200, true)).await.unwrap(),
        AttachStatus::Attached
    );
    assert_eq!(
        collector.attach_outcome(id, outcome(NOW + 100, false)).await.unwrap(),
        AttachStatus::StaleIgnored
    );

    let stored = h.recorder.fetch(id).await.unwrap().unwrap().outcome.unwrap();
    assert_eq!(stored.observed_at_ms, NOW + 200);
    assert!(stored.success);
    assert!(h.recorder.verify_chain().await.unwrap().is_intact());
}

#[tokio::test]
async fn every_completed_cycle_has_exactly_one_record() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![
            bullish_momentum(),
            draft(PolicyKind::MeanReversion, None, Some(30.0)),
        ],
    };
    let h = harness(vec![source(src)], TableScorer::default(), test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();

    let mut ids = BTreeSet::new();
    for _ in 0..5 {
        h.clock.advance(1_000);
        let out = h.pipeline.run_cycle(SCOPE).await.unwrap();
        let entry = h.recorder.fetch(out.decision.cycle_id).await.unwrap().unwrap();
        assert_eq!(entry.record.decision, out.decision);
        assert_eq!(entry.digest, out.receipt.digest);
        assert!(ids.insert(out.decision.cycle_id));
    }

    assert_eq!(h.repo.len(), 5);
    assert_eq!(h.sink.published.lock().len(), 5);
    let report = h.recorder.verify_chain().await.unwrap();
    assert!(report.is_intact());
    assert_eq!(report.checked, 5);
    assert_eq!(h.counters.snapshot().cycles_committed, 5);
}

#[tokio::test]
async fn cycle_ids_continue_past_stored_history() {
    let src = || StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![bullish_momentum()],
    };
    let first = harness(vec![source(src())], TableScorer::default(), test_config()).await;
    first.pipeline.submit_intent(SCOPE, intent()).unwrap();
    first.pipeline.run_cycle(SCOPE).await.unwrap();
    first.pipeline.run_cycle(SCOPE).await.unwrap();

    let second = harness_on(
        first.repo.clone(),
        vec![source(src())],
        TableScorer::default(),
        test_config(),
        RecordingSink::default(),
    )
    .await;
    second.pipeline.submit_intent(SCOPE, intent()).unwrap();
    let out = second.pipeline.run_cycle(SCOPE).await.unwrap();

    assert_eq!(out.decision.cycle_id, CycleId(3));
    assert_eq!(out.receipt.seq, 3);
    assert!(second.recorder.verify_chain().await.unwrap().is_intact());
}

#[tokio::test]
async fn new_intent_supersedes_in_flight_cycle_without_committing() {
    let called = Arc::new(Notify::new());
    let hang = HangingSource {
        called: called.clone(),
    };
    let cfg = PipelineConfig {
        proposal_timeout_ms: 60_000,
        ..test_config()
    };
    let h = harness(vec![source(hang)], TableScorer::default(), cfg).await;
    assert!(!h.pipeline.submit_intent(SCOPE, intent()).unwrap());

    let pipeline = h.pipeline.clone();
    let cycle = tokio::spawn(async move { pipeline.run_cycle(SCOPE).await });
    called.notified().await;

    let mut revised = intent();
    revised.risk_limits.max_exposure = 0.15;
    assert!(h.pipeline.submit_intent(SCOPE, revised.clone()).unwrap());

    let res = tokio::time::timeout(LONG, cycle).await.unwrap().unwrap();
    assert!(matches!(res, Err(PipelineError::Superseded { .. })), "{res:?}");
    assert!(h.repo.is_empty());
    assert!(h.sink.published.lock().is_empty());
    assert_eq!(h.scopes.last_intent(SCOPE), Some(revised));
    assert_eq!(h.counters.snapshot().cycles_superseded, 1);
}

#[tokio::test]
async fn conservative_mode_prefers_fallback() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![bullish_momentum()],
    };
    let scorer = TableScorer::default().with(PolicyKind::Momentum, 0.2, 0.01);
    let h = harness(vec![source(src)], scorer, test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();
    h.pipeline.set_conservative_mode(true);

    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();

    assert!(out.decision.is_fallback());
    assert!(!out.degraded);
    assert!(
        out.decision
            .reason_trace
            .iter()
            .any(|r| r.contains("conservative mode"))
    );
    let record = h.recorder.fetch(out.decision.cycle_id).await.unwrap().unwrap().record;
    assert!(record.conservative_mode);
    assert_eq!(record.accepted.len(), 2);

    h.pipeline.set_conservative_mode(false);
    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();
    assert_eq!(out.decision.kind(), PolicyKind::Momentum);
}

#[tokio::test]
async fn unapproved_full_shutdown_never_wins() {
    let mut shutdown = draft(PolicyKind::Isolate, Some(0.6), Some(25.0));
    shutdown.escalation.push(Escalation::FullShutdown);
    let src = StaticSource {
        id: "rules",
        confidence: 0.9,
        drafts: vec![shutdown, draft(PolicyKind::Contain, None, None)],
    };
    let scorer = TableScorer::default()
        .with(PolicyKind::Isolate, 0.5, 0.0)
        .with(PolicyKind::Contain, 0.01, 0.05);
    let h = harness(vec![source(src)], scorer, test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();

    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();
    assert_eq!(out.decision.kind(), PolicyKind::Contain);
    let record = h.recorder.fetch(out.decision.cycle_id).await.unwrap().unwrap().record;
    assert!(record.rejected[0].risk_violations.contains(GLOBAL_FULL_SHUTDOWN));

    h.pipeline.approve_full_shutdown(true);
    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();
    assert_eq!(out.decision.kind(), PolicyKind::Isolate);
}

#[tokio::test]
async fn global_forbidden_kind_is_enforced() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![
            draft(PolicyKind::Deceive, Some(0.6), Some(25.0)),
            draft(PolicyKind::Contain, None, None),
        ],
    };
    let cfg = PipelineConfig {
        hard_constraints: vec![
            HardConstraint::KillSwitchRequired,
            HardConstraint::ForbidKind(PolicyKind::Deceive),
        ],
        ..test_config()
    };
    let h = harness(vec![source(src)], TableScorer::default(), cfg).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();

    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();
    assert_eq!(out.decision.kind(), PolicyKind::Contain);
}

#[tokio::test]
async fn losing_winner_is_penalized_next_cycle() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![
            bullish_momentum(),
            draft(PolicyKind::MeanReversion, Some(0.6), Some(25.0)),
        ],
    };
    let h = harness(vec![source(src)], TableScorer::default(), test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();
    let first = h.pipeline.run_cycle(SCOPE).await.unwrap();
    assert_eq!(first.decision.kind(), PolicyKind::Momentum);

    let (collector, mut rx) = collector(&h);
    let id = first.decision.cycle_id;
    collector
        .attach_outcome(
            id,
            OutcomeRecord {
                cycle_id: id,
                observed_at_ms: NOW + 500,
                realized_metric: -0.04,
                success: false,
                critique_summary: "momentum faded".to_string(),
            },
        )
        .await
        .unwrap();
    let update = rx.try_recv().unwrap();
    assert_eq!(update.kind, PolicyKind::Momentum);
    assert!(!update.success);

    h.clock.advance(1_000);
    let second = h.pipeline.run_cycle(SCOPE).await.unwrap();
    assert_eq!(second.decision.kind(), PolicyKind::MeanReversion);
    let record = h.recorder.fetch(second.decision.cycle_id).await.unwrap().unwrap().record;
    let momentum = record
        .accepted
        .iter()
        .find(|s| s.candidate.kind == PolicyKind::Momentum)
        .unwrap();
    assert_eq!(momentum.novelty_penalty, 0.5);
}

#[tokio::test]
async fn stale_feeds_abort_before_any_record() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![bullish_momentum()],
    };
    let h = harness(vec![source(src)], TableScorer::default(), test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();
    h.clock.advance(60_000);

    let err = h.pipeline.run_cycle(SCOPE).await.unwrap_err();
    assert!(matches!(err, PipelineError::StaleInput(_)), "{err:?}");
    assert!(h.repo.is_empty());
    assert_eq!(h.counters.snapshot().cycles_stale, 1);

    // Fresh data resumes the loop; the aborted cycle consumed no id.
    h.pipeline.board().push_sentiment(SCOPE, sentiment(NOW + 59_000)).await;
    h.pipeline.board().push_telemetry(SCOPE, telemetry(NOW + 59_500)).await;
    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();
    assert_eq!(out.decision.cycle_id, CycleId(1));
}

#[tokio::test]
async fn missing_intent_skips_the_cycle() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![bullish_momentum()],
    };
    let h = harness(vec![source(src)], TableScorer::default(), test_config()).await;

    let err = h.pipeline.run_cycle(SCOPE).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoIntent { .. }));
    assert!(h.repo.is_empty());
    assert_eq!(h.counters.snapshot().cycles_no_intent, 1);
}

#[tokio::test]
async fn malformed_intent_is_rejected_at_the_boundary() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![bullish_momentum()],
    };
    let h = harness(vec![source(src)], TableScorer::default(), test_config()).await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();

    let mut bad = intent();
    bad.risk_limits = RiskLimits {
        max_drawdown: 0.1,
        stop_loss: 0.05,
        max_exposure: 1.5,
    };
    let err = h.pipeline.submit_intent(SCOPE, bad).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidIntent(_)));
    assert_eq!(h.scopes.last_intent(SCOPE), Some(intent()));
}

#[tokio::test]
async fn publish_failure_keeps_the_committed_record() {
    let src = StaticSource {
        id: "llm",
        confidence: 0.9,
        drafts: vec![bullish_momentum()],
    };
    let h = harness_on(
        Arc::new(strategist::recorder::memory::InMemoryAuditRepository::new()),
        vec![source(src)],
        TableScorer::default(),
        test_config(),
        RecordingSink {
            fail: true,
            ..RecordingSink::default()
        },
    )
    .await;
    h.pipeline.submit_intent(SCOPE, intent()).unwrap();

    let out = h.pipeline.run_cycle(SCOPE).await.unwrap();
    assert!(!out.published);
    assert_eq!(h.repo.len(), 1);
    assert_eq!(h.counters.snapshot().publish_failures, 1);
}
