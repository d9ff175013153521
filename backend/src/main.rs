use std::sync::Arc;
use std::time::Duration;

use common::logger::init_tracing;
use common::time::{Clock, SystemClock};
use strategist::{
    config::AppConfig,
    db::Db,
    error::PipelineError,
    feedback::{FeedbackCollector, LoggingMemorySink, run_memory_sink, spawn_outcome_worker},
    generator::{rules::RuleProposer, source::ProposalSource},
    ingest::run_feed,
    metrics::counters::Counters,
    pipeline::{DecisionPipeline, LoggingDecisionSink, PipelineDeps},
    recorder::{DecisionRecorder, repository_sqlx::SqlxAuditRepository},
    scope::ScopeRegistry,
    signal::SignalBoard,
    validator::{risk_gate::StandardRiskGate, scorer::HeuristicScorer},
};
use tokio::io::BufReader;

/// Connects the audit store, runs migrations and opens the chain head.
async fn init_recorder(cfg: &AppConfig) -> anyhow::Result<Arc<DecisionRecorder>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let repo = Arc::new(SqlxAuditRepository::new((*db.pool).clone()));
    let recorder = DecisionRecorder::open(repo).await?;

    Ok(Arc::new(recorder))
}

/// Fixed-cadence cycle loop for one scope.
fn start_cycle_loop(pipeline: Arc<DecisionPipeline>, scope: String, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match pipeline.run_cycle(&scope).await {
                Ok(_) => {}
                // Expected while feeds warm up or before the first command.
                Err(PipelineError::StaleInput(_) | PipelineError::NoIntent { .. }) => {}
                Err(PipelineError::Superseded { .. }) => {}
                Err(e) => tracing::error!(error = %e, scope = %scope, "decision cycle failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let cfg = AppConfig::from_env()?;
    init_tracing("strategist", cfg.json_logs);

    tracing::info!("Starting strategist daemon...");

    let recorder = init_recorder(&cfg).await?;
    let counters = Counters::default();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scopes = Arc::new(ScopeRegistry::new(cfg.pipeline.novelty_lookback_ms));

    let pipeline = Arc::new(
        DecisionPipeline::new(
            &cfg.pipeline,
            PipelineDeps {
                board: SignalBoard::new(),
                scopes: scopes.clone(),
                recorder: recorder.clone(),
                sources: vec![Arc::new(RuleProposer::default()) as Arc<dyn ProposalSource>],
                scorer: Arc::new(HeuristicScorer::default()),
                gate: Arc::new(StandardRiskGate),
                sink: Arc::new(LoggingDecisionSink),
                counters: counters.clone(),
                clock: clock.clone(),
            },
        )
        .await?,
    );

    // Feedback domain: outcome intake -> collector -> learning queue -> memory sink.
    let (collector, updates_rx) = FeedbackCollector::new(
        recorder,
        scopes,
        counters.clone(),
        clock,
        cfg.feedback_queue_capacity,
    );
    tokio::spawn(run_memory_sink(updates_rx, Arc::new(LoggingMemorySink)));
    let (outcome_tx, _outcome_worker) =
        spawn_outcome_worker(Arc::new(collector), cfg.feedback_queue_capacity);

    let feed_pipeline = pipeline.clone();
    let default_scope = cfg.scope.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = run_feed(stdin, feed_pipeline, outcome_tx, default_scope).await {
            tracing::error!(error = ?e, "feed reader stopped");
        }
    });

    start_cycle_loop(
        pipeline,
        cfg.scope.clone(),
        Duration::from_millis(cfg.cycle_interval_ms),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(counters = ?counters.snapshot(), "Shutdown signal received");

    Ok(())
}
