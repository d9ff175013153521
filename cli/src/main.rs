pub mod cli;

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use common::logger::init_tracing;
use common::time::now_ms;
use corelib::{AuditEntry, CycleId};
use strategist::db::Db;
use strategist::recorder::DecisionRecorder;
use strategist::recorder::repository_sqlx::SqlxAuditRepository;

use cli::{Cli, Command, resolve_range};

fn summary_line(e: &AuditEntry) -> String {
    let d = &e.record.decision;
    format!(
        "{cycle}\t{created}\t{scope}\t{kind}{fallback}\trank={rank}\tscore={score:.4}\toutcome={outcome}",
        cycle = e.record.cycle_id,
        created = e.record.created_at_ms,
        scope = e.record.scope,
        kind = d.kind(),
        fallback = if d.is_fallback() { "*" } else { "" },
        rank = d.rank,
        score = d.composite_score,
        outcome = match &e.outcome {
            Some(o) if o.success => "success",
            Some(_) => "failure",
            None => "pending",
        },
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();
    init_tracing("strategist-cli", false);

    let cli = Cli::parse();

    let db = Db::connect(&cli.database_url).await?;
    db.migrate().await?;
    let recorder =
        DecisionRecorder::open(Arc::new(SqlxAuditRepository::new((*db.pool).clone()))).await?;

    match cli.command {
        Command::Get { cycle_id } => match recorder.fetch(CycleId(cycle_id)).await? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => bail!("no audit record for cycle {cycle_id}"),
        },

        Command::Range {
            from_ms,
            to_ms,
            since,
            until,
            summary,
        } => {
            let (from, to) = resolve_range(from_ms, to_ms, since, until, now_ms())?;
            let entries = recorder.fetch_range(from, to).await?;
            if summary {
                for e in &entries {
                    println!("{}", summary_line(e));
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
            tracing::info!(count = entries.len(), from, to, "range query complete");
        }

        Command::Verify => {
            let report = recorder.verify_chain().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_intact() {
                bail!("audit chain is broken");
            }
        }
    }

    Ok(())
}
