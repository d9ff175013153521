use anyhow::{Context, anyhow};
use async_trait::async_trait;
use corelib::{AuditEntry, AuditRecord, CycleId, OutcomeRecord};
use sqlx::{AnyPool, Row};

use crate::error::RecorderError;
use crate::recorder::repository::{AttachStatus, Attachment, AuditRepository, ChainLink};

/// SQLx-backed audit store.
/// Responsible only for persistence and row mapping.
pub struct SqlxAuditRepository {
    pool: AnyPool,
}

impl SqlxAuditRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

const ENTRY_COLUMNS: &str = "cycle_id, record_json, digest, prev_digest, outcome_json";

#[async_trait]
impl AuditRepository for SqlxAuditRepository {
    async fn insert(
        &self,
        seq: u64,
        record: &AuditRecord,
        record_json: &str,
        digest: &str,
        prev_digest: Option<&str>,
    ) -> Result<(), RecorderError> {
        let res = sqlx::query(
            r#"
INSERT INTO audit_records
  (cycle_id, seq, scope, created_ms, decision_kind, is_fallback, record_json, digest, prev_digest)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(u64_to_i64(record.cycle_id.get())?)
        .bind(u64_to_i64(seq)?)
        .bind(record.scope.as_str())
        .bind(u64_to_i64(record.created_at_ms)?)
        .bind(record.decision.kind().as_str())
        .bind(if record.decision.is_fallback() { 1i64 } else { 0i64 })
        .bind(record_json)
        .bind(digest)
        .bind(prev_digest.unwrap_or_default())
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                if self.exists(record.cycle_id).await? {
                    Err(RecorderError::DuplicateCycle(record.cycle_id))
                } else {
                    Err(anyhow!("chain sequence {seq} already taken by another writer").into())
                }
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("insert audit record for cycle {}", record.cycle_id))
                .into()),
        }
    }

    async fn exists(&self, cycle_id: CycleId) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT cycle_id FROM audit_records WHERE cycle_id = ?;")
            .bind(u64_to_i64(cycle_id.get())?)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn fetch(&self, cycle_id: CycleId) -> anyhow::Result<Option<AuditEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM audit_records WHERE cycle_id = ?;"
        ))
        .bind(u64_to_i64(cycle_id.get())?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_entry(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_range(&self, from_ms: u64, to_ms: u64) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM audit_records \
             WHERE created_ms >= ? AND created_ms <= ? ORDER BY created_ms, seq;"
        ))
        .bind(u64_to_i64(from_ms)?)
        .bind(u64_to_i64(to_ms.min(i64::MAX as u64))?)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_entry(&r) {
                Ok(e) => out.push(e),
                Err(e) => {
                    // poison-row resilience: report, keep the rest of the range
                    tracing::warn!(error = %format!("{e:#}"), "skipping malformed audit row");
                }
            }
        }
        Ok(out)
    }

    async fn fetch_chain(&self) -> anyhow::Result<Vec<ChainLink>> {
        let rows = sqlx::query(
            "SELECT seq, cycle_id, record_json, digest, prev_digest FROM audit_records ORDER BY seq;",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(ChainLink {
                    seq: i64_to_u64(r.get("seq"))?,
                    cycle_id: CycleId(i64_to_u64(r.get("cycle_id"))?),
                    record_json: r.get("record_json"),
                    digest: r.get("digest"),
                    prev_digest: non_empty(r.get("prev_digest")),
                })
            })
            .collect()
    }

    async fn chain_head(&self) -> anyhow::Result<Option<(u64, String)>> {
        let row = sqlx::query("SELECT seq, digest FROM audit_records ORDER BY seq DESC LIMIT 1;")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some((i64_to_u64(r.get("seq"))?, r.get("digest")))),
            None => Ok(None),
        }
    }

    async fn max_cycle_id(&self) -> anyhow::Result<Option<CycleId>> {
        let row =
            sqlx::query("SELECT cycle_id FROM audit_records ORDER BY cycle_id DESC LIMIT 1;")
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(r) => Ok(Some(CycleId(i64_to_u64(r.get("cycle_id"))?))),
            None => Ok(None),
        }
    }

    async fn attach_outcome(
        &self,
        outcome: &OutcomeRecord,
    ) -> anyhow::Result<Option<Attachment>> {
        let json = serde_json::to_string(outcome).context("serialize outcome")?;
        let observed = u64_to_i64(outcome.observed_at_ms)?;
        let cycle_id = u64_to_i64(outcome.cycle_id.get())?;

        // Compare-and-swap on the held observation time: the update only lands
        // if nobody replaced the outcome since it was read.
        loop {
            let Some(row) = sqlx::query(
                "SELECT outcome_json, outcome_observed_ms FROM audit_records WHERE cycle_id = ?;",
            )
            .bind(cycle_id)
            .fetch_optional(&self.pool)
            .await?
            else {
                return Ok(None);
            };

            let held_ms: i64 = row.get("outcome_observed_ms");
            let previous = match non_empty(row.get("outcome_json")) {
                Some(raw) => Some(serde_json::from_str::<OutcomeRecord>(&raw).with_context(
                    || format!("invalid outcome_json for cycle {}", outcome.cycle_id),
                )?),
                None => None,
            };

            if held_ms >= observed {
                return Ok(Some(Attachment {
                    status: AttachStatus::StaleIgnored,
                    previous,
                }));
            }

            let res = sqlx::query(
                r#"
UPDATE audit_records
SET outcome_json = ?, outcome_observed_ms = ?
WHERE cycle_id = ? AND outcome_observed_ms = ?;
"#,
            )
            .bind(json.as_str())
            .bind(observed)
            .bind(cycle_id)
            .bind(held_ms)
            .execute(&self.pool)
            .await?;

            if res.rows_affected() > 0 {
                return Ok(Some(Attachment {
                    status: AttachStatus::Attached,
                    previous,
                }));
            }
            tracing::debug!(cycle_id = %outcome.cycle_id, "outcome changed underneath; retrying");
        }
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_entry(r: &sqlx::any::AnyRow) -> anyhow::Result<AuditEntry> {
    let cycle_id = CycleId(i64_to_u64(r.get("cycle_id"))?);

    let record_json: String = r.get("record_json");
    let record: AuditRecord = serde_json::from_str(&record_json)
        .with_context(|| format!("invalid record_json for cycle {cycle_id}"))?;

    let outcome = match non_empty(r.get("outcome_json")) {
        Some(raw) => Some(
            serde_json::from_str::<OutcomeRecord>(&raw)
                .with_context(|| format!("invalid outcome_json for cycle {cycle_id}"))?,
        ),
        None => None,
    };

    Ok(AuditEntry {
        record,
        digest: r.get("digest"),
        prev_digest: non_empty(r.get("prev_digest")),
        outcome,
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/* =========================
Numeric safety helpers
========================= */

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}
