use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Audit chain. Rows are write-once except the outcome columns.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS audit_records (
  cycle_id BIGINT PRIMARY KEY,
  seq BIGINT NOT NULL UNIQUE,
  scope TEXT NOT NULL,
  created_ms BIGINT NOT NULL,
  decision_kind TEXT NOT NULL,
  is_fallback INTEGER NOT NULL CHECK (is_fallback IN (0,1)),
  record_json TEXT NOT NULL,
  digest TEXT NOT NULL,
  prev_digest TEXT NOT NULL DEFAULT '',
  outcome_json TEXT NOT NULL DEFAULT '',
  outcome_observed_ms BIGINT NOT NULL DEFAULT -1
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_records(created_ms);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_audit_scope ON audit_records(scope, created_ms);"#)
        .execute(pool)
        .await?;

    Ok(())
}
