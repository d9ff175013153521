use std::collections::BTreeMap;

use async_trait::async_trait;
use corelib::{AuditEntry, AuditRecord, CycleId, OutcomeRecord};
use parking_lot::Mutex;

use crate::error::RecorderError;
use crate::recorder::repository::{AttachStatus, Attachment, AuditRepository, ChainLink};

struct Row {
    seq: u64,
    record: AuditRecord,
    record_json: String,
    digest: String,
    prev_digest: Option<String>,
    outcome: Option<OutcomeRecord>,
}

impl Row {
    fn entry(&self) -> AuditEntry {
        AuditEntry {
            record: self.record.clone(),
            digest: self.digest.clone(),
            prev_digest: self.prev_digest.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Process-local audit store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryAuditRepository {
    rows: Mutex<BTreeMap<CycleId, Row>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Overwrites a stored body in place, bypassing write-once. Test hook for
    /// tamper detection.
    #[cfg(test)]
    pub(crate) fn tamper(&self, cycle_id: CycleId, record_json: &str) {
        if let Some(row) = self.rows.lock().get_mut(&cycle_id) {
            row.record_json = record_json.to_string();
        }
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn insert(
        &self,
        seq: u64,
        record: &AuditRecord,
        record_json: &str,
        digest: &str,
        prev_digest: Option<&str>,
    ) -> Result<(), RecorderError> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&record.cycle_id) {
            return Err(RecorderError::DuplicateCycle(record.cycle_id));
        }
        if rows.values().any(|r| r.seq == seq) {
            return Err(anyhow::anyhow!("chain sequence {seq} already taken by another writer").into());
        }
        rows.insert(
            record.cycle_id,
            Row {
                seq,
                record: record.clone(),
                record_json: record_json.to_string(),
                digest: digest.to_string(),
                prev_digest: prev_digest.map(str::to_string),
                outcome: None,
            },
        );
        Ok(())
    }

    async fn exists(&self, cycle_id: CycleId) -> anyhow::Result<bool> {
        Ok(self.rows.lock().contains_key(&cycle_id))
    }

    async fn fetch(&self, cycle_id: CycleId) -> anyhow::Result<Option<AuditEntry>> {
        Ok(self.rows.lock().get(&cycle_id).map(Row::entry))
    }

    async fn fetch_range(&self, from_ms: u64, to_ms: u64) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = self.rows.lock();
        let mut hits: Vec<&Row> = rows
            .values()
            .filter(|r| (from_ms..=to_ms).contains(&r.record.created_at_ms))
            .collect();
        hits.sort_by_key(|r| (r.record.created_at_ms, r.seq));
        Ok(hits.into_iter().map(Row::entry).collect())
    }

    async fn fetch_chain(&self) -> anyhow::Result<Vec<ChainLink>> {
        let rows = self.rows.lock();
        let mut links: Vec<ChainLink> = rows
            .values()
            .map(|r| ChainLink {
                seq: r.seq,
                cycle_id: r.record.cycle_id,
                record_json: r.record_json.clone(),
                digest: r.digest.clone(),
                prev_digest: r.prev_digest.clone(),
            })
            .collect();
        links.sort_by_key(|l| l.seq);
        Ok(links)
    }

    async fn chain_head(&self) -> anyhow::Result<Option<(u64, String)>> {
        Ok(self
            .rows
            .lock()
            .values()
            .max_by_key(|r| r.seq)
            .map(|r| (r.seq, r.digest.clone())))
    }

    async fn max_cycle_id(&self) -> anyhow::Result<Option<CycleId>> {
        Ok(self.rows.lock().keys().next_back().copied())
    }

    async fn attach_outcome(
        &self,
        outcome: &OutcomeRecord,
    ) -> anyhow::Result<Option<Attachment>> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&outcome.cycle_id) else {
            return Ok(None);
        };
        let status = match &row.outcome {
            Some(prev) if prev.observed_at_ms >= outcome.observed_at_ms => {
                AttachStatus::StaleIgnored
            }
            _ => AttachStatus::Attached,
        };
        let previous = match status {
            AttachStatus::Attached => row.outcome.replace(outcome.clone()),
            AttachStatus::StaleIgnored => row.outcome.clone(),
        };
        Ok(Some(Attachment { status, previous }))
    }
}
