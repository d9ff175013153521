//! Write-once, hash-chained audit trail.
//!
//! `commit` is the persist-before-release point of every cycle: the pipeline
//! only hands a decision downstream after it returns `Ok`. Commits are
//! serialized so that each record links to exactly one predecessor.

pub mod memory;
pub mod repository;
pub mod repository_sqlx;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::logger::warn_if_slow;
use corelib::{AuditEntry, AuditRecord, CycleId, OutcomeRecord, digest};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::RecorderError;
use repository::{Attachment, AuditRepository, ChainLink};

#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub cycle_id: CycleId,
    pub seq: u64,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokenLink {
    pub seq: u64,
    pub cycle_id: CycleId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    /// Links verified intact before the first break (or all of them).
    pub checked: usize,
    pub first_broken: Option<BrokenLink>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken.is_none()
    }
}

/// Recomputes the chain over stored links, stopping at the first mismatch.
pub fn verify_links(links: &[ChainLink]) -> ChainReport {
    let mut prev: Option<&str> = None;
    for (checked, link) in links.iter().enumerate() {
        let reason = if link.prev_digest.as_deref() != prev {
            Some("previous digest does not match chain")
        } else if digest::chain_digest(prev, &link.record_json) != link.digest {
            Some("record digest mismatch")
        } else {
            None
        };

        if let Some(reason) = reason {
            return ChainReport {
                checked,
                first_broken: Some(BrokenLink {
                    seq: link.seq,
                    cycle_id: link.cycle_id,
                    reason: reason.to_string(),
                }),
            };
        }
        prev = Some(link.digest.as_str());
    }

    ChainReport {
        checked: links.len(),
        first_broken: None,
    }
}

pub struct DecisionRecorder {
    repo: Arc<dyn AuditRepository>,
    /// `(seq, digest)` of the last committed link.
    head: Mutex<Option<(u64, String)>>,
}

impl DecisionRecorder {
    /// Loads the chain head so new commits extend the stored chain.
    pub async fn open(repo: Arc<dyn AuditRepository>) -> anyhow::Result<Self> {
        let head = repo.chain_head().await.context("load audit chain head")?;
        debug!(target: "recorder", head_seq = head.as_ref().map(|(s, _)| *s), "audit chain opened");
        Ok(Self {
            repo,
            head: Mutex::new(head),
        })
    }

    /// Highest cycle id ever committed; seeds the cycle allocator.
    pub async fn last_cycle_id(&self) -> Result<Option<CycleId>, RecorderError> {
        Ok(self.repo.max_cycle_id().await?)
    }

    /// Durably stores `record`. Fails with `DuplicateCycle` when the id was
    /// already committed; the first commit stays authoritative.
    #[instrument(skip_all, target = "recorder", fields(cycle_id = %record.cycle_id))]
    pub async fn commit(&self, record: &AuditRecord) -> Result<CommitReceipt, RecorderError> {
        let mut head = self.head.lock().await;

        if self.repo.exists(record.cycle_id).await? {
            warn!(target: "recorder", "duplicate commit rejected");
            return Err(RecorderError::DuplicateCycle(record.cycle_id));
        }

        let body = digest::canonical_json(record).context("serialize audit record")?;
        let prev = head.as_ref().map(|(_, d)| d.as_str());
        let link_digest = digest::chain_digest(prev, &body);
        let seq = head.as_ref().map(|(s, _)| s + 1).unwrap_or(1);

        warn_if_slow(
            "db_insert_audit_record",
            Duration::from_millis(100),
            self.repo.insert(seq, record, &body, &link_digest, prev),
        )
        .await?;

        *head = Some((seq, link_digest.clone()));
        info!(target: "recorder", seq, kind = %record.decision.kind(), "audit record committed");

        Ok(CommitReceipt {
            cycle_id: record.cycle_id,
            seq,
            digest: link_digest,
        })
    }

    /// `None` when no record exists for the outcome's cycle.
    #[instrument(skip_all, target = "recorder", fields(cycle_id = %outcome.cycle_id))]
    pub async fn attach_outcome(
        &self,
        outcome: &OutcomeRecord,
    ) -> Result<Option<Attachment>, RecorderError> {
        let attachment = warn_if_slow(
            "db_attach_outcome",
            Duration::from_millis(50),
            self.repo.attach_outcome(outcome),
        )
        .await
        .context("attach outcome")?;
        Ok(attachment)
    }

    pub async fn fetch(&self, cycle_id: CycleId) -> Result<Option<AuditEntry>, RecorderError> {
        Ok(self
            .repo
            .fetch(cycle_id)
            .await
            .with_context(|| format!("fetch audit record {cycle_id}"))?)
    }

    pub async fn fetch_range(
        &self,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<AuditEntry>, RecorderError> {
        Ok(warn_if_slow(
            "db_fetch_range",
            Duration::from_millis(200),
            self.repo.fetch_range(from_ms, to_ms),
        )
        .await
        .context("fetch audit range")?)
    }

    #[instrument(skip_all, target = "recorder")]
    pub async fn verify_chain(&self) -> Result<ChainReport, RecorderError> {
        let links = self.repo.fetch_chain().await.context("load audit chain")?;
        let report = verify_links(&links);
        match &report.first_broken {
            None => info!(target: "recorder", checked = report.checked, "audit chain intact"),
            Some(b) => warn!(
                target: "recorder",
                alert = true,
                seq = b.seq,
                cycle_id = %b.cycle_id,
                reason = %b.reason,
                "audit chain broken"
            ),
        }
        Ok(report)
    }
}
