use anyhow::Result;
use async_trait::async_trait;
use corelib::{AuditEntry, AuditRecord, CycleId, OutcomeRecord};

use crate::error::RecorderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStatus {
    Attached,
    /// An outcome observed at the same time or later is already attached.
    StaleIgnored,
}

/// Result of one outcome write.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub status: AttachStatus,
    /// Outcome held before this write; the one replaced when `Attached`.
    pub previous: Option<OutcomeRecord>,
}

/// One link of the audit chain exactly as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
    pub seq: u64,
    pub cycle_id: CycleId,
    pub record_json: String,
    pub digest: String,
    pub prev_digest: Option<String>,
}

/// Append-only audit store. Records are write-once; only the outcome slot
/// of an existing record may change.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Stores `record` as chain link `seq` in one atomic write.
    /// Fails with `DuplicateCycle` if the cycle id is already present.
    async fn insert(
        &self,
        seq: u64,
        record: &AuditRecord,
        record_json: &str,
        digest: &str,
        prev_digest: Option<&str>,
    ) -> Result<(), RecorderError>;

    async fn exists(&self, cycle_id: CycleId) -> Result<bool>;

    async fn fetch(&self, cycle_id: CycleId) -> Result<Option<AuditEntry>>;

    /// Records created within `[from_ms, to_ms]`, oldest first.
    async fn fetch_range(&self, from_ms: u64, to_ms: u64) -> Result<Vec<AuditEntry>>;

    /// Every link in commit order.
    async fn fetch_chain(&self) -> Result<Vec<ChainLink>>;

    /// `(seq, digest)` of the last committed link.
    async fn chain_head(&self) -> Result<Option<(u64, String)>>;

    async fn max_cycle_id(&self) -> Result<Option<CycleId>>;

    /// Last-write-wins by `observed_at_ms`. `None` when the cycle is unknown.
    /// The returned `previous` is read in the same atomic step as the write.
    async fn attach_outcome(&self, outcome: &OutcomeRecord) -> Result<Option<Attachment>>;
}
