use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub cycles_started: Arc<AtomicU64>,
    pub cycles_committed: Arc<AtomicU64>,

    // abort reasons
    pub cycles_stale: Arc<AtomicU64>,
    pub cycles_no_intent: Arc<AtomicU64>,
    pub cycles_superseded: Arc<AtomicU64>,
    pub cycles_no_viable: Arc<AtomicU64>,
    pub duplicate_commits: Arc<AtomicU64>,

    pub generation_degraded: Arc<AtomicU64>,
    pub candidates_rejected: Arc<AtomicU64>,
    pub scoring_unavailable: Arc<AtomicU64>,
    pub publish_failures: Arc<AtomicU64>,

    // feedback domain
    pub outcomes_attached: Arc<AtomicU64>,
    pub outcomes_stale: Arc<AtomicU64>,
    pub outcomes_unknown: Arc<AtomicU64>,
    pub learning_dropped: Arc<AtomicU64>,
    pub feedback_lag_ms: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub cycles_started: u64,
    pub cycles_committed: u64,
    pub cycles_stale: u64,
    pub cycles_no_intent: u64,
    pub cycles_superseded: u64,
    pub cycles_no_viable: u64,
    pub duplicate_commits: u64,
    pub generation_degraded: u64,
    pub candidates_rejected: u64,
    pub scoring_unavailable: u64,
    pub publish_failures: u64,
    pub outcomes_attached: u64,
    pub outcomes_stale: u64,
    pub outcomes_unknown: u64,
    pub learning_dropped: u64,
    pub feedback_lag_ms: u64,
}

pub fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

pub fn add(c: &AtomicU64, n: usize) {
    c.fetch_add(n as u64, Ordering::Relaxed);
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        let r = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);
        CountersSnapshot {
            cycles_started: r(&self.cycles_started),
            cycles_committed: r(&self.cycles_committed),
            cycles_stale: r(&self.cycles_stale),
            cycles_no_intent: r(&self.cycles_no_intent),
            cycles_superseded: r(&self.cycles_superseded),
            cycles_no_viable: r(&self.cycles_no_viable),
            duplicate_commits: r(&self.duplicate_commits),
            generation_degraded: r(&self.generation_degraded),
            candidates_rejected: r(&self.candidates_rejected),
            scoring_unavailable: r(&self.scoring_unavailable),
            publish_failures: r(&self.publish_failures),
            outcomes_attached: r(&self.outcomes_attached),
            outcomes_stale: r(&self.outcomes_stale),
            outcomes_unknown: r(&self.outcomes_unknown),
            learning_dropped: r(&self.learning_dropped),
            feedback_lag_ms: r(&self.feedback_lag_ms),
        }
    }
}
