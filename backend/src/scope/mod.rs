//! Per-scope shared state.
//!
//! A scope is a logical account/asset book. The rolling novelty window and the
//! last known intent are the only state cycles share; both live here behind a
//! per-scope lock so that unrelated scopes never contend.

mod token;

pub use token::{CallError, Cancelled, CycleToken};

use std::collections::HashMap;
use std::sync::Arc;

use corelib::{CandidateSignature, Intent};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::validator::novelty::NoveltyWindow;

pub struct ScopeState {
    pub last_intent: Option<Intent>,
    pub novelty: NoveltyWindow,
    /// Cancellation handle of the most recent cycle.
    active: Option<watch::Sender<bool>>,
}

impl ScopeState {
    fn new(novelty_lookback_ms: u64) -> Self {
        Self {
            last_intent: None,
            novelty: NoveltyWindow::new(novelty_lookback_ms),
            active: None,
        }
    }

    /// Registers a new cycle, cancelling whichever cycle was active before.
    pub fn begin_cycle(&mut self) -> CycleToken {
        self.cancel_active();
        let (tx, rx) = watch::channel(false);
        self.active = Some(tx);
        CycleToken::from_receiver(rx)
    }

    /// Returns true if a cycle token was live and is now cancelled.
    pub fn cancel_active(&mut self) -> bool {
        match self.active.take() {
            Some(tx) => {
                let was_live = !*tx.borrow();
                tx.send_replace(true);
                was_live
            }
            None => false,
        }
    }
}

pub struct ScopeRegistry {
    novelty_lookback_ms: u64,
    scopes: Mutex<HashMap<String, Arc<Mutex<ScopeState>>>>,
}

impl ScopeRegistry {
    pub fn new(novelty_lookback_ms: u64) -> Self {
        Self {
            novelty_lookback_ms,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Lock handle for `scope`, created on first use.
    pub fn handle(&self, scope: &str) -> Arc<Mutex<ScopeState>> {
        let mut scopes = self.scopes.lock();
        scopes
            .entry(scope.to_string())
            .or_insert_with(|| {
                debug!(scope, "creating scope state");
                Arc::new(Mutex::new(ScopeState::new(self.novelty_lookback_ms)))
            })
            .clone()
    }

    /// Stores `intent` as the scope's last known intent and cancels the in-flight cycle.
    pub fn replace_intent(&self, scope: &str, intent: Intent) -> bool {
        let handle = self.handle(scope);
        let mut state = handle.lock();
        state.last_intent = Some(intent);
        let superseded = state.cancel_active();
        if superseded {
            info!(scope, "new intent superseded in-flight cycle");
        }
        superseded
    }

    pub fn record_loss(&self, scope: &str, signature: CandidateSignature, ts_ms: u64) {
        let handle = self.handle(scope);
        handle.lock().novelty.record_loss(ts_ms, signature);
    }

    pub fn last_intent(&self, scope: &str) -> Option<Intent> {
        self.handle(scope).lock().last_intent.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{RiskLimits, SizingRules};
    use std::collections::BTreeSet;

    fn intent(asset: &str) -> Intent {
        Intent {
            target_assets: BTreeSet::from([asset.to_string()]),
            conditions: vec![],
            sizing: SizingRules {
                base_fraction: 0.1,
                scale_by_confidence: false,
            },
            risk_limits: RiskLimits {
                max_drawdown: 0.1,
                stop_loss: 0.05,
                max_exposure: 0.2,
            },
            horizon_ms: 60_000,
        }
    }

    #[test]
    fn begin_cycle_cancels_previous_token() {
        let reg = ScopeRegistry::new(1_000);
        let handle = reg.handle("acct-1");

        let first = handle.lock().begin_cycle();
        assert!(!first.is_cancelled());

        let second = handle.lock().begin_cycle();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn replacing_intent_supersedes_only_its_scope() {
        let reg = ScopeRegistry::new(1_000);
        let a = reg.handle("a").lock().begin_cycle();
        let b = reg.handle("b").lock().begin_cycle();

        assert!(reg.replace_intent("a", intent("SOL")));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(reg.last_intent("a"), Some(intent("SOL")));
        assert_eq!(reg.last_intent("b"), None);
    }

    #[test]
    fn replacing_intent_without_active_cycle_reports_no_supersede() {
        let reg = ScopeRegistry::new(1_000);
        assert!(!reg.replace_intent("a", intent("SOL")));
        assert!(!reg.replace_intent("a", intent("ETH")));
        assert_eq!(reg.last_intent("a"), Some(intent("ETH")));
    }

    #[test]
    fn losses_are_scoped() {
        let reg = ScopeRegistry::new(1_000);
        let sig = CandidateSignature::from("momentum|SOL:rsi<30.0000|".to_string());
        reg.record_loss("a", sig.clone(), 10);

        assert_eq!(reg.handle("a").lock().novelty.snapshot(20).penalty(&sig), 0.5);
        assert_eq!(reg.handle("b").lock().novelty.snapshot(20).penalty(&sig), 0.0);
    }
}
