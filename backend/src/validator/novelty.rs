use std::collections::HashMap;

use corelib::CandidateSignature;

use crate::rolling_window::RollingWindow;

/// Recently losing candidate signatures of one scope.
#[derive(Debug, Clone)]
pub struct NoveltyWindow {
    losses: RollingWindow<CandidateSignature>,
}

impl NoveltyWindow {
    pub fn new(lookback_ms: u64) -> Self {
        Self {
            losses: RollingWindow::new(lookback_ms),
        }
    }

    pub fn record_loss(&mut self, ts_ms: u64, signature: CandidateSignature) {
        self.losses.push(ts_ms, signature);
    }

    /// Loss counts within the lookback as of `now_ms`, detached from the window
    /// so scoring can run without holding the scope lock.
    pub fn snapshot(&self, now_ms: u64) -> NoveltySnapshot {
        let mut counts = HashMap::new();
        for sig in self.losses.iter_within(now_ms) {
            *counts.entry(sig.clone()).or_insert(0u32) += 1;
        }
        NoveltySnapshot { counts }
    }

    pub fn len(&self) -> usize {
        self.losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoveltySnapshot {
    counts: HashMap<CandidateSignature, u32>,
}

impl NoveltySnapshot {
    /// `1 - 0.5^n` for `n` exact matches: 0 for unseen, 0.5 after one loss,
    /// approaching 1 with repetition.
    pub fn penalty(&self, signature: &CandidateSignature) -> f64 {
        match self.counts.get(signature) {
            Some(&n) => 1.0 - 0.5f64.powi(n.min(1_000) as i32),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(s: &str) -> CandidateSignature {
        CandidateSignature::from(s.to_string())
    }

    #[test]
    fn penalty_grows_with_repeated_losses() {
        let mut w = NoveltyWindow::new(1_000);
        let a = sig("momentum|SOL:sentiment>0.3000|");
        assert_eq!(w.snapshot(0).penalty(&a), 0.0);

        w.record_loss(10, a.clone());
        assert_eq!(w.snapshot(10).penalty(&a), 0.5);

        w.record_loss(20, a.clone());
        assert_eq!(w.snapshot(20).penalty(&a), 0.75);
        assert_eq!(w.snapshot(20).penalty(&sig("contain||")), 0.0);
    }

    #[test]
    fn losses_expire_after_lookback() {
        let mut w = NoveltyWindow::new(100);
        let a = sig("isolate||");
        w.record_loss(0, a.clone());

        assert_eq!(w.snapshot(100).penalty(&a), 0.5);
        assert_eq!(w.snapshot(101).penalty(&a), 0.0);
    }
}
