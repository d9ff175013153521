use std::collections::VecDeque;

/// Time-bounded FIFO of `(timestamp_ms, item)` pairs.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    window: VecDeque<(u64, T)>, // (timestamp_ms, item)
    max_age_ms: u64,
}

impl<T> RollingWindow<T> {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            window: VecDeque::new(),
            max_age_ms,
        }
    }

    /// Inserts keeping timestamp order, then evicts against the newest timestamp.
    pub fn push(&mut self, ts_ms: u64, item: T) {
        let pos = self
            .window
            .iter()
            .rposition(|(ts, _)| *ts <= ts_ms)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.window.insert(pos, (ts_ms, item));

        let newest = self.window.back().map(|(ts, _)| *ts).unwrap_or(ts_ms);
        self.evict_old(newest);
    }

    /// Items still inside the window as of `now_ms`.
    pub fn iter_within(&self, now_ms: u64) -> impl Iterator<Item = &T> {
        let max_age = self.max_age_ms;
        self.window
            .iter()
            .filter(move |(ts, _)| now_ms.saturating_sub(*ts) <= max_age)
            .map(|(_, item)| item)
    }

    pub fn evict_old(&mut self, now_ms: u64) {
        while let Some((ts, _)) = self.window.front() {
            if now_ms.saturating_sub(*ts) > self.max_age_ms {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
