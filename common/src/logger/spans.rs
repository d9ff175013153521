use std::time::Duration;

use tracing::{Span, field};

use super::TraceId;

/// Root span for one decision cycle. `cycle_id` is recorded once allocated.
pub fn cycle_span(trace_id: &TraceId, scope: &str) -> Span {
    tracing::info_span!(
        "cycle",
        trace_id = %trace_id.as_str(),
        scope = %scope,
        cycle_id = field::Empty
    )
}

pub fn annotate_cycle(cycle_id: u64) {
    Span::current().record("cycle_id", field::display(cycle_id));
}

/// Awaits `fut` and emits a `performance` warning when it took longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn warn_if_slow_returns_inner_value() {
        let v = warn_if_slow("noop", Duration::from_millis(50), async { 7u8 }).await;
        assert_eq!(v, 7);
    }
}
