use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cycle cancelled")]
pub struct Cancelled;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    #[error("call timed out")]
    Timeout,
    #[error("cycle cancelled")]
    Cancelled,
}

/// Cancellation token scoped to one cycle.
#[derive(Clone, Debug)]
pub struct CycleToken {
    rx: watch::Receiver<bool>,
}

impl CycleToken {
    pub(crate) fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Token that is never cancelled.
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled; pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling: this cycle can no longer be superseded.
                if *rx.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }

    /// Runs an external call under both a timeout and this token.
    pub async fn bounded<F>(&self, limit: Duration, fut: F) -> Result<F::Output, CallError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(CallError::Cancelled),
            res = tokio::time::timeout(limit, fut) => res.map_err(|_| CallError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_times_out_slow_calls() {
        let token = CycleToken::detached();
        let res = token
            .bounded(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await;
        assert_eq!(res, Err(CallError::Timeout));
    }

    #[tokio::test]
    async fn bounded_returns_value_of_fast_calls() {
        let token = CycleToken::detached();
        let res = token.bounded(Duration::from_secs(1), async { 3 }).await;
        assert_eq!(res, Ok(3));
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_call() {
        let (tx, rx) = watch::channel(false);
        let token = CycleToken::from_receiver(rx);

        let call = token.bounded(Duration::from_secs(30), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            1
        });
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tx.send_replace(true);
        };

        let (res, _) = tokio::join!(call, cancel);
        assert_eq!(res, Err(CallError::Cancelled));
        assert!(token.is_cancelled());
    }
}
