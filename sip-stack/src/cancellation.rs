//! A lightweight cancellation handle for the suspension points named in
//! Section 5: `Send`, `Accept`, `Reject`, `Bye`, `SendRefer`, `WaitRefer`
//! all accept one of these and return promptly with [`crate::StackError::Cancelled`]
//! once it fires, rather than leaving a half-built request in flight.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{StackError, StackResult};

/// Cloneable cancellation token. Firing it wakes every clone waiting in
/// [`CancellationToken::cancelled`], including ones created after the fire
/// (checked eagerly, so no race between `cancel()` and a fresh `cancelled()` call).
#[derive(Clone, Default)]
pub struct CancellationToken {
    notify: Arc<Notify>,
    fired: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Runs `fut` to completion, unless `cancel` fires first, in which case this
/// returns [`StackError::Cancelled`] immediately and drops `fut`. Passing
/// `None` disables cancellation entirely (the common case for internal
/// call-sites that are not directly user-suspension points).
pub async fn run_cancellable<T, E>(
    cancel: Option<&CancellationToken>,
    fut: impl Future<Output = Result<T, E>>,
) -> StackResult<T>
where
    StackError: From<E>,
{
    match cancel {
        Some(token) if !token.is_cancelled() => {
            tokio::select! {
                res = fut => res.map_err(StackError::from),
                _ = token.cancelled() => Err(StackError::Cancelled),
            }
        }
        Some(_) => Err(StackError::Cancelled),
        None => fut.await.map_err(StackError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelling_before_await_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let result: StackResult<()> = run_cancellable(Some(&token), async { Ok::<_, StackError>(()) }).await;
        assert!(matches!(result, Err(StackError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelling_mid_flight_wins_the_race() {
        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token_clone.cancel();
        });
        let result: StackResult<()> = run_cancellable(Some(&token), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StackError>(())
        })
        .await;
        assert!(matches!(result, Err(StackError::Cancelled)));
    }

    #[tokio::test]
    async fn no_token_runs_to_completion() {
        let result = run_cancellable::<_, StackError>(None, async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
