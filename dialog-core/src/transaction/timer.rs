//! RFC 3261 §17 transaction timers.
//!
//! Each FSM owns a small set of named timers (`A`..`K`). A [`Timer`] is a
//! cancellable, fire-once background task that posts a [`TimerFired`] command
//! back to its transaction's event loop; cancelling it (dropping the handle
//! or calling [`Timer::cancel`]) guarantees the callback never fires after
//! that point, matching the "cancellation is cheap and correct" guidance in
//! Section 9.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    A,
    B,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
}

#[derive(Debug, Clone, Copy)]
pub struct TimerSettings {
    pub t1: Duration,
    pub t2: Duration,
    pub t4: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
        }
    }
}

impl TimerSettings {
    /// `next = min(2 * current, T2)` (Section 9, Timer A/E backoff rule).
    pub fn backoff(&self, current: Duration) -> Duration {
        std::cmp::min(current * 2, self.t2)
    }

    pub fn timer_b(&self) -> Duration {
        self.t1 * 64
    }

    pub fn timer_d(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { Duration::from_secs(32) }
    }

    pub fn timer_f(&self) -> Duration {
        self.t1 * 64
    }

    pub fn timer_h(&self) -> Duration {
        self.t1 * 64
    }

    pub fn timer_i(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.t4 }
    }

    pub fn timer_j(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.t1 * 64 }
    }

    pub fn timer_k(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.t4 }
    }
}

/// A handle to a scheduled fire of `name`. Dropping it without calling
/// [`Timer::cancel`] still aborts the underlying task, since `Timer` owns the
/// `JoinHandle` and aborts on drop.
pub struct Timer {
    name: TimerName,
    handle: JoinHandle<()>,
}

impl Timer {
    pub fn schedule<T>(name: TimerName, delay: Duration, tx: mpsc::Sender<T>, event: T) -> Self
    where
        T: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        });
        Timer { name, handle }
    }

    pub fn name(&self) -> TimerName {
        self.name
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
