use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

/// Narrow time abstraction so the scheduler and executor can be driven
/// deterministically in tests. `after` exists as a distinct name from
/// `sleep` for callers that want to express "fire once after D" (the
/// scheduler's wakeup timer) versus "pause for D" (the executor's retry
/// backoff) — both delegate to the same underlying wait.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, d: StdDuration);
    async fn after(&self, d: StdDuration) {
        self.sleep(d).await
    }
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone, Default)]
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, d: StdDuration) {
        tokio::time::sleep(d).await;
    }
}

/// A clock that only advances when a test explicitly calls `advance`.
/// Sleepers park on a `Notify` and recheck their deadline every time the
/// clock moves, so heap operations driven by a `ManualClock` happen in a
/// deterministic order relative to `advance` calls rather than real wall
/// time.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    notify: Notify,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(ManualClock {
            now: Mutex::new(start),
            notify: Notify::new(),
        })
    }

    /// Advances the clock by `d` and wakes every sleeper so it can recheck
    /// whether its deadline has now passed.
    pub async fn advance(&self, d: StdDuration) {
        {
            let mut now = self.now.lock().expect("clock mutex poisoned");
            *now += chrono::Duration::from_std(d).expect("duration fits in chrono::Duration");
        }
        self.notify.notify_waiters();
        // Give woken tasks a turn to observe the new time before the test
        // driver proceeds to its next assertion.
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }

    async fn sleep(&self, d: StdDuration) {
        let deadline = self.now()
            + chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::max_value());
        loop {
            if self.now() >= deadline {
                return;
            }
            let notified = self.notify.notified();
            if self.now() >= deadline {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_returns_immediately_for_zero_duration() {
        let clock = ManualClock::new(Utc::now());
        clock.sleep(StdDuration::ZERO).await;
    }

    #[tokio::test]
    async fn sleep_wakes_on_advance() {
        let clock = ManualClock::new(Utc::now());
        let start = clock.now();

        let waiter = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep(StdDuration::from_secs(5)).await;
                clock.now()
            })
        };

        tokio::task::yield_now().await;
        clock.advance(StdDuration::from_secs(5)).await;

        let woke_at = waiter.await.unwrap();
        assert!(woke_at >= start + chrono::Duration::seconds(5));
    }
}
