use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::provider_policy::ProviderPolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-provider rate gate with a count of callers currently waiting for budget.
#[derive(Clone)]
pub struct ThrottlingQueue {
    limiter: Arc<DirectRateLimiter>,
    clock: DefaultClock,
    waiting: Arc<AtomicUsize>,
    max_wait: Duration,
}

impl ThrottlingQueue {
    pub fn new(quota_window: Duration, quota_limit: u32, max_wait: Duration) -> Self {
        let quota = quota_from_window(quota_window, quota_limit);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            clock: DefaultClock::default(),
            waiting: Arc::new(AtomicUsize::new(0)),
            max_wait,
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(policy.quota_window, policy.quota_limit, policy.max_wait)
    }

    /// Tries to take one unit of budget; on refusal returns how long until one frees up.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Waits for budget, giving up once the wait would exceed `max_wait` or `budget`.
    ///
    /// Returns `false` when the caller should skip this provider.
    pub async fn acquire(&self, budget: Duration) -> bool {
        let limit = self.max_wait.min(budget);
        let mut waited = Duration::ZERO;

        loop {
            let delay = match self.try_acquire() {
                Ok(()) => return true,
                Err(delay) => delay,
            };
            if waited + delay > limit {
                return false;
            }

            self.waiting.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
            self.waiting.fetch_sub(1, Ordering::Relaxed);
            waited += delay;
        }
    }

    pub fn pending_len(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let safe_limit = quota_limit.max(1);
    let burst = NonZeroU32::new(safe_limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
