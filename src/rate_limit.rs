use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::reaper;

/// Admission policy for one controller: a trailing window and the number of
/// requests each key may spend inside it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitPolicy {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
        }
    }

    pub(crate) fn window_ms(&self) -> u64 {
        self.window.as_millis().try_into().unwrap_or(u64::MAX)
    }
}

/// Outcome of one admission check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests left in the window, derived from the total *before* the
    /// current request was recorded: an admit reports
    /// `max_requests - prior_total - 1`, a denial always reports zero.
    pub remaining: u32,
}

impl Decision {
    fn admit(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    fn deny() -> Self {
        Self {
            allowed: false,
            remaining: 0,
        }
    }
}

/// One second's worth of admitted requests for a key.
#[derive(Clone, Copy, Debug)]
struct TimeBucket {
    second: u64,
    count: u32,
}

/// Per-key sliding-window admission controller.
///
/// Each key owns an ordered run of per-second buckets. A check expires the
/// stale prefix and sums what is left; over quota the request is denied and
/// never recorded, so a client hammering an exhausted key cannot push its own
/// window forward. Under quota the request lands in the bucket for the
/// current second.
///
/// Time is milliseconds on a monotonic clock that reads zero when the
/// controller is built.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    policy: RateLimitPolicy,
    epoch: Instant,
    keys: Mutex<HashMap<String, VecDeque<TimeBucket>>>,
    reaper: Mutex<Option<AbortHandle>>,
}

impl SlidingWindowLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            epoch: Instant::now(),
            keys: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
        }
    }

    /// Builds the controller and starts its reaper at the default cadence.
    pub fn start(policy: RateLimitPolicy) -> Arc<Self> {
        let limiter = Arc::new(Self::new(policy));
        limiter.start_reaper(reaper::DEFAULT_REAPER_INTERVAL);
        limiter
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Decide whether `key` may spend one more request right now.
    pub fn check(&self, key: &str) -> Decision {
        // The clock is read while holding the lock, so same-key checks
        // append buckets in timestamp order.
        let mut keys = self.keys.lock();
        let now_ms = self.now_ms();
        self.check_locked(&mut keys, key, now_ms)
    }

    /// [`check`](Self::check) with the clock supplied by the caller, for
    /// deterministic tests.
    ///
    /// A key without state is admitted outright with
    /// `remaining = max_requests - 1`. The one exception is a zero-quota
    /// policy (`max_requests == 0`), which denies every request including the
    /// first and creates no state.
    pub fn check_at(&self, key: &str, now_ms: u64) -> Decision {
        let mut keys = self.keys.lock();
        self.check_locked(&mut keys, key, now_ms)
    }

    fn check_locked(
        &self,
        keys: &mut HashMap<String, VecDeque<TimeBucket>>,
        key: &str,
        now_ms: u64,
    ) -> Decision {
        let cutoff = self.expiry_cutoff(now_ms);
        let second = now_ms / 1000;

        let Some(buckets) = keys.get_mut(key) else {
            if self.policy.max_requests == 0 {
                return Decision::deny();
            }
            keys.insert(
                key.to_string(),
                VecDeque::from([TimeBucket { second, count: 1 }]),
            );
            return Decision::admit(self.policy.max_requests - 1);
        };

        drop_expired(buckets, cutoff);

        let total: u32 = buckets.iter().map(|bucket| bucket.count).sum();
        if total >= self.policy.max_requests {
            // The pruning above stays; the denied request is not recorded.
            return Decision::deny();
        }

        match buckets.back_mut() {
            Some(last) if last.second == second => last.count += 1,
            _ => buckets.push_back(TimeBucket { second, count: 1 }),
        }

        Decision::admit(self.policy.max_requests - total - 1)
    }

    /// Sweep every key: expire stale buckets and drop keys left empty.
    /// Returns the number of keys evicted.
    ///
    /// Checks never depend on the sweep for correctness; it exists to bound
    /// memory for keys that went quiet.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(self.now_ms())
    }

    pub fn cleanup_at(&self, now_ms: u64) -> usize {
        let cutoff = self.expiry_cutoff(now_ms);
        let mut keys = self.keys.lock();
        let before = keys.len();
        keys.retain(|_, buckets| {
            drop_expired(buckets, cutoff);
            !buckets.is_empty()
        });
        before - keys.len()
    }

    /// Forget `key` entirely, regardless of current usage. Unknown keys are a
    /// silent no-op.
    pub fn reset(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    /// Number of keys currently holding state.
    pub fn tracked_keys(&self) -> usize {
        self.keys.lock().len()
    }

    /// Spawn the background sweep task. A second call while the task is
    /// running does nothing; without a tokio runtime a warning is logged and
    /// the controller runs without a reaper.
    pub fn start_reaper(self: &Arc<Self>, every: Duration) {
        let mut slot = self.reaper.lock();
        if slot.is_some() {
            return;
        }
        *slot = reaper::spawn(self, every);
    }

    /// Cancel the reaper task. Idempotent. The key store is left intact;
    /// callers that want immediate reclamation run [`cleanup`](Self::cleanup)
    /// themselves.
    pub fn destroy(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
    }

    /// Seconds-granularity expiry cutoff: a bucket survives only if its
    /// second is strictly greater. `None` while the clock is younger than the
    /// window, in which case nothing can have expired yet.
    fn expiry_cutoff(&self, now_ms: u64) -> Option<u64> {
        now_ms
            .checked_sub(self.policy.window_ms())
            .map(|window_start| window_start / 1000)
    }

    #[cfg(test)]
    fn buckets(&self, key: &str) -> Vec<(u64, u32)> {
        self.keys
            .lock()
            .get(key)
            .map(|buckets| buckets.iter().map(|b| (b.second, b.count)).collect())
            .unwrap_or_default()
    }
}

impl Drop for SlidingWindowLimiter {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn drop_expired(buckets: &mut VecDeque<TimeBucket>, cutoff: Option<u64>) {
    let Some(cutoff) = cutoff else { return };
    while let Some(front) = buckets.front() {
        if front.second <= cutoff {
            buckets.pop_front();
        } else {
            break;
        }
    }
}
