use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    runtime::Handle,
    task::AbortHandle,
    time::{self, MissedTickBehavior},
};

use crate::rate_limit::SlidingWindowLimiter;

/// Sweep cadence used by [`SlidingWindowLimiter::start`].
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Spawns the periodic sweep task for `limiter`. Returns `None` when no tokio
/// runtime is available; the limiter stays fully functional, it just never
/// reclaims quiet keys on its own.
pub(crate) fn spawn(limiter: &Arc<SlidingWindowLimiter>, every: Duration) -> Option<AbortHandle> {
    let Ok(handle) = Handle::try_current() else {
        tracing::warn!("no tokio runtime available, rate limiter reaper disabled");
        return None;
    };

    let every = if every.is_zero() {
        tracing::warn!(
            default_secs = DEFAULT_REAPER_INTERVAL.as_secs(),
            "reaper interval of zero requested, using the default"
        );
        DEFAULT_REAPER_INTERVAL
    } else {
        every
    };

    // A weak reference keeps the sweep task from holding an abandoned
    // limiter alive.
    let limiter = Arc::downgrade(limiter);
    let task = handle.spawn(run(limiter, every));
    Some(task.abort_handle())
}

async fn run(limiter: Weak<SlidingWindowLimiter>, every: Duration) {
    let first_tick = time::Instant::now() + every;
    let mut ticks = time::interval_at(first_tick, every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;
        let Some(limiter) = limiter.upgrade() else {
            break;
        };
        let evicted = limiter.cleanup();
        if evicted > 0 {
            tracing::debug!(evicted, "rate limiter reaper evicted expired keys");
        }
    }
}
