use std::{sync::Arc, time::Duration};

use crate::{
    config::Settings,
    policies::PolicyKind,
    rate_limit::{RateLimitPolicy, SlidingWindowLimiter},
};

/// The three scoped admission controllers shared across a router, plus the
/// proxy-trust flag the middleware needs to pick a client key.
#[derive(Clone)]
pub struct RateLimiters {
    pub trust_proxy: bool,
    pub general: Arc<SlidingWindowLimiter>,
    pub write: Arc<SlidingWindowLimiter>,
    pub strict: Arc<SlidingWindowLimiter>,
}

impl RateLimiters {
    /// Builds one controller per scope and starts a reaper for each.
    pub fn new(settings: &Settings) -> Self {
        Self {
            trust_proxy: settings.trust_proxy,
            general: started(settings.general, settings.reaper_interval),
            write: started(settings.write, settings.reaper_interval),
            strict: started(settings.strict, settings.reaper_interval),
        }
    }

    pub fn limiter(&self, kind: PolicyKind) -> &Arc<SlidingWindowLimiter> {
        match kind {
            PolicyKind::General => &self.general,
            PolicyKind::Write => &self.write,
            PolicyKind::Strict => &self.strict,
        }
    }

    /// Stops all three reapers. The controllers themselves stay usable; only
    /// the background sweeps end.
    pub fn shutdown(&self) {
        self.general.destroy();
        self.write.destroy();
        self.strict.destroy();
    }
}

fn started(policy: RateLimitPolicy, reaper_interval: Duration) -> Arc<SlidingWindowLimiter> {
    let limiter = Arc::new(SlidingWindowLimiter::new(policy));
    limiter.start_reaper(reaper_interval);
    limiter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiters_are_built_from_the_settings() {
        let settings = Settings::default();
        let limiters = RateLimiters::new(&settings);
        assert_eq!(limiters.limiter(PolicyKind::General).policy(), settings.general);
        assert_eq!(limiters.limiter(PolicyKind::Write).policy(), settings.write);
        assert_eq!(limiters.limiter(PolicyKind::Strict).policy(), settings.strict);
    }

    #[test]
    fn clones_share_the_underlying_controllers() {
        let limiters = RateLimiters::new(&Settings::default());
        let cloned = limiters.clone();

        cloned.general.check("10.0.0.1");
        assert_eq!(limiters.general.tracked_keys(), 1);
        assert_eq!(limiters.write.tracked_keys(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_and_keeps_state() {
        let limiters = RateLimiters::new(&Settings::default());
        limiters.strict.check("10.0.0.1");
        limiters.shutdown();
        limiters.shutdown();
        assert_eq!(limiters.strict.tracked_keys(), 1);
        assert!(limiters.strict.check("10.0.0.1").allowed);
    }
}
