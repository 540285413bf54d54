//! Sliding-window request admission control for axum services.
//!
//! Three scoped controllers (general, write, strict) count admitted requests
//! in per-second buckets over a trailing window, keyed by client identity.
//! The middleware layer answers over-quota traffic with `429 Too Many
//! Requests` plus the usual rate-limit headers.

pub mod config;
pub mod middleware;
pub mod policies;
pub mod rate_limit;
pub mod reaper;
pub mod state;

pub use config::{ConfigError, Settings};
pub use policies::{default_policy, PolicyKind};
pub use rate_limit::{Decision, RateLimitPolicy, SlidingWindowLimiter};
pub use state::RateLimiters;
