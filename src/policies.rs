use std::time::Duration;

use serde::Serialize;

use crate::rate_limit::RateLimitPolicy;

/// The three admission scopes enforced by the middleware layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Read-heavy API traffic.
    General,
    /// Mutating endpoints.
    Write,
    /// Abuse-prone endpoints such as login and token issuance.
    Strict,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::General => "general",
            PolicyKind::Write => "write",
            PolicyKind::Strict => "strict",
        }
    }
}

pub fn default_policy(kind: PolicyKind) -> RateLimitPolicy {
    match kind {
        PolicyKind::General => RateLimitPolicy::new(Duration::from_secs(15 * 60), 100),
        PolicyKind::Write => RateLimitPolicy::new(Duration::from_secs(15 * 60), 20),
        PolicyKind::Strict => RateLimitPolicy::new(Duration::from_secs(60), 10),
    }
}
