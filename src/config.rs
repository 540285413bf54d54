use std::{env, time::Duration};

use anyhow::Context;
use thiserror::Error;

use crate::{
    policies::{self, PolicyKind},
    rate_limit::RateLimitPolicy,
    reaper,
};

/// Admission-control settings, one policy per scope plus the shared knobs.
#[derive(Clone, Debug)]
pub struct Settings {
    pub trust_proxy: bool,
    pub general: RateLimitPolicy,
    pub write: RateLimitPolicy,
    pub strict: RateLimitPolicy,
    pub reaper_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a whole number of milliseconds: {value:?}")]
    InvalidMillis { name: &'static str, value: String },
    #[error("{name} is not a whole number of requests: {value:?}")]
    InvalidCount { name: &'static str, value: String },
    #[error("{name} must be greater than zero")]
    ZeroInterval { name: &'static str },
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
            .context("invalid rate limiter configuration")
    }

    /// [`from_env`](Self::from_env) with the environment abstracted away, so
    /// tests can supply variables without touching the process environment.
    ///
    /// Unset or blank variables fall back to the defaults; variables that are
    /// present but unparseable are an error rather than a silent fallback.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let trust_proxy = match lookup("TRUST_PROXY") {
            Some(value) => {
                let normalized = value.trim().to_lowercase();
                !matches!(normalized.as_str(), "false" | "0" | "off" | "no")
            }
            None => true,
        };

        let general = policy_from(
            &lookup,
            PolicyKind::General,
            "RATE_LIMIT_GENERAL_WINDOW_MS",
            "RATE_LIMIT_GENERAL_MAX",
        )?;
        let write = policy_from(
            &lookup,
            PolicyKind::Write,
            "RATE_LIMIT_WRITE_WINDOW_MS",
            "RATE_LIMIT_WRITE_MAX",
        )?;
        let strict = policy_from(
            &lookup,
            PolicyKind::Strict,
            "RATE_LIMIT_STRICT_WINDOW_MS",
            "RATE_LIMIT_STRICT_MAX",
        )?;

        let reaper_interval = match parse_millis(&lookup, "RATE_LIMIT_REAPER_INTERVAL_MS")? {
            Some(ms) if ms == 0 => {
                return Err(ConfigError::ZeroInterval {
                    name: "RATE_LIMIT_REAPER_INTERVAL_MS",
                })
            }
            Some(ms) => Duration::from_millis(ms),
            None => reaper::DEFAULT_REAPER_INTERVAL,
        };

        Ok(Self {
            trust_proxy,
            general,
            write,
            strict,
            reaper_interval,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trust_proxy: true,
            general: policies::default_policy(PolicyKind::General),
            write: policies::default_policy(PolicyKind::Write),
            strict: policies::default_policy(PolicyKind::Strict),
            reaper_interval: reaper::DEFAULT_REAPER_INTERVAL,
        }
    }
}

fn policy_from(
    lookup: &impl Fn(&str) -> Option<String>,
    kind: PolicyKind,
    window_name: &'static str,
    max_name: &'static str,
) -> Result<RateLimitPolicy, ConfigError> {
    let defaults = policies::default_policy(kind);
    let window = match parse_millis(lookup, window_name)? {
        Some(ms) => Duration::from_millis(ms),
        None => defaults.window,
    };
    let max_requests = parse_count(lookup, max_name)?.unwrap_or(defaults.max_requests);
    Ok(RateLimitPolicy::new(window, max_requests))
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidMillis { name, value: raw })
}

fn parse_count(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u32>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidCount { name, value: raw })
}
