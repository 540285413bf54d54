use std::{net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{policies::PolicyKind, state::RateLimiters};

#[derive(Debug, Serialize)]
struct RateLimitedBody {
    error: String,
    scope: PolicyKind,
    #[serde(rename = "retryAfterSecs")]
    retry_after_secs: u64,
}

pub async fn general_rate_limit(
    State(limiters): State<RateLimiters>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(limiters, PolicyKind::General, request, next).await
}

pub async fn write_rate_limit(
    State(limiters): State<RateLimiters>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(limiters, PolicyKind::Write, request, next).await
}

pub async fn strict_rate_limit(
    State(limiters): State<RateLimiters>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(limiters, PolicyKind::Strict, request, next).await
}

async fn enforce(
    limiters: RateLimiters,
    kind: PolicyKind,
    request: Request<Body>,
    next: Next,
) -> Response {
    let socket_addr = request
        .extensions()
        .get::<SocketAddr>()
        .copied()
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|value| value.0)
        });
    let key = client_identity(request.headers(), socket_addr, limiters.trust_proxy);

    let limiter = limiters.limiter(kind);
    let policy = limiter.policy();
    let decision = limiter.check(&key);

    if !decision.allowed {
        tracing::warn!(scope = kind.as_str(), key = %key, "rate limit exceeded");

        let retry_after_secs = window_secs_ceil(policy.window);
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RateLimitedBody {
                error: format!(
                    "Too many requests from this IP, please try again after {}",
                    describe_window(policy.window)
                ),
                scope: kind,
                retry_after_secs,
            }),
        )
            .into_response();

        let headers = response.headers_mut();
        headers.insert("retry-after", HeaderValue::from(retry_after_secs));
        headers.insert("x-ratelimit-limit", HeaderValue::from(policy.max_requests));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(policy.max_requests));
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from(decision.remaining),
    );
    response
}

fn client_identity(
    headers: &HeaderMap,
    socket_addr: Option<SocketAddr>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        if let Some(value) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first) = value.split(',').next() {
                let candidate = first.trim();
                if !candidate.is_empty() {
                    return candidate.to_string();
                }
            }
        }

        if let Some(value) = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
        {
            let candidate = value.trim();
            if !candidate.is_empty() {
                return candidate.to_string();
            }
        }
    }

    socket_addr
        .map(|address| address.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn window_secs_ceil(window: Duration) -> u64 {
    let ms: u64 = window.as_millis().try_into().unwrap_or(u64::MAX);
    ms.div_ceil(1000)
}

fn describe_window(window: Duration) -> String {
    let secs = window_secs_ceil(window);
    if secs >= 60 && secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else if secs == 1 {
        "1 second".to_string()
    } else {
        format!("{secs} seconds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn socket() -> Option<SocketAddr> {
        Some("192.0.2.7:4821".parse().unwrap())
    }

    #[test]
    fn forwarded_for_first_entry_wins_when_proxies_are_trusted() {
        let headers = header_map(&[("x-forwarded-for", "203.0.113.9, 70.41.3.18")]);
        assert_eq!(client_identity(&headers, socket(), true), "203.0.113.9");
    }

    #[test]
    fn real_ip_is_used_when_forwarded_for_is_missing_or_blank() {
        let headers = header_map(&[("x-real-ip", " 198.51.100.4 ")]);
        assert_eq!(client_identity(&headers, socket(), true), "198.51.100.4");

        let headers = header_map(&[
            ("x-forwarded-for", " , 70.41.3.18"),
            ("x-real-ip", "198.51.100.4"),
        ]);
        assert_eq!(client_identity(&headers, socket(), true), "198.51.100.4");
    }

    #[test]
    fn proxy_headers_are_ignored_when_untrusted() {
        let headers = header_map(&[
            ("x-forwarded-for", "203.0.113.9"),
            ("x-real-ip", "198.51.100.4"),
        ]);
        assert_eq!(client_identity(&headers, socket(), false), "192.0.2.7");
    }

    #[test]
    fn missing_socket_falls_back_to_unknown() {
        assert_eq!(client_identity(&HeaderMap::new(), None, true), "unknown");
    }

    #[test]
    fn window_description_prefers_whole_minutes() {
        assert_eq!(describe_window(Duration::from_secs(15 * 60)), "15 minutes");
        assert_eq!(describe_window(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_window(Duration::from_secs(61)), "61 seconds");
        assert_eq!(describe_window(Duration::from_secs(1)), "1 second");
        assert_eq!(describe_window(Duration::from_millis(500)), "1 second");
        assert_eq!(describe_window(Duration::ZERO), "0 seconds");
    }

    #[test]
    fn retry_after_rounds_partial_seconds_up() {
        assert_eq!(window_secs_ceil(Duration::from_millis(1_001)), 2);
        assert_eq!(window_secs_ceil(Duration::from_secs(900)), 900);
        assert_eq!(window_secs_ceil(Duration::ZERO), 0);
    }
}
