use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    NotUntil, Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Rate limiter keyed by an arbitrary string (account email, token subject)
pub type KeyedRateLimiter = Arc<RateLimiter<String, DashMapStateStore<String>, DefaultClock>>;

/// `attempts` per `window_seconds`, with the whole budget available as a burst.
fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let attempts = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis((window_seconds * 1000) / attempts.get() as u64);
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(attempts))
        .allow_burst(attempts)
}

pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

pub fn create_keyed_rate_limiter(attempts: u32, window_seconds: u64) -> KeyedRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

fn too_many(message: &str, negative: NotUntil<governor::clock::QuantaInstant>) -> AppError {
    let wait_time = negative.wait_time_from(DefaultClock::default().now());
    AppError::TooManyRequests(message.to_string(), Some(wait_time.as_secs().max(1)))
}

/// Consumes one unit for `key`, failing with 429 once the quota is spent.
pub fn check_keyed(limiter: &KeyedRateLimiter, key: &str) -> Result<(), AppError> {
    limiter
        .check_key(&key.to_lowercase())
        .map_err(|negative| too_many("Too many attempts. Please try again later.", negative))
}

/// Best-effort client address: first `x-forwarded-for` hop, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match client_ip(request.headers(), peer) {
        Some(ip) => match limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => Err(too_many(
                "Too many requests from this IP. Please try again later.",
                negative,
            )),
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_limiter_blocks_after_budget() {
        let limiter = create_keyed_rate_limiter(2, 60);
        assert!(check_keyed(&limiter, "a@example.com").is_ok());
        assert!(check_keyed(&limiter, "A@example.com").is_ok());
        assert!(matches!(
            check_keyed(&limiter, "a@example.com"),
            Err(AppError::TooManyRequests(_, Some(_)))
        ));
        // Other keys have their own budget
        assert!(check_keyed(&limiter, "b@example.com").is_ok());
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let peer = Some(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(
            client_ip(&headers, peer),
            Some("203.0.113.7".parse().unwrap())
        );
        assert_eq!(
            client_ip(&HeaderMap::new(), peer),
            Some("127.0.0.1".parse().unwrap())
        );
    }

    #[test]
    fn zero_attempts_still_builds_a_quota() {
        let limiter = create_ip_rate_limiter(0, 0);
        assert!(limiter.check_key(&"198.51.100.1".parse().unwrap()).is_ok());
    }
}
