//! Token-bucket rate limiting, keyed by client IP for HTTP and by user for
//! socket sends.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::Mutex;
use tracing::warn;

/// Sustained rate and burst size shared by every bucket of a limiter.
#[derive(Debug, Clone, Copy)]
struct Quota {
    per_sec: f64,
    burst: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    touched: Instant,
}

impl Bucket {
    fn full(quota: Quota, now: Instant) -> Self {
        Self {
            tokens: quota.burst,
            touched: now,
        }
    }

    fn take(&mut self, quota: Quota, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.touched).as_secs_f64();
        self.tokens = (self.tokens + idle * quota.per_sec).min(quota.burst);
        self.touched = now;

        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }
        allowed
    }
}

#[derive(Clone)]
pub struct RateLimiter<K> {
    quota: Quota,
    buckets: Arc<Mutex<HashMap<K, Bucket>>>,
}

impl<K: Eq + Hash> RateLimiter<K> {
    pub fn new(per_sec: f64, burst: f64) -> Self {
        Self {
            quota: Quota { per_sec, burst },
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spend one token for `key`. `false` means the caller is over quota.
    pub async fn check(&self, key: K) -> bool {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: K, now: Instant) -> bool {
        let quota = self.quota;
        self.buckets
            .lock()
            .await
            .entry(key)
            .or_insert_with(|| Bucket::full(quota, now))
            .take(quota, now)
    }

    /// Forget keys that have not been seen for `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, bucket| now.saturating_duration_since(bucket.touched) < max_idle);
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter<IpAddr>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(ip = %ip, path = %req.uri().path(), "Rate limit exceeded");
            let body = serde_json::json!({ "error": "Too many requests" });
            return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        }
    }

    next.run(req).await
}

/// Peer address when the server exposes it, else the first proxy header
/// that parses (`x-forwarded-for`, then `x-real-ip`).
fn client_ip<B>(req: &axum::http::Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }

    ["x-forwarded-for", "x-real-ip"].into_iter().find_map(|name| {
        req.headers()
            .get(name)?
            .to_str()
            .ok()?
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alumni_shared::types::UserId;

    #[tokio::test]
    async fn burst_then_reject() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_at(ip, now).await);
        }
        assert!(!limiter.check_at(ip, now).await);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(2.0, 2.0);
        let user = UserId::new();
        let start = Instant::now();

        assert!(limiter.check_at(user, start).await);
        assert!(limiter.check_at(user, start).await);
        assert!(!limiter.check_at(user, start).await);

        // Half a second at 2/s buys exactly one more send.
        let later = start + Duration::from_millis(500);
        assert!(limiter.check_at(user, later).await);
        assert!(!limiter.check_at(user, later).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(0.001, 1.0);
        let (alice, bob) = (UserId::new(), UserId::new());

        assert!(limiter.check(alice).await);
        assert!(!limiter.check(alice).await);
        assert!(limiter.check(bob).await);
    }

    #[tokio::test]
    async fn purge_drops_idle_keys() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(limiter.check(ip).await);

        limiter.purge_stale(Duration::from_secs(600)).await;
        assert_eq!(limiter.buckets.lock().await.len(), 1);

        limiter.purge_stale(Duration::ZERO).await;
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn proxy_headers_are_a_fallback() {
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), "203.0.113.7".parse().ok());

        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "garbage")
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), "198.51.100.2".parse().ok());

        let req = axum::http::Request::builder().body(()).unwrap();
        assert_eq!(client_ip(&req), None);
    }
}
