//! Fixed-window rate limiting for write endpoints
//!
//! Each `(client, normalised route)` key owns a bucket holding a request count
//! and the instant its window opened. A request that pushes the count past
//! `max` is rejected with `429` until the window elapses.
//!
//! Buckets live in a [`DashMap`] capped at `max_buckets`. When a new key would
//! exceed the cap, stale windows are swept first and, failing that, the bucket
//! with the oldest window is evicted. State is per process: N instances each
//! enforce their own limit.

use crate::types::IngressError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use teaim_observability::Metrics;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Derives the bucket key for a request
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Length of one counting window
    pub window: Duration,

    /// Requests allowed per window
    pub max: u32,

    /// Methods that are counted; everything else passes straight through
    pub methods: Vec<Method>,

    /// Upper bound on tracked keys
    pub max_buckets: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(60_000),
            max: 120,
            methods: vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE],
            max_buckets: 10_000,
        }
    }
}

/// The decision returned for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward the request
    Allowed { remaining: u32 },

    /// Reject until the window resets
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Fixed-window, per-key request counter
pub struct RateLimiter {
    config: RateLimitConfig,
    key_fn: KeyFn,
    buckets: DashMap<String, Bucket>,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
    /// Create a limiter keyed by client identity and normalised route
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            key_fn: Arc::new(default_key),
            buckets: DashMap::new(),
            metrics: None,
        }
    }

    /// Replace the key function
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Count rejections in Prometheus
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether requests with this method are counted
    pub fn applies_to(&self, method: &Method) -> bool {
        self.config.methods.contains(method)
    }

    /// Bucket key for a request
    pub fn key_for(&self, req: &Request) -> String {
        (self.key_fn)(req)
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Count one request against `key`
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Count one request against `key` at `now`
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        if !self.buckets.contains_key(key) && self.buckets.len() >= self.config.max_buckets {
            self.make_room(now);
        }

        let mut entry = self.buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });
        let bucket = entry.value_mut();

        if now.saturating_duration_since(bucket.window_start) > self.config.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        // Saturate at max + 1; rejected requests do not keep counting
        if bucket.count <= self.config.max {
            bucket.count += 1;
        }

        if bucket.count > self.config.max {
            let elapsed = now.saturating_duration_since(bucket.window_start);
            Decision::Limited {
                retry_after: self.config.window.saturating_sub(elapsed),
            }
        } else {
            Decision::Allowed {
                remaining: self.config.max - bucket.count,
            }
        }
    }

    /// Drop buckets whose window has elapsed, returning how many were removed
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let window = self.config.window;
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) <= window);
        before.saturating_sub(self.buckets.len())
    }

    fn make_room(&self, now: Instant) {
        let swept = self.sweep(now);
        if swept > 0 {
            debug!(swept, "Swept stale rate-limit buckets");
        }

        while self.buckets.len() >= self.config.max_buckets {
            let oldest = self
                .buckets
                .iter()
                .min_by_key(|entry| entry.value().window_start)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    debug!(key = %key, "Evicting oldest rate-limit bucket");
                    self.buckets.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Spawn a background task that sweeps stale buckets every `interval`
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
        let limiter = Arc::clone(self);

        tokio::spawn(async move {
            info!("Starting rate-limit sweeper (interval: {:?})", interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Rate-limit sweeper shutting down");
                        break;
                    }
                    _ = sleep(interval) => {
                        let removed = limiter.sweep(Instant::now());
                        if removed > 0 {
                            debug!(removed, remaining = limiter.len(), "Rate-limit sweep cycle");
                        }
                    }
                }
            }
        });

        SweeperHandle { shutdown_tx }
    }
}

/// Handle for the background sweeper task
pub struct SweeperHandle {
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Replace all-digit path segments with `:id` so `/items/1` and `/items/2`
/// share a bucket
pub fn normalize_route(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Client identity: first `x-forwarded-for` hop, then the socket address
pub fn client_identity(req: &Request) -> String {
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded_for.to_str()
    {
        let first = value.split(',').next().unwrap_or(value).trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Default key: client identity plus normalised route
pub fn default_key(req: &Request) -> String {
    format!(
        "{}|{}",
        client_identity(req),
        normalize_route(req.uri().path())
    )
}

/// Whole seconds until the window resets, never less than one
fn retry_after_secs(retry_after: Duration) -> u64 {
    let millis = retry_after.as_millis() as u64;
    millis.div_ceil(1000).max(1)
}

/// Middleware enforcing the limiter on matching methods
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if !limiter.applies_to(req.method()) {
        return next.run(req).await;
    }

    let key = limiter.key_for(&req);
    match limiter.check(&key) {
        Decision::Allowed { remaining } => {
            debug!(key = %key, remaining, "Rate limit check passed");
            next.run(req).await
        }
        Decision::Limited { retry_after } => {
            let retry_after_secs = retry_after_secs(retry_after);
            let route = normalize_route(req.uri().path());
            warn!(
                key = %key,
                route = %route,
                retry_after_secs,
                "Rate limit exceeded"
            );
            if let Some(metrics) = &limiter.metrics {
                metrics.record_rate_limited(&route);
            }
            IngressError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
        middleware,
        routing::{get, post},
    };
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    fn app(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/api/items", post(test_handler).get(test_handler))
            .route("/api/items/{id}", post(test_handler))
            .layer(middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            ))
    }

    fn post_request(uri: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn small_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(1000),
            max: 2,
            ..Default::default()
        }))
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.max, 120);
        assert_eq!(
            config.methods,
            vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE]
        );
    }

    #[test]
    fn test_normalize_route() {
        assert_eq!(normalize_route("/items/123"), "/items/:id");
        assert_eq!(normalize_route("/items/456/risks/7"), "/items/:id/risks/:id");
        assert_eq!(normalize_route("/items/v2"), "/items/v2");
        assert_eq!(normalize_route("/"), "/");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_sequence() {
        let limiter = small_limiter();
        let app = app(limiter);

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(post_request("/api/items", "10.0.0.1"))
                .await
                .unwrap();
            statuses.push(response.status());
        }
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );

        tokio::time::advance(Duration::from_millis(1100)).await;

        let response = app
            .oneshot(post_request("/api/items", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_headers_and_body() {
        let app = app(small_limiter());

        for _ in 0..2 {
            app.clone()
                .oneshot(post_request("/api/items", "10.0.0.1"))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_millis(300)).await;

        let response = app
            .oneshot(post_request("/api/items", "10.0.0.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");

        use http_body_util::BodyExt;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"error": "rate_limited", "retryAfter": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_is_not_counted() {
        let limiter = small_limiter();
        let app = app(limiter.clone());

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/api/items")
                        .header("x-forwarded-for", "10.0.0.1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert!(limiter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_numeric_segments_share_bucket() {
        let app = app(small_limiter());

        let statuses = [
            app.clone().oneshot(post_request("/api/items/1", "10.0.0.1")).await.unwrap().status(),
            app.clone().oneshot(post_request("/api/items/2", "10.0.0.1")).await.unwrap().status(),
            app.clone().oneshot(post_request("/api/items/3", "10.0.0.1")).await.unwrap().status(),
        ];

        assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_have_separate_buckets() {
        let app = app(small_limiter());

        for _ in 0..2 {
            app.clone()
                .oneshot(post_request("/api/items", "10.0.0.1"))
                .await
                .unwrap();
        }

        let response = app
            .oneshot(post_request("/api/items", "10.0.0.2, 172.16.0.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_saturates() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(1000),
            max: 1,
            ..Default::default()
        });

        assert!(limiter.check("k").is_allowed());
        for _ in 0..10 {
            assert!(!limiter.check("k").is_allowed());
        }
        assert_eq!(limiter.buckets.get("k").unwrap().count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max: 3,
            ..Default::default()
        });

        assert_eq!(limiter.check("k"), Decision::Allowed { remaining: 2 });
        assert_eq!(limiter.check("k"), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check("k"), Decision::Allowed { remaining: 0 });
        assert!(matches!(limiter.check("k"), Decision::Limited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_stale() {
        let limiter = small_limiter();
        limiter.check("a");
        limiter.check("b");

        tokio::time::advance(Duration::from_millis(1500)).await;
        limiter.check("c");

        assert_eq!(limiter.sweep(Instant::now()), 2);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            max: 5,
            max_buckets: 2,
            ..Default::default()
        });

        limiter.check("first");
        tokio::time::advance(Duration::from_millis(10)).await;
        limiter.check("second");
        tokio::time::advance(Duration::from_millis(10)).await;
        limiter.check("third");

        assert_eq!(limiter.len(), 2);
        assert!(!limiter.buckets.contains_key("first"));
        assert!(limiter.buckets.contains_key("third"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task() {
        let limiter = small_limiter();
        limiter.check("a");

        let handle = limiter.spawn_sweeper(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(limiter.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_custom_key_fn() {
        let limiter = Arc::new(
            RateLimiter::new(RateLimitConfig {
                max: 1,
                ..Default::default()
            })
            .with_key_fn(|_req| "everyone".to_string()),
        );
        let app = app(limiter);

        let first = app
            .clone()
            .oneshot(post_request("/api/items", "10.0.0.1"))
            .await
            .unwrap();
        let second = app
            .oneshot(post_request("/api/items", "10.0.0.2"))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_default_key_without_client_info() {
        let req = Request::builder()
            .method("POST")
            .uri("/api/items/42")
            .body(Body::empty())
            .unwrap();

        assert_eq!(default_key(&req), "unknown|/api/items/:id");
    }

    #[test]
    fn test_default_key_prefers_forwarded_for() {
        let mut req = post_request("/api/items", " 203.0.113.1 , 198.51.100.1");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        assert_eq!(default_key(&req), "203.0.113.1|/api/items");
    }

    #[test]
    fn test_default_key_uses_socket() {
        let mut req = Request::builder()
            .method("POST")
            .uri("/api/items")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 9], 4000))));

        assert_eq!(default_key(&req), "192.168.1.9|/api/items");
    }
}
