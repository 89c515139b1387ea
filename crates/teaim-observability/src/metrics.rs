//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for TEAIM:
//! - HTTP request counts by method and status
//! - Rate-limit rejections by normalised route
//! - Redaction calls by mode, and PII matches by category

use prometheus::{CounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for TEAIM
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Requests served, by method and status code
    pub http_requests_total: CounterVec,

    /// Requests rejected by the rate limiter
    pub rate_limited_total: CounterVec,

    /// Redaction calls, by mode
    pub redactions_total: CounterVec,

    /// PII matches rewritten, by category
    pub pii_matches_total: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("teaim_http_requests_total", "Total number of HTTP requests"),
            &["method", "status"],
        )?;

        let rate_limited_total = CounterVec::new(
            Opts::new(
                "teaim_rate_limited_total",
                "Total number of requests rejected by the rate limiter",
            ),
            &["route"],
        )?;

        let redactions_total = CounterVec::new(
            Opts::new("teaim_redactions_total", "Total number of redaction calls"),
            &["mode"],
        )?;

        let pii_matches_total = CounterVec::new(
            Opts::new(
                "teaim_pii_matches_total",
                "Total number of PII matches rewritten",
            ),
            &["category"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(redactions_total.clone()))?;
        registry.register(Box::new(pii_matches_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            http_requests_total,
            rate_limited_total,
            redactions_total,
            pii_matches_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a served request
    pub fn record_http_request(&self, method: &str, status: u16) {
        self.http_requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    /// Record a rate-limit rejection
    pub fn record_rate_limited(&self, route: &str) {
        self.rate_limited_total.with_label_values(&[route]).inc();
    }

    /// Record one redaction call and the matches it rewrote
    pub fn record_redaction<'a, I>(&self, mode: &str, matches: I)
    where
        I: IntoIterator<Item = (&'a str, usize)>,
    {
        self.redactions_total.with_label_values(&[mode]).inc();
        for (category, count) in matches {
            self.pii_matches_total
                .with_label_values(&[category])
                .inc_by(count as f64);
        }
    }
}
