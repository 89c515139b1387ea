//! TEAIM Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Structured logging setup
//! - Health endpoints

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{DrainFlag, HealthState, health_router};
pub use logging::{LoggingError, build_filter, init_logging, parse_level};
pub use metrics::Metrics;
