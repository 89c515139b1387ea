//! TEAIM Ingress Middleware
//!
//! This crate provides the request-side plumbing shared by TEAIM API routes:
//! - Fixed-window rate limiting for write endpoints
//! - Request id propagation
//! - Body size and malformed JSON handling with machine-readable error codes

pub mod json;
pub mod middleware;
pub mod rate_limit;
pub mod types;

pub use json::JsonBody;
pub use middleware::{body_limit_middleware, request_id_middleware};
pub use rate_limit::{
    Decision, KeyFn, RateLimitConfig, RateLimiter, SweeperHandle, client_identity, default_key,
    normalize_route, rate_limit_middleware,
};
pub use types::IngressError;
