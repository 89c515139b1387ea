//! TEAIM Egress
//!
//! This crate provides the outbound side of TEAIM clients:
//! - A guarded fetch that retries idempotent calls and classifies failures
//! - Injected notification and unauthorized-handling seams
//! - A backoff-aware poller for live-updating views

pub mod client;
pub mod error;
pub mod fetch_guard;
pub mod notify;
pub mod poller;

pub use client::{HttpClientConfig, create_client};
pub use error::{FetchError, Result};
pub use fetch_guard::{FetchGuard, GuardedBody, RetryPolicy};
pub use notify::{
    LoggingUnauthorizedHandler, Notification, NotificationLevel, Notifier, TracingNotifier,
    UnauthorizedHandler,
};
pub use poller::{Backoff, PollSchedule, PollState, PollerConfig, PollerHandle, SmartPoller};
