//! Injected collaborators for user-facing failure reporting
//!
//! The fetch guard never owns a global sink. Callers hand it a [`Notifier`]
//! for user-visible messages and an [`UnauthorizedHandler`] for the sign-in
//! redirect.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A user-visible message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }

    /// Attach the request id, when there is one
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.request_id {
            Some(id) => write!(f, "{} (request id: {})", self.message, id),
            None => f.write_str(&self.message),
        }
    }
}

/// Sink for user-visible messages
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl<F> Notifier for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn notify(&self, notification: Notification) {
        self(notification)
    }
}

/// Publish notifications on a channel; a closed receiver drops them
impl Notifier for UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        let _ = self.send(notification);
    }
}

/// Notifier that writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let request_id = notification.request_id.as_deref().unwrap_or("-");
        match notification.level {
            NotificationLevel::Info => info!(request_id, "{}", notification.message),
            NotificationLevel::Warning => warn!(request_id, "{}", notification.message),
            NotificationLevel::Error => error!(request_id, "{}", notification.message),
        }
    }
}

/// Side effect run on 401/403, given the path and query to return to after
/// signing in
pub trait UnauthorizedHandler: Send + Sync {
    fn on_unauthorized(&self, return_to: &str);
}

impl<F> UnauthorizedHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_unauthorized(&self, return_to: &str) {
        self(return_to)
    }
}

/// Handler that only logs; for headless callers with nowhere to redirect
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingUnauthorizedHandler;

impl UnauthorizedHandler for LoggingUnauthorizedHandler {
    fn on_unauthorized(&self, return_to: &str) {
        warn!(return_to, "Sign-in required");
    }
}
