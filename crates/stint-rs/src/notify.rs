//! Threshold-crossing notifications and the sinks that deliver them.
//!
//! Monitors only *produce* [`Notification`] values; delivery transport is
//! the caller's concern. `deliver` is synchronous and non-blocking — a sink
//! that needs to do slow work (desktop notification, network hop) should
//! enqueue and return, which is exactly what [`BroadcastSink`] does.
//!
//! # Choosing a sink
//!
//! | Sink | Use case |
//! |------|----------|
//! | [`NoopSink`] | Tests or polling-only callers |
//! | [`LoggingSink`] | Structured logging via `tracing` |
//! | [`FnSink`] | Quick closures (CLI printing, counters) |
//! | [`CompositeSink`] | Compose multiple sinks in order |
//! | [`BroadcastSink`] | Fan out to async consumers (dashboard bridge) |

use crate::policy::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

// ── Notification ───────────────────────────────────────────────────

/// Which budget produced a notification.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSource {
    Quota,
    Context,
}

impl std::fmt::Display for NotificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationSource::Quota => write!(f, "quota"),
            NotificationSource::Context => write!(f, "context"),
        }
    }
}

/// A threshold-crossing event.
///
/// Carries both the structured fields and a human-readable `message`, since
/// the primary consumer is an operator deciding whether to keep working.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Notification {
    pub source: NotificationSource,
    pub severity: Severity,
    /// Usage as a percentage of capacity; may exceed 100.
    pub percent: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ── Sinks ──────────────────────────────────────────────────────────

/// Receiver for threshold-crossing events.
pub trait NotificationSink {
    fn deliver(&self, notification: &Notification);
}

/// Discards all notifications.
#[derive(Debug, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn deliver(&self, _notification: &Notification) {}
}

/// Logs notifications through `tracing`, escalating the log level with the
/// severity.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl NotificationSink for LoggingSink {
    fn deliver(&self, n: &Notification) {
        if n.severity >= Severity::Danger {
            warn!(source = %n.source, severity = %n.severity, "{}", n.message);
        } else {
            info!(source = %n.source, severity = %n.severity, "{}", n.message);
        }
    }
}

/// Wraps a closure as a sink.
pub struct FnSink<F: Fn(&Notification)> {
    f: F,
}

impl<F: Fn(&Notification)> FnSink<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: Fn(&Notification)> NotificationSink for FnSink<F> {
    fn deliver(&self, notification: &Notification) {
        (self.f)(notification);
    }
}

/// Delivers to multiple sinks in registration order.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl NotificationSink for CompositeSink {
    fn deliver(&self, notification: &Notification) {
        for sink in &self.sinks {
            sink.deliver(notification);
        }
    }
}

/// Forwards notifications onto a `tokio::sync::broadcast` channel so async
/// consumers (a WebSocket bridge, a dashboard feed) can subscribe.
///
/// Send errors are silently ignored — no subscribers is fine.
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(sender: broadcast::Sender<Notification>) -> Self {
        Self { sender }
    }
}

impl NotificationSink for BroadcastSink {
    fn deliver(&self, notification: &Notification) {
        let _ = self.sender.send(notification.clone());
    }
}
