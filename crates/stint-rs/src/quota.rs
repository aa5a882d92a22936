//! Rolling-window quota tracking: a fixed token capacity over a sliding
//! time window (5 hours in the reference deployment).
//!
//! Usage "expires" out of the window as time passes, so with no new events
//! the reading is monotonically non-increasing. Severity is recomputed from
//! scratch on every status call — there is no hidden state machine, just
//! the used/capacity ratio against a [`ThresholdTable`]. Notification
//! *dispatch* is edge-triggered, though: a [`Notification`] is latched only
//! when severity strictly increases versus the previous check, so an
//! operator is told once per escalation rather than on every poll. A
//! severity decrease (the window rolling forward) resets the latch
//! silently.
//!
//! The monitor owns the [`UsageLedger`] it reads from; quota is
//! process-wide per user, shared across sessions, which is why the ledger
//! is injectable and persistable rather than scoped to a session.

use crate::ledger::UsageLedger;
use crate::notify::{Notification, NotificationSource};
use crate::policy::{Severity, ThresholdTable};
use crate::TrackerError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

// ── Config ─────────────────────────────────────────────────────────

/// Configuration for a [`QuotaMonitor`].
///
/// Capacity and window are required — the reference deployment uses
/// 200 000 tokens over 5 hours, but nothing here bakes those in.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Token capacity for one full window.
    pub capacity: u64,
    /// Sliding window duration.
    pub window: TimeDelta,
    /// Escalation cutoffs.
    pub thresholds: ThresholdTable,
}

impl QuotaConfig {
    pub fn new(capacity: u64, window: TimeDelta) -> Self {
        Self {
            capacity,
            window,
            thresholds: ThresholdTable::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdTable) -> Self {
        self.thresholds = thresholds;
        self
    }
}

// ── Status ─────────────────────────────────────────────────────────

/// Snapshot of quota usage at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    /// Tokens consumed inside the current window.
    pub used: u64,
    /// Window capacity.
    pub capacity: u64,
    /// `used / capacity * 100`; may exceed 100.
    pub percent: f64,
    pub severity: Severity,
    /// When enough usage will have expired for the window to start moving:
    /// the oldest in-window event plus the window duration. `now` when the
    /// ledger is empty.
    pub reset_at: DateTime<Utc>,
}

impl QuotaStatus {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "quota: {} / {} tokens ({:.0}%, {})",
            self.used, self.capacity, self.percent, self.severity,
        )
    }
}

// ── Monitor ────────────────────────────────────────────────────────

/// Tracks token usage against a rolling window and latches notifications
/// on severity escalation.
#[derive(Debug)]
pub struct QuotaMonitor {
    config: QuotaConfig,
    ledger: UsageLedger,
    last_severity: Severity,
    pending: Option<Notification>,
}

impl QuotaMonitor {
    /// Create a monitor with an empty ledger.
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_ledger(config, UsageLedger::new())
    }

    /// Create a monitor over an existing (e.g. reloaded) ledger.
    pub fn with_ledger(config: QuotaConfig, ledger: UsageLedger) -> Self {
        Self {
            config,
            ledger,
            last_severity: Severity::Fresh,
            pending: None,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Record token-consuming work and re-evaluate status.
    ///
    /// A negative amount is rejected with [`TrackerError::InvalidAmount`];
    /// the monitor is unchanged and keeps working.
    pub fn record_usage(
        &mut self,
        amount: i64,
        category: impl Into<String>,
    ) -> Result<(), TrackerError> {
        self.record_usage_at(amount, category, Utc::now())
    }

    /// [`record_usage`](Self::record_usage) with an explicit timestamp.
    pub fn record_usage_at(
        &mut self,
        amount: i64,
        category: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        self.ledger.record_at(amount, category, now)?;
        // Expired events can never re-enter the window.
        self.ledger.prune(now - self.config.window);
        self.status_at(now);
        Ok(())
    }

    /// Current status, re-evaluated from the ledger.
    pub fn status(&mut self) -> QuotaStatus {
        self.status_at(Utc::now())
    }

    /// Status at an explicit instant. Updates the notification latch.
    pub fn status_at(&mut self, now: DateTime<Utc>) -> QuotaStatus {
        let status = self.compute_status(now);
        self.latch(&status, now);
        status
    }

    /// The notification latched by the most recent escalation, if any.
    ///
    /// Consuming: a second call with no new escalation returns `None`.
    pub fn should_notify(&mut self) -> Option<Notification> {
        self.pending.take()
    }

    /// Tokens per minute consumed over the current window.
    ///
    /// Measured against the span since the oldest in-window event, so a
    /// burst five minutes ago reads as a high rate rather than being
    /// averaged over the full window.
    pub fn burn_rate_at(&self, now: DateTime<Utc>) -> f64 {
        let cutoff = now - self.config.window;
        let used = self.ledger.sum_since(cutoff);
        if used == 0 {
            return 0.0;
        }
        let anchor = self.ledger.oldest_since(cutoff).unwrap_or(now);
        let elapsed_minutes = ((now - anchor).num_seconds() as f64 / 60.0).max(1.0);
        used as f64 / elapsed_minutes
    }

    /// When the remaining quota runs out at the current burn rate.
    ///
    /// `None` when idle or when capacity is already exhausted.
    pub fn projected_depletion_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let used = self.ledger.sum_since(now - self.config.window);
        if used >= self.config.capacity {
            return None;
        }
        let rate = self.burn_rate_at(now);
        if rate <= 0.0 {
            return None;
        }
        let minutes = (self.config.capacity - used) as f64 / rate;
        Some(now + TimeDelta::seconds((minutes * 60.0) as i64))
    }

    fn compute_status(&self, now: DateTime<Utc>) -> QuotaStatus {
        let cutoff = now - self.config.window;
        let used = self.ledger.sum_since(cutoff);
        let percent = if self.config.capacity > 0 {
            used as f64 / self.config.capacity as f64 * 100.0
        } else if used > 0 {
            f64::INFINITY
        } else {
            0.0
        };
        let severity = self.config.thresholds.severity_for(used, self.config.capacity);
        let reset_at = match self.ledger.oldest_since(cutoff) {
            Some(oldest) => oldest + self.config.window,
            None => now,
        };
        QuotaStatus {
            used,
            capacity: self.config.capacity,
            percent,
            severity,
            reset_at,
        }
    }

    fn latch(&mut self, status: &QuotaStatus, now: DateTime<Utc>) {
        use std::cmp::Ordering;
        match status.severity.cmp(&self.last_severity) {
            Ordering::Greater => {
                self.pending = Some(Notification {
                    source: NotificationSource::Quota,
                    severity: status.severity,
                    percent: status.percent,
                    message: format!(
                        "Quota {:.0}% used — {}, window resets at {}",
                        status.percent,
                        status.severity,
                        status.reset_at.to_rfc3339(),
                    ),
                    timestamp: now,
                });
                self.last_severity = status.severity;
            }
            Ordering::Less => {
                // The window rolled forward. No notification on the way
                // down, and any unconsumed escalation is now stale.
                self.last_severity = status.severity;
                self.pending = None;
            }
            Ordering::Equal => {}
        }
    }
}
