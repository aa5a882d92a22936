//! The [`SessionTracker`] façade: both budgets behind one `record` call.
//!
//! External event sources feed token-count deltas in; the tracker fans each
//! delta into the quota monitor and the context monitor, drains whatever
//! notifications the crossings latched, and applies emergency compaction on
//! its own when the session goes critical before any handoff exists. A
//! status query combines both monitors' readings into one composite view.
//!
//! Usage events arrive as a serialized stream, so the tracker takes
//! `&mut self` and holds no locks. Callers fanning in from multiple workers
//! wrap the tracker in a mutex; every accepted record is reflected in both
//! monitors before the call returns.

use crate::compact::{self, CompactionLevel, CompactionOutcome, CompactionPlan};
use crate::context::{ContextConfig, ContextMonitor, ContextStatus};
use crate::handoff::{self, HandoffArtifact, Objective};
use crate::notify::{NoopSink, NotificationSink};
use crate::policy::{CompactionPolicy, Severity};
use crate::quota::{QuotaConfig, QuotaMonitor, QuotaStatus};
use crate::TrackerError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

// ── Config ─────────────────────────────────────────────────────────

/// Aggregate configuration for a [`SessionTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub quota: QuotaConfig,
    pub context: ContextConfig,
    pub policy: CompactionPolicy,
}

impl TrackerConfig {
    pub fn new(quota: QuotaConfig, context: ContextConfig) -> Self {
        Self {
            quota,
            context,
            policy: CompactionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CompactionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

// ── Status ─────────────────────────────────────────────────────────

/// Composite view over both budgets.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedStatus {
    pub quota: QuotaStatus,
    pub context: ContextStatus,
    /// The worse of the two severities.
    pub combined_severity: Severity,
}

// ── Tracker ────────────────────────────────────────────────────────

/// Owns a quota monitor, a context monitor, the compaction policy, and the
/// notification sink.
pub struct SessionTracker {
    quota: QuotaMonitor,
    context: ContextMonitor,
    policy: CompactionPolicy,
    sink: Box<dyn NotificationSink>,
    handoff_taken: bool,
}

impl SessionTracker {
    /// Create a tracker with a fresh ledger and session. Notifications are
    /// discarded until a sink is registered.
    pub fn new(config: TrackerConfig) -> Self {
        Self::from_monitors(
            QuotaMonitor::new(config.quota),
            ContextMonitor::new(config.context),
            config.policy,
        )
    }

    /// Assemble a tracker from monitors that already carry state — a
    /// reloaded ledger, a resumed session.
    pub fn from_monitors(
        quota: QuotaMonitor,
        context: ContextMonitor,
        policy: CompactionPolicy,
    ) -> Self {
        Self {
            quota,
            context,
            policy,
            sink: Box::new(NoopSink),
            handoff_taken: false,
        }
    }

    /// Register the notification sink.
    pub fn with_sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn quota(&self) -> &QuotaMonitor {
        &self.quota
    }

    pub fn context(&self) -> &ContextMonitor {
        &self.context
    }

    pub fn handoff_taken(&self) -> bool {
        self.handoff_taken
    }

    /// Record one token-consuming operation against both budgets.
    ///
    /// A negative amount is rejected with [`TrackerError::InvalidAmount`]
    /// before either monitor is touched.
    pub fn record(&mut self, amount: i64, category: &str) -> Result<(), TrackerError> {
        self.record_at(amount, category, Utc::now())
    }

    /// [`record`](Self::record) with an explicit timestamp.
    pub fn record_at(
        &mut self,
        amount: i64,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        self.quota.record_usage_at(amount, category, now)?;
        // Same validation as the ledger, so this cannot fail after the
        // quota accepted the amount; both monitors see every record.
        self.context.track_at(amount, category, now)?;
        self.pump(now);
        Ok(())
    }

    /// Composite status across both budgets.
    pub fn status(&mut self) -> CombinedStatus {
        self.status_at(Utc::now())
    }

    /// [`status`](Self::status) at an explicit instant.
    pub fn status_at(&mut self, now: DateTime<Utc>) -> CombinedStatus {
        let quota = self.quota.status_at(now);
        let context = self.context.status_at(now);
        self.pump(now);
        let combined_severity = quota.severity.max(context.severity);
        CombinedStatus {
            quota,
            context,
            combined_severity,
        }
    }

    /// Run a compaction pass at the given level against the live session.
    ///
    /// Returns the plan and whether it was applied. Strategic without
    /// `confirmed` refuses and leaves the state untouched.
    pub fn compact(&mut self, level: CompactionLevel, confirmed: bool) -> (CompactionPlan, bool) {
        let plan = compact::plan(self.context.usage(), level, &self.policy);
        match compact::apply(&plan, self.context.usage(), confirmed) {
            CompactionOutcome::Applied(next) => {
                self.context.replace_state(next);
                (plan, true)
            }
            CompactionOutcome::Refused => (plan, false),
        }
    }

    /// Capture a handoff artifact from the live session state.
    ///
    /// Marks the session as handed off, which disarms automatic emergency
    /// compaction — continuity is already secured.
    pub fn take_handoff(
        &mut self,
        accomplished_summary: impl Into<String>,
        next_objectives: Vec<Objective>,
        key_decisions: Vec<String>,
    ) -> HandoffArtifact {
        self.take_handoff_at(accomplished_summary, next_objectives, key_decisions, Utc::now())
    }

    /// [`take_handoff`](Self::take_handoff) with an explicit timestamp.
    pub fn take_handoff_at(
        &mut self,
        accomplished_summary: impl Into<String>,
        next_objectives: Vec<Objective>,
        key_decisions: Vec<String>,
        now: DateTime<Utc>,
    ) -> HandoffArtifact {
        self.handoff_taken = true;
        handoff::build_at(
            self.context.usage(),
            accomplished_summary,
            next_objectives,
            key_decisions,
            now,
        )
    }

    /// Deliver latched notifications and handle the critical-without-handoff
    /// degradation path.
    fn pump(&mut self, now: DateTime<Utc>) {
        while let Some(n) = self.quota.should_notify() {
            self.sink.deliver(&n);
        }
        while let Some(n) = self.context.should_notify() {
            self.sink.deliver(&n);
        }

        let status = self.context.status_at(now);
        if status.severity == Severity::Critical && !self.handoff_taken {
            let plan = compact::plan(
                self.context.usage(),
                CompactionLevel::Emergency,
                &self.policy,
            );
            // Nothing to free when only protected categories remain.
            if plan.tokens_saved > 0
                && let CompactionOutcome::Applied(next) =
                    compact::apply(&plan, self.context.usage(), false)
            {
                info!(
                    "emergency compaction at {:.0}%: freed {} tokens",
                    status.percent, plan.tokens_saved,
                );
                self.context.replace_state(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{FnSink, Notification, NotificationSource};
    use chrono::TimeDelta;
    use std::sync::{Arc, Mutex};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-05T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn config() -> TrackerConfig {
        TrackerConfig::new(
            QuotaConfig::new(200_000, TimeDelta::hours(5)),
            ContextConfig::new(180_000),
        )
    }

    fn collecting_tracker() -> (SessionTracker, Arc<Mutex<Vec<Notification>>>) {
        let seen: Arc<Mutex<Vec<Notification>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_log = seen.clone();
        let tracker = SessionTracker::new(config()).with_sink(FnSink::new(move |n: &Notification| {
            sink_log.lock().unwrap().push(n.clone());
        }));
        (tracker, seen)
    }

    #[test]
    fn record_feeds_both_monitors() {
        let mut tracker = SessionTracker::new(config());
        tracker.record_at(10_000, "tool_result", t0()).unwrap();

        let status = tracker.status_at(t0());
        assert_eq!(status.quota.used, 10_000);
        assert_eq!(status.context.used, 10_000);
    }

    #[test]
    fn combined_severity_is_the_max() {
        let mut tracker = SessionTracker::new(config());
        // 120k: 60% of quota (warning), 66.7% of context (warning).
        tracker.record_at(120_000, "decision", t0()).unwrap();
        let status = tracker.status_at(t0());
        assert_eq!(status.combined_severity, Severity::Warning);

        // Quota window rolls off; context stays. 150k/180k = danger.
        let later = t0() + TimeDelta::hours(6);
        tracker.record_at(30_000, "decision", later).unwrap();
        let status = tracker.status_at(later);
        assert_eq!(status.quota.severity, Severity::Healthy);
        assert_eq!(status.context.severity, Severity::Danger);
        assert_eq!(status.combined_severity, Severity::Danger);
    }

    #[test]
    fn notifications_flow_from_both_sources() {
        let (mut tracker, seen) = collecting_tracker();
        // 150k: quota 75% (warning) and context 83% (danger) in one record.
        tracker.record_at(150_000, "decision", t0()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|n| n.source == NotificationSource::Quota
            && n.severity == Severity::Warning));
        assert!(seen.iter().any(|n| n.source == NotificationSource::Context
            && n.severity == Severity::Danger));
    }

    #[test]
    fn no_duplicate_notifications_on_repeated_status() {
        let (mut tracker, seen) = collecting_tracker();
        tracker.record_at(150_000, "decision", t0()).unwrap();
        let before = seen.lock().unwrap().len();

        tracker.status_at(t0() + TimeDelta::minutes(1));
        tracker.status_at(t0() + TimeDelta::minutes(2));
        assert_eq!(seen.lock().unwrap().len(), before);
    }

    #[test]
    fn critical_session_auto_compacts_when_no_handoff_exists() {
        let mut tracker = SessionTracker::new(config());
        tracker.record_at(100_000, "file_read", t0()).unwrap();
        tracker.record_at(40_000, "decision", t0()).unwrap();
        // 165k/180k = 91.7%: critical, with 100k of removable file reads.
        tracker.record_at(25_000, "file_read", t0()).unwrap();

        let status = tracker.status_at(t0());
        assert_eq!(status.context.used, 40_000);
        assert_eq!(tracker.context().usage().category_tokens("decision"), 40_000);
        assert!(!tracker.context().usage().breakdown.contains_key("file_read"));
    }

    #[test]
    fn handoff_disarms_auto_compaction() {
        let mut tracker = SessionTracker::new(config());
        tracker.record_at(100_000, "file_read", t0()).unwrap();
        let artifact = tracker.take_handoff_at("done", vec![], vec![], t0());
        assert!(tracker.handoff_taken());
        assert!(artifact.current_state.contains("100000 tokens"));

        // Critical now, but continuity is secured: nothing is removed.
        tracker.record_at(65_000, "file_read", t0()).unwrap();
        assert_eq!(tracker.context().usage().total_tokens, 165_000);
    }

    #[test]
    fn manual_strategic_compaction_needs_confirmation() {
        let mut tracker = SessionTracker::new(config());
        for _ in 0..5 {
            tracker.record_at(10_000, "file_read", t0()).unwrap();
        }

        let (plan, applied) = tracker.compact(CompactionLevel::Strategic, false);
        assert!(!applied);
        assert!(plan.tokens_saved > 0);
        assert_eq!(tracker.context().usage().total_tokens, 50_000);

        let (plan, applied) = tracker.compact(CompactionLevel::Strategic, true);
        assert!(applied);
        assert_eq!(
            tracker.context().usage().total_tokens,
            50_000 - plan.tokens_saved
        );
    }

    #[test]
    fn invalid_amount_leaves_both_budgets_unchanged() {
        let mut tracker = SessionTracker::new(config());
        tracker.record_at(5_000, "tool_result", t0()).unwrap();
        assert!(tracker.record_at(-1, "tool_result", t0()).is_err());

        let status = tracker.status_at(t0());
        assert_eq!(status.quota.used, 5_000);
        assert_eq!(status.context.used, 5_000);
    }
}
