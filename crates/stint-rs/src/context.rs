//! Per-session context accounting: a cumulative token count with a
//! per-category breakdown.
//!
//! Unlike the quota window, context never decays with time — it only grows
//! as work is tracked, and only shrinks when the compactor removes
//! attributed categories. The state lives exactly as long as one session:
//! created at session start, discarded at session end unless a handoff
//! snapshot is taken first.
//!
//! Each category keeps its ordered list of recorded amounts, not just a
//! total, because strategic compaction retains the most recent N records
//! per category and needs to know which amounts are oldest.

use crate::notify::{Notification, NotificationSource};
use crate::policy::{CompactionPolicy, Severity, ThresholdTable};
use crate::TrackerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Generate a unique session ID.
pub fn generate_session_id() -> String {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter handles sub-nanosecond calls.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ss-{ts:x}-{count:04x}")
}

// ── State ──────────────────────────────────────────────────────────

/// Recorded amounts for one category, oldest first.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryUsage {
    pub amounts: Vec<u64>,
}

impl CategoryUsage {
    /// Total tokens attributed to this category.
    pub fn tokens(&self) -> u64 {
        self.amounts.iter().sum()
    }

    pub fn count(&self) -> usize {
        self.amounts.len()
    }
}

/// Accumulated context usage for a single session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ContextState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    /// Invariant: equals the sum of every category's amounts.
    pub total_tokens: u64,
    pub breakdown: BTreeMap<String, CategoryUsage>,
}

impl ContextState {
    pub fn new(session_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at,
            total_tokens: 0,
            breakdown: BTreeMap::new(),
        }
    }

    pub(crate) fn add(&mut self, amount: u64, category: &str) {
        self.breakdown
            .entry(category.to_string())
            .or_default()
            .amounts
            .push(amount);
        self.total_tokens += amount;
    }

    /// Tokens attributed to one category (0 if never tracked).
    pub fn category_tokens(&self, category: &str) -> u64 {
        self.breakdown.get(category).map_or(0, CategoryUsage::tokens)
    }

    /// One-line summary of the breakdown, for handoff artifacts and logs.
    pub fn describe(&self) -> String {
        let categories: Vec<String> = self
            .breakdown
            .iter()
            .map(|(name, usage)| format!("{name}={}", usage.tokens()))
            .collect();
        format!(
            "{} tokens across {} categories ({})",
            self.total_tokens,
            self.breakdown.len(),
            categories.join(", "),
        )
    }
}

// ── Config & status ────────────────────────────────────────────────

/// Configuration for a [`ContextMonitor`].
///
/// `capacity` is a required input: a configured ceiling chosen below the
/// platform's hard limit to leave headroom. The library deliberately ships
/// no default value for it.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub capacity: u64,
    pub thresholds: ThresholdTable,
}

impl ContextConfig {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            thresholds: ThresholdTable::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdTable) -> Self {
        self.thresholds = thresholds;
        self
    }
}

/// Snapshot of context usage.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStatus {
    pub used: u64,
    pub capacity: u64,
    /// `used / capacity * 100`; may exceed 100.
    pub percent: f64,
    pub severity: Severity,
}

impl ContextStatus {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {} / {} tokens ({:.0}%, {})",
            self.used, self.capacity, self.percent, self.severity,
        )
    }
}

/// A breakdown entry the compactor may consider.
///
/// `safe` comes from the policy table by category name; `safe == false`
/// entries are never offered for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionCandidate {
    pub category: String,
    pub tokens: u64,
    pub safe: bool,
}

// ── Monitor ────────────────────────────────────────────────────────

/// Tracks cumulative per-session context usage with the same edge-triggered
/// notification latch as the quota monitor.
#[derive(Debug)]
pub struct ContextMonitor {
    config: ContextConfig,
    state: ContextState,
    last_severity: Severity,
    pending: Option<Notification>,
}

impl ContextMonitor {
    /// Start a fresh session.
    pub fn new(config: ContextConfig) -> Self {
        let state = ContextState::new(generate_session_id(), Utc::now());
        Self::with_state(config, state)
    }

    /// Resume over previously accumulated state (e.g. reloaded by the CLI
    /// between invocations).
    pub fn with_state(config: ContextConfig, state: ContextState) -> Self {
        let last_severity = config
            .thresholds
            .severity_for(state.total_tokens, config.capacity);
        Self {
            config,
            state,
            last_severity,
            pending: None,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Read-only snapshot of the accumulated state.
    pub fn usage(&self) -> &ContextState {
        &self.state
    }

    /// Track token-consuming work against this session.
    pub fn track(&mut self, amount: i64, category: &str) -> Result<(), TrackerError> {
        self.track_at(amount, category, Utc::now())
    }

    /// [`track`](Self::track) with an explicit timestamp for the
    /// notification, if one is latched.
    pub fn track_at(
        &mut self,
        amount: i64,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        if amount < 0 {
            warn!("rejected context track: negative amount {amount} ({category})");
            return Err(TrackerError::InvalidAmount {
                amount,
                category: category.to_string(),
            });
        }
        self.state.add(amount as u64, category);
        self.status_at(now);
        Ok(())
    }

    /// Tokens left before the configured ceiling. Saturates at 0.
    pub fn estimate_remaining(&self) -> u64 {
        self.config.capacity.saturating_sub(self.state.total_tokens)
    }

    /// Current status. Updates the notification latch.
    pub fn status(&mut self) -> ContextStatus {
        self.status_at(Utc::now())
    }

    /// [`status`](Self::status) with an explicit notification timestamp.
    pub fn status_at(&mut self, now: DateTime<Utc>) -> ContextStatus {
        let used = self.state.total_tokens;
        let percent = if self.config.capacity > 0 {
            used as f64 / self.config.capacity as f64 * 100.0
        } else if used > 0 {
            f64::INFINITY
        } else {
            0.0
        };
        let severity = self
            .config
            .thresholds
            .severity_for(used, self.config.capacity);
        let status = ContextStatus {
            used,
            capacity: self.config.capacity,
            percent,
            severity,
        };
        self.latch(&status, now);
        status
    }

    /// The notification latched by the most recent escalation, if any.
    pub fn should_notify(&mut self) -> Option<Notification> {
        self.pending.take()
    }

    /// List breakdown entries with their policy-determined safety.
    pub fn compaction_candidates(&self, policy: &CompactionPolicy) -> Vec<CompactionCandidate> {
        self.state
            .breakdown
            .iter()
            .map(|(category, usage)| CompactionCandidate {
                category: category.clone(),
                tokens: usage.tokens(),
                safe: policy.is_safe(category),
            })
            .collect()
    }

    /// Install post-compaction state. The latch re-evaluates on the next
    /// status call; dropping severity never notifies.
    pub fn replace_state(&mut self, state: ContextState) {
        self.state = state;
    }

    fn latch(&mut self, status: &ContextStatus, now: DateTime<Utc>) {
        use std::cmp::Ordering;
        match status.severity.cmp(&self.last_severity) {
            Ordering::Greater => {
                let hint = match status.severity {
                    Severity::Critical => "compact now or hand off",
                    Severity::Danger => "consider compacting",
                    _ => "keep an eye on context growth",
                };
                self.pending = Some(Notification {
                    source: NotificationSource::Context,
                    severity: status.severity,
                    percent: status.percent,
                    message: format!(
                        "Context {:.0}% used — {}, {}",
                        status.percent, status.severity, hint,
                    ),
                    timestamp: now,
                });
                self.last_severity = status.severity;
            }
            Ordering::Less => {
                // Only compaction shrinks context; no notification on the
                // way down, and any unconsumed escalation is stale.
                self.last_severity = status.severity;
                self.pending = None;
            }
            Ordering::Equal => {}
        }
    }
}
