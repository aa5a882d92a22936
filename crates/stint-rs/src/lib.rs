//! Dual-budget session tracking for LLM CLI workflows.
//!
//! `stint-rs` tracks two independent, decaying resource counters around a
//! working session: a **rolling token quota** (a fixed capacity over a
//! sliding time window, shared across sessions) and a **per-session
//! context window** (cumulative, no time decay, shrinks only through
//! explicit compaction). Each budget escalates through severity thresholds
//! and emits edge-triggered notifications; when a session approaches its
//! context ceiling, a policy-driven compactor reclaims space, and when a
//! session must end, a handoff artifact carries its decisions and next
//! objectives to the successor session.
//!
//! # Getting started
//!
//! ```ignore
//! use stint_rs::prelude::*;
//! use chrono::TimeDelta;
//!
//! let config = TrackerConfig::new(
//!     QuotaConfig::new(200_000, TimeDelta::hours(5)),
//!     ContextConfig::new(180_000),
//! );
//! let mut tracker = SessionTracker::new(config).with_sink(LoggingSink);
//!
//! // One call per token-consuming operation.
//! tracker.record(12_000, "file_read")?;
//! tracker.record(3_500, "tool_result")?;
//!
//! let status = tracker.status();
//! println!("{}", status.quota.to_log_string());
//! println!("{}", status.context.to_log_string());
//!
//! // End of session: hand off to the successor.
//! let artifact = tracker.take_handoff(
//!     "Implemented the parser.",
//!     vec![Objective { text: "Wire up the CLI".into(), estimated_tokens: 20_000 }],
//!     vec!["Chose a hand-rolled lexer over a parser generator".into()],
//! );
//! HandoffStore::new(".stint/handoffs")?.persist("default", &artifact)?;
//! # Ok::<(), stint_rs::TrackerError>(())
//! ```
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Record usage and query both budgets at once:** see
//!   [`SessionTracker`](tracker::SessionTracker) and
//!   [`TrackerConfig`](tracker::TrackerConfig).
//! - **Track the rolling quota alone:** see
//!   [`QuotaMonitor`](quota::QuotaMonitor) over a persistable
//!   [`UsageLedger`](ledger::UsageLedger) ([`LedgerStore`](ledger::LedgerStore)
//!   abstracts the file behind it).
//! - **Track a single session's context:** see
//!   [`ContextMonitor`](context::ContextMonitor) and
//!   [`ContextState`](context::ContextState).
//! - **Reclaim context space:** see [`compact::plan`] / [`compact::apply`]
//!   and the [`CompactionPolicy`](policy::CompactionPolicy) table that
//!   decides what is removable.
//! - **React to threshold crossings:** implement
//!   [`NotificationSink`](notify::NotificationSink), or use the provided
//!   logging / closure / composite / broadcast sinks.
//! - **Carry state across sessions:** see [`handoff`] for building,
//!   persisting, and reloading [`HandoffArtifact`](handoff::HandoffArtifact)s.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`ledger`] | Append-only usage event log, sliding-window sums, storage |
//! | [`quota`] | Rolling-window quota monitor with burn-rate projection |
//! | [`context`] | Per-session cumulative context monitor with breakdown |
//! | [`policy`] | Severity thresholds and category-safety tables as data |
//! | [`compact`] | Soft / strategic / emergency compaction planning |
//! | [`handoff`] | Durable session handoff artifacts and their store |
//! | [`notify`] | Notification values and delivery sinks |
//! | [`tracker`] | [`SessionTracker`](tracker::SessionTracker) façade |
//!
//! # Design principles
//!
//! 1. **The ledger is the source of truth.** All quota math derives from
//!    the event log; severity is recomputed from scratch on every check,
//!    never carried as hidden state.
//!
//! 2. **Policy is data.** Threshold percentages and category-safety
//!    classifications live in declarative tables passed into the monitors
//!    and compactor, so they can be tuned and tested independently.
//!
//! 3. **Notify on edges, report on levels.** Status queries always return
//!    the full reading — including over-capacity — but an operator hears
//!    about each escalation exactly once.
//!
//! 4. **Degrade, never crash.** Bad input is logged and dropped, corrupt
//!    handoffs are surfaced for an explicit decision, and the worst case
//!    is a quieter tracker, not a dead process.

pub mod compact;
pub mod context;
pub mod handoff;
pub mod ledger;
pub mod notify;
pub mod policy;
pub mod prelude;
pub mod quota;
pub mod tracker;

use std::path::PathBuf;

// ── Errors ─────────────────────────────────────────────────────────

/// Error taxonomy for the tracking core.
///
/// Nothing here is fatal to the process: ingestion errors are local no-ops
/// and artifact corruption is escalated for a policy decision by the
/// caller. A refused strategic compaction is a normal return
/// ([`compact::CompactionOutcome::Refused`]), not an error.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A negative usage amount reached ingestion. The call was a no-op.
    #[error("invalid usage amount {amount} for category {category:?}: amounts must be non-negative")]
    InvalidAmount { amount: i64, category: String },

    /// A persisted handoff artifact failed to parse. The caller must
    /// explicitly choose between proceeding without it and aborting.
    #[error("handoff artifact at {} is corrupt: {reason}", path.display())]
    HandoffCorrupt { path: PathBuf, reason: String },

    /// Storage I/O failure (ledger file, session state, handoff store).
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),

    /// (De)serialization failure outside the corrupt-handoff path.
    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_operator_readable() {
        let err = TrackerError::InvalidAmount {
            amount: -3,
            category: "tool_result".into(),
        };
        let text = err.to_string();
        assert!(text.contains("-3"));
        assert!(text.contains("tool_result"));
        assert!(text.contains("non-negative"));

        let err = TrackerError::HandoffCorrupt {
            path: PathBuf::from("/tmp/handoff-001.json"),
            reason: "EOF while parsing".into(),
        };
        assert!(err.to_string().contains("handoff-001.json"));
    }
}
