//! Convenience re-exports for common `stint-rs` types.
//!
//! Meant to be glob-imported when wiring up tracking:
//!
//! ```ignore
//! use stint_rs::prelude::*;
//! ```
//!
//! This pulls in the types most callers need: the [`SessionTracker`] and
//! its config, both monitors, the handoff artifact and store, and the
//! notification sinks. Specialized types (ledger stores, plan internals,
//! category classes) are intentionally excluded — import those from their
//! modules directly when needed.

pub use crate::TrackerError;

// ── Tracking ────────────────────────────────────────────────────────
pub use crate::context::{ContextConfig, ContextMonitor, ContextState, ContextStatus};
pub use crate::quota::{QuotaConfig, QuotaMonitor, QuotaStatus};
pub use crate::tracker::{CombinedStatus, SessionTracker, TrackerConfig};

// ── Policy & compaction ─────────────────────────────────────────────
pub use crate::compact::{CompactionLevel, CompactionOutcome, CompactionPlan};
pub use crate::policy::{CompactionPolicy, Severity, ThresholdTable};

// ── Handoff ─────────────────────────────────────────────────────────
pub use crate::handoff::{HandoffArtifact, HandoffStore, Objective};

// ── Notifications ───────────────────────────────────────────────────
pub use crate::notify::{
    BroadcastSink, CompositeSink, FnSink, LoggingSink, NoopSink, Notification, NotificationSink,
    NotificationSource,
};
