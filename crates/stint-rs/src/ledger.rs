//! Append-only usage event log with sliding-window queries.
//!
//! The ledger is the single source of truth all budget math derives from.
//! Events are immutable once recorded; the only mutation besides append is
//! [`UsageLedger::prune`], which discards events that have expired out of
//! every monitor's retention window (bounded memory, not correctness).
//!
//! Storage is abstracted behind [`LedgerStore`] so the quota monitor can be
//! handed an explicit ledger instance — an in-memory stub in tests, an
//! atomic JSON file in deployments — instead of reaching for a global
//! tracker file.

use crate::TrackerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

// ── UsageEvent ─────────────────────────────────────────────────────

/// An immutable record of token-consuming work.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UsageEvent {
    /// When the work happened.
    pub timestamp: DateTime<Utc>,
    /// Tokens consumed. Never negative — rejected at ingestion.
    pub amount: u64,
    /// What kind of work consumed them (tool call, model response, ...).
    pub category: String,
}

// ── UsageLedger ────────────────────────────────────────────────────

/// Rolling log of [`UsageEvent`]s, kept in insertion (time) order.
#[derive(Debug, Default, Clone)]
pub struct UsageLedger {
    events: Vec<UsageEvent>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from previously persisted events.
    pub fn from_events(events: Vec<UsageEvent>) -> Self {
        Self { events }
    }

    /// Append an event stamped with the current time.
    ///
    /// A negative `amount` is rejected with [`TrackerError::InvalidAmount`],
    /// logged, and the ledger is left unchanged.
    pub fn record(
        &mut self,
        amount: i64,
        category: impl Into<String>,
    ) -> Result<(), TrackerError> {
        self.record_at(amount, category, Utc::now())
    }

    /// Append an event with an explicit timestamp.
    pub fn record_at(
        &mut self,
        amount: i64,
        category: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let category = category.into();
        if amount < 0 {
            warn!("rejected usage record: negative amount {amount} ({category})");
            return Err(TrackerError::InvalidAmount { amount, category });
        }
        self.events.push(UsageEvent {
            timestamp: at,
            amount: amount as u64,
            category,
        });
        Ok(())
    }

    /// Sum of amounts for events with `timestamp >= cutoff`.
    ///
    /// Returns 0 for an empty ledger.
    pub fn sum_since(&self, cutoff: DateTime<Utc>) -> u64 {
        self.events
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .map(|e| e.amount)
            .sum()
    }

    /// Timestamp of the oldest event still at or after `cutoff`.
    pub fn oldest_since(&self, cutoff: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.events
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .map(|e| e.timestamp)
            .min()
    }

    /// Permanently discard events older than `cutoff`.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) {
        let before = self.events.len();
        self.events.retain(|e| e.timestamp >= cutoff);
        let dropped = before - self.events.len();
        if dropped > 0 {
            debug!("pruned {dropped} expired usage event(s)");
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[UsageEvent] {
        &self.events
    }
}

// ── LedgerStore ────────────────────────────────────────────────────

/// Durable storage for a ledger's event log.
pub trait LedgerStore {
    fn load(&self) -> Result<Vec<UsageEvent>, TrackerError>;
    fn save(&self, events: &[UsageEvent]) -> Result<(), TrackerError>;
}

/// In-memory store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<Vec<UsageEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Vec<UsageEvent>, TrackerError> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(events.clone())
    }

    fn save(&self, events: &[UsageEvent]) -> Result<(), TrackerError> {
        let mut slot = self.events.lock().unwrap_or_else(|e| e.into_inner());
        *slot = events.to_vec();
        Ok(())
    }
}

/// JSON file store. Writes are atomic: serialize to a temp file in the same
/// directory, then rename into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonFileStore {
    /// Load the event log. A missing file is an empty ledger, not an error.
    fn load(&self) -> Result<Vec<UsageEvent>, TrackerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(&self.path)?;
        let events: Vec<UsageEvent> = serde_json::from_str(&json)?;
        Ok(events)
    }

    fn save(&self, events: &[UsageEvent]) -> Result<(), TrackerError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(events)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
