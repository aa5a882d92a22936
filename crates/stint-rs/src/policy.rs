//! Severity levels, threshold tables, and category-safety classification.
//!
//! Both monitors share the same severity ladder and evaluate it against a
//! declarative [`ThresholdTable`] rather than inlined percentage checks, so
//! deployments can tune the cutoffs without touching tracking logic. The
//! [`CompactionPolicy`] plays the same role for compaction: which categories
//! are removable is a property of the category *name*, looked up in a table,
//! never an LRU or size heuristic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Severity ───────────────────────────────────────────────────────

/// Severity of a budget reading, ordered from least to most urgent.
///
/// `Fresh` is reported only when nothing at all has been consumed inside
/// the window; any nonzero usage below the warning threshold is `Healthy`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fresh,
    Healthy,
    Warning,
    Danger,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Fresh => write!(f, "fresh"),
            Severity::Healthy => write!(f, "healthy"),
            Severity::Warning => write!(f, "warning"),
            Severity::Danger => write!(f, "danger"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

// ── ThresholdTable ─────────────────────────────────────────────────

/// Fractional cutoffs at which a budget reading escalates.
///
/// Defaults are the 50/80/90 design points used by both monitors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdTable {
    /// Ratio at which usage becomes `Warning`.
    pub warning: f64,
    /// Ratio at which usage becomes `Danger`.
    pub danger: f64,
    /// Ratio at which usage becomes `Critical`.
    pub critical: f64,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            warning: 0.50,
            danger: 0.80,
            critical: 0.90,
        }
    }
}

impl ThresholdTable {
    /// Map a used/capacity pair to a severity.
    ///
    /// A ratio above 1.0 is still just `Critical` — exceeding capacity is a
    /// representable state, never clamped or treated as an error.
    pub fn severity_for(&self, used: u64, capacity: u64) -> Severity {
        if used == 0 {
            return Severity::Fresh;
        }
        if capacity == 0 {
            return Severity::Critical;
        }
        let ratio = used as f64 / capacity as f64;
        if ratio >= self.critical {
            Severity::Critical
        } else if ratio >= self.danger {
            Severity::Danger
        } else if ratio >= self.warning {
            Severity::Warning
        } else {
            Severity::Healthy
        }
    }
}

// ── CompactionPolicy ───────────────────────────────────────────────

/// How a usage category behaves under compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryClass {
    /// Duplicate or redundant content. Removed entirely at every level.
    Disposable,
    /// Useful but aging content. Strategic compaction keeps only the most
    /// recent `retention` records; emergency removes it entirely.
    Aged,
    /// Never offered for removal, at any level.
    Protected,
}

/// Declarative classification of usage categories for the compactor.
///
/// Categories not present in the table fall back to `default_class`
/// (`Aged`): only the explicitly protected set is exempt from removal.
#[derive(Debug, Clone)]
pub struct CompactionPolicy {
    classes: HashMap<String, CategoryClass>,
    default_class: CategoryClass,
    /// Records kept per `Aged` category during strategic compaction.
    pub retention: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        let mut classes = HashMap::new();
        for name in ["duplicate_tool_result", "stale_file_read"] {
            classes.insert(name.to_string(), CategoryClass::Disposable);
        }
        for name in ["file_read", "tool_result", "search_result", "api_response"] {
            classes.insert(name.to_string(), CategoryClass::Aged);
        }
        for name in ["decision", "key_decision", "edit", "current_edit", "instruction"] {
            classes.insert(name.to_string(), CategoryClass::Protected);
        }
        Self {
            classes,
            default_class: CategoryClass::Aged,
            retention: 3,
        }
    }
}

impl CompactionPolicy {
    /// An empty policy where every category falls back to `default_class`.
    pub fn empty() -> Self {
        Self {
            classes: HashMap::new(),
            default_class: CategoryClass::Aged,
            retention: 3,
        }
    }

    /// Classify (or re-classify) a category by name.
    pub fn classify(mut self, category: impl Into<String>, class: CategoryClass) -> Self {
        self.classes.insert(category.into(), class);
        self
    }

    /// Set the fallback class for categories not in the table.
    pub fn with_default_class(mut self, class: CategoryClass) -> Self {
        self.default_class = class;
        self
    }

    /// Set the records kept per `Aged` category during strategic compaction.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Look up the class for a category name.
    pub fn class_of(&self, category: &str) -> CategoryClass {
        self.classes
            .get(category)
            .copied()
            .unwrap_or(self.default_class)
    }

    /// Whether a category may ever be removed.
    pub fn is_safe(&self, category: &str) -> bool {
        self.class_of(category) != CategoryClass::Protected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ladder() {
        let t = ThresholdTable::default();
        assert_eq!(t.severity_for(0, 200_000), Severity::Fresh);
        assert_eq!(t.severity_for(1, 200_000), Severity::Healthy);
        assert_eq!(t.severity_for(100_000, 200_000), Severity::Warning);
        assert_eq!(t.severity_for(160_000, 200_000), Severity::Danger);
        assert_eq!(t.severity_for(180_000, 200_000), Severity::Critical);
    }

    #[test]
    fn over_capacity_is_critical_not_error() {
        let t = ThresholdTable::default();
        assert_eq!(t.severity_for(250_000, 200_000), Severity::Critical);
    }

    #[test]
    fn zero_capacity_with_usage_is_critical() {
        let t = ThresholdTable::default();
        assert_eq!(t.severity_for(1, 0), Severity::Critical);
        assert_eq!(t.severity_for(0, 0), Severity::Fresh);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Fresh < Severity::Healthy);
        assert!(Severity::Warning < Severity::Danger);
        assert!(Severity::Danger < Severity::Critical);
    }

    #[test]
    fn default_policy_classifies_reference_categories() {
        let p = CompactionPolicy::default();
        assert_eq!(
            p.class_of("duplicate_tool_result"),
            CategoryClass::Disposable
        );
        assert_eq!(p.class_of("file_read"), CategoryClass::Aged);
        assert_eq!(p.class_of("decision"), CategoryClass::Protected);
        assert!(!p.is_safe("current_edit"));
        assert!(p.is_safe("stale_file_read"));
    }

    #[test]
    fn unknown_categories_use_default_class() {
        let p = CompactionPolicy::default();
        assert_eq!(p.class_of("mystery_blob"), CategoryClass::Aged);

        let strict = CompactionPolicy::empty().with_default_class(CategoryClass::Protected);
        assert!(!strict.is_safe("mystery_blob"));
    }

    #[test]
    fn classify_overrides_table() {
        let p = CompactionPolicy::default().classify("file_read", CategoryClass::Protected);
        assert!(!p.is_safe("file_read"));
    }
}
