//! Policy-driven context compaction: reclaim budget by discarding
//! low-value recorded context at one of three escalating levels.
//!
//! A [`CompactionPlan`] is built once per invocation by [`plan`] (pure,
//! no side effects), then handed to [`apply`] together with the external
//! confirmation ack. The strategic level is destructive and non-reversible,
//! so applying it without confirmation is a normal [`Refused`] no-op — the
//! state is left untouched and the system keeps accruing usage until either
//! the ack arrives or the ceiling forces an emergency pass.
//!
//! Savings bands (soft roughly 5–10% of capacity, strategic 15–25%,
//! emergency 30–45% in the reference deployment) are emergent outcomes of
//! the removal rules, never targets the planner steers toward.
//!
//! [`Refused`]: CompactionOutcome::Refused

use crate::context::ContextState;
use crate::policy::{CategoryClass, CompactionPolicy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};

// ── Levels ─────────────────────────────────────────────────────────

/// Aggressiveness of a compaction pass.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompactionLevel {
    /// Remove only duplicate/redundant (`Disposable`) categories.
    Soft,
    /// Soft, plus trim `Aged` categories down to their most recent
    /// `retention` records. Requires an external confirmation ack.
    Strategic,
    /// Remove every category that is not `Protected`. Applied without
    /// confirmation when the session is critical with no handoff yet.
    Emergency,
}

impl std::fmt::Display for CompactionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionLevel::Soft => write!(f, "soft"),
            CompactionLevel::Strategic => write!(f, "strategic"),
            CompactionLevel::Emergency => write!(f, "emergency"),
        }
    }
}

impl FromStr for CompactionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "soft" => Ok(CompactionLevel::Soft),
            "strategic" => Ok(CompactionLevel::Strategic),
            "emergency" => Ok(CompactionLevel::Emergency),
            other => Err(format!(
                "unknown compaction level {other:?} (expected soft, strategic, or emergency)"
            )),
        }
    }
}

// ── Plan ───────────────────────────────────────────────────────────

/// One removal in a compaction plan.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PlanItem {
    pub category: String,
    /// Tokens removed from this category (whole category or oldest records).
    pub tokens: u64,
}

/// The removals a single compaction pass will make.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CompactionPlan {
    pub level: CompactionLevel,
    pub items_to_remove: Vec<PlanItem>,
    pub tokens_saved: u64,
    /// Categories that keep at least some content after the pass.
    pub items_preserved: usize,
}

/// Result of applying a plan.
#[derive(Debug, Clone)]
pub enum CompactionOutcome {
    /// The pass ran; here is the new state.
    Applied(ContextState),
    /// Strategic compaction without a confirmation ack. State unchanged.
    Refused,
}

// ── Operations ─────────────────────────────────────────────────────

/// Build a compaction plan for `state` at the given level.
///
/// Pure: reads the state and policy, mutates nothing. `Protected`
/// categories never appear in the plan, at any level.
pub fn plan(
    state: &ContextState,
    level: CompactionLevel,
    policy: &CompactionPolicy,
) -> CompactionPlan {
    let mut items_to_remove = Vec::new();

    for (category, usage) in &state.breakdown {
        let class = policy.class_of(category);
        let tokens = match (level, class) {
            (_, CategoryClass::Protected) => 0,
            (_, CategoryClass::Disposable) => usage.tokens(),
            (CompactionLevel::Soft, CategoryClass::Aged) => 0,
            (CompactionLevel::Strategic, CategoryClass::Aged) => {
                if usage.count() > policy.retention {
                    usage.amounts[..usage.count() - policy.retention]
                        .iter()
                        .sum()
                } else {
                    0
                }
            }
            (CompactionLevel::Emergency, CategoryClass::Aged) => usage.tokens(),
        };
        if tokens > 0 {
            items_to_remove.push(PlanItem {
                category: category.clone(),
                tokens,
            });
        }
    }

    let tokens_saved = items_to_remove.iter().map(|i| i.tokens).sum();
    let fully_removed = items_to_remove
        .iter()
        .filter(|i| i.tokens == state.category_tokens(&i.category))
        .count();
    let items_preserved = state.breakdown.len() - fully_removed;

    debug!(
        "compaction plan ({level}): {} item(s), {tokens_saved} tokens",
        items_to_remove.len(),
    );

    CompactionPlan {
        level,
        items_to_remove,
        tokens_saved,
        items_preserved,
    }
}

/// Apply a plan to `state`, returning the compacted state.
///
/// Strategic plans require `confirmed == true`; without it the call is a
/// normal [`CompactionOutcome::Refused`] no-op. Removal is oldest-first
/// within each category, matching how the plan was computed.
pub fn apply(
    plan: &CompactionPlan,
    state: &ContextState,
    confirmed: bool,
) -> CompactionOutcome {
    if plan.level == CompactionLevel::Strategic && !confirmed {
        debug!("strategic compaction refused: no confirmation ack");
        return CompactionOutcome::Refused;
    }

    let mut next = state.clone();
    for item in &plan.items_to_remove {
        let Some(usage) = next.breakdown.get_mut(&item.category) else {
            continue;
        };
        let mut to_remove = item.tokens.min(usage.tokens());
        while to_remove > 0 && !usage.amounts.is_empty() {
            let oldest = usage.amounts[0];
            if oldest <= to_remove {
                usage.amounts.remove(0);
                to_remove -= oldest;
                next.total_tokens = next.total_tokens.saturating_sub(oldest);
            } else {
                // Plans are built from whole records; a partial remainder
                // only occurs when the plan was built against other state.
                usage.amounts[0] = oldest - to_remove;
                next.total_tokens = next.total_tokens.saturating_sub(to_remove);
                to_remove = 0;
            }
        }
        if usage.amounts.is_empty() {
            next.breakdown.remove(&item.category);
        }
    }

    info!(
        "compaction applied ({}): saved {} tokens, {} -> {}",
        plan.level, plan.tokens_saved, state.total_tokens, next.total_tokens,
    );
    CompactionOutcome::Applied(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-05T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// 150k total: 20k disposable, 100k aged (5 x 20k), 30k protected.
    fn reference_state() -> ContextState {
        let mut state = ContextState::new("ss-compact", t0());
        state.add(20_000, "duplicate_tool_result");
        for _ in 0..5 {
            state.add(20_000, "file_read");
        }
        state.add(30_000, "decision");
        state
    }

    fn applied(outcome: CompactionOutcome) -> ContextState {
        match outcome {
            CompactionOutcome::Applied(state) => state,
            CompactionOutcome::Refused => panic!("expected Applied, got Refused"),
        }
    }

    #[test]
    fn scenario_soft_removes_twenty_thousand_disposable() {
        let state = reference_state();
        let plan = plan(&state, CompactionLevel::Soft, &CompactionPolicy::default());
        assert_eq!(plan.tokens_saved, 20_000);
        assert_eq!(plan.items_to_remove.len(), 1);
        assert_eq!(plan.items_to_remove[0].category, "duplicate_tool_result");

        let next = applied(apply(&plan, &state, false));
        assert_eq!(next.total_tokens, 130_000);
        assert!(!next.breakdown.contains_key("duplicate_tool_result"));
        // Aged and protected content untouched at the soft level.
        assert_eq!(next.category_tokens("file_read"), 100_000);
        assert_eq!(next.category_tokens("decision"), 30_000);
    }

    #[test]
    fn strategic_trims_aged_to_retention() {
        let state = reference_state();
        let policy = CompactionPolicy::default().with_retention(3);
        let p = plan(&state, CompactionLevel::Strategic, &policy);

        // Disposable 20k + the 2 oldest of 5 file_read records (40k).
        assert_eq!(p.tokens_saved, 60_000);

        let next = applied(apply(&p, &state, true));
        assert_eq!(next.total_tokens, 90_000);
        assert_eq!(next.breakdown["file_read"].count(), 3);
        assert_eq!(next.category_tokens("decision"), 30_000);
    }

    #[test]
    fn strategic_without_ack_is_refused() {
        let state = reference_state();
        let p = plan(&state, CompactionLevel::Strategic, &CompactionPolicy::default());
        assert!(matches!(
            apply(&p, &state, false),
            CompactionOutcome::Refused
        ));
        // Caller keeps the pre-compaction state; nothing was mutated.
        assert_eq!(state.total_tokens, 150_000);
    }

    #[test]
    fn emergency_removes_everything_unprotected() {
        let state = reference_state();
        let p = plan(&state, CompactionLevel::Emergency, &CompactionPolicy::default());
        assert_eq!(p.tokens_saved, 120_000);
        assert_eq!(p.items_preserved, 1);

        let next = applied(apply(&p, &state, false));
        assert_eq!(next.total_tokens, 30_000);
        assert_eq!(next.breakdown.len(), 1);
        assert_eq!(next.category_tokens("decision"), 30_000);
    }

    #[test]
    fn protected_categories_survive_every_level() {
        let state = reference_state();
        let policy = CompactionPolicy::default();
        for level in [
            CompactionLevel::Soft,
            CompactionLevel::Strategic,
            CompactionLevel::Emergency,
        ] {
            let p = plan(&state, level, &policy);
            let next = applied(apply(&p, &state, true));
            assert_eq!(
                next.category_tokens("decision"),
                state.category_tokens("decision"),
                "{level} touched a protected category",
            );
        }
    }

    #[test]
    fn compaction_is_non_increasing() {
        let state = reference_state();
        let policy = CompactionPolicy::default();
        for level in [
            CompactionLevel::Soft,
            CompactionLevel::Strategic,
            CompactionLevel::Emergency,
        ] {
            let p = plan(&state, level, &policy);
            let next = applied(apply(&p, &state, true));
            assert!(next.total_tokens <= state.total_tokens);
        }
    }

    #[test]
    fn all_protected_state_compacts_to_equality() {
        let mut state = ContextState::new("ss-protected", t0());
        state.add(10_000, "decision");
        state.add(5_000, "current_edit");

        let p = plan(&state, CompactionLevel::Emergency, &CompactionPolicy::default());
        assert_eq!(p.tokens_saved, 0);
        assert!(p.items_to_remove.is_empty());

        let next = applied(apply(&p, &state, false));
        assert_eq!(next.total_tokens, state.total_tokens);
    }

    #[test]
    fn retention_keeps_the_most_recent_records() {
        let mut state = ContextState::new("ss-retention", t0());
        for amount in [1_000_u64, 2_000, 3_000, 4_000] {
            state.add(amount, "file_read");
        }
        let policy = CompactionPolicy::default().with_retention(2);
        let p = plan(&state, CompactionLevel::Strategic, &policy);
        assert_eq!(p.tokens_saved, 3_000); // 1k + 2k, the oldest two

        let next = applied(apply(&p, &state, true));
        assert_eq!(next.breakdown["file_read"].amounts, vec![3_000, 4_000]);
    }

    #[test]
    fn level_parsing() {
        assert_eq!("soft".parse::<CompactionLevel>().unwrap(), CompactionLevel::Soft);
        assert_eq!(
            "Strategic".parse::<CompactionLevel>().unwrap(),
            CompactionLevel::Strategic
        );
        assert!("aggressive".parse::<CompactionLevel>().is_err());
    }
}
