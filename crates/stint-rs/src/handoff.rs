//! Durable handoff artifacts: the bridge between one session and the next.
//!
//! A [`HandoffArtifact`] captures what a session accomplished, the state it
//! left behind, and what its successor should do, so the next session can
//! resume without re-deriving prior decisions. Artifacts are append-only
//! history: persisted once, read by the next session's bootstrap, and
//! retained forever after.
//!
//! Directory layout, one lineage per directory:
//! ```text
//! handoffs_root/
//!   default/
//!     handoff-001.json
//!     handoff-002.json
//! ```
//!
//! Writes are atomic (temp file, then rename). A persisted artifact that
//! fails to parse surfaces [`TrackerError::HandoffCorrupt`] — the caller
//! must explicitly decide between "proceed without context" and "abort",
//! it is never silently treated as "no handoff".

use crate::context::ContextState;
use crate::TrackerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

// ── Artifact ───────────────────────────────────────────────────────

/// A unit of planned work for the successor session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Objective {
    pub text: String,
    /// Rough token budget the work is expected to need.
    pub estimated_tokens: u64,
}

/// Snapshot of a session's outcome, written at end-of-session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HandoffArtifact {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub accomplished_summary: String,
    /// Description of the working state left behind.
    pub current_state: String,
    pub next_objectives: Vec<Objective>,
    pub key_decisions: Vec<String>,
}

/// Build an artifact from the live context state. Pure and deterministic
/// given its inputs; stamped with the current time.
pub fn build(
    context: &ContextState,
    accomplished_summary: impl Into<String>,
    next_objectives: Vec<Objective>,
    key_decisions: Vec<String>,
) -> HandoffArtifact {
    build_at(
        context,
        accomplished_summary,
        next_objectives,
        key_decisions,
        Utc::now(),
    )
}

/// [`build`] with an explicit creation timestamp.
pub fn build_at(
    context: &ContextState,
    accomplished_summary: impl Into<String>,
    next_objectives: Vec<Objective>,
    key_decisions: Vec<String>,
    now: DateTime<Utc>,
) -> HandoffArtifact {
    HandoffArtifact {
        session_id: context.session_id.clone(),
        created_at: now,
        accomplished_summary: accomplished_summary.into(),
        current_state: context.describe(),
        next_objectives,
        key_decisions,
    }
}

impl HandoffArtifact {
    /// Render the artifact as the bootstrap prompt for the successor
    /// session.
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Session handoff — {}\n\n", self.session_id));
        out.push_str(&format!("Handed off at {}.\n", self.created_at.to_rfc3339()));

        out.push_str("\n## Accomplished\n\n");
        out.push_str(&self.accomplished_summary);
        out.push('\n');

        out.push_str("\n## Current state\n\n");
        out.push_str(&self.current_state);
        out.push('\n');

        if !self.next_objectives.is_empty() {
            out.push_str("\n## Next objectives\n\n");
            for objective in &self.next_objectives {
                out.push_str(&format!(
                    "- {} (~{} tokens)\n",
                    objective.text, objective.estimated_tokens,
                ));
            }
        }

        if !self.key_decisions.is_empty() {
            out.push_str("\n## Key decisions\n\n");
            for decision in &self.key_decisions {
                out.push_str(&format!("- {decision}\n"));
            }
        }

        out
    }
}

// ── Store ──────────────────────────────────────────────────────────

/// Append-only, per-lineage artifact storage on disk.
pub struct HandoffStore {
    root: PathBuf,
}

impl HandoffStore {
    /// Create a store, ensuring the root directory exists.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lineage_dir(&self, lineage: &str) -> PathBuf {
        self.root.join(lineage)
    }

    fn artifact_filename(seq: u32) -> String {
        format!("handoff-{seq:03}.json")
    }

    /// Parse `handoff-NNN.json` into its sequence number.
    fn parse_seq(name: &str) -> Option<u32> {
        name.strip_prefix("handoff-")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    fn scan(&self, lineage: &str) -> Result<Vec<(u32, PathBuf)>, TrackerError> {
        let dir = self.lineage_dir(lineage);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(seq) = Self::parse_seq(&name) {
                found.push((seq, entry.path()));
            }
        }
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found)
    }

    /// Atomically write the artifact as the next sequence number in its
    /// lineage. Returns the path written.
    pub fn persist(
        &self,
        lineage: &str,
        artifact: &HandoffArtifact,
    ) -> Result<PathBuf, TrackerError> {
        let dir = self.lineage_dir(lineage);
        std::fs::create_dir_all(&dir)?;

        let next_seq = self
            .scan(lineage)?
            .last()
            .map(|(seq, _)| seq + 1)
            .unwrap_or(1);
        let path = dir.join(Self::artifact_filename(next_seq));
        let tmp = dir.join(format!(".{}.tmp", Self::artifact_filename(next_seq)));

        let json = serde_json::to_string_pretty(artifact)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Load the most recently persisted artifact for a lineage.
    ///
    /// `Ok(None)` for a first session (no artifacts yet). A latest artifact
    /// that fails to parse is [`TrackerError::HandoffCorrupt`], never
    /// `None`.
    pub fn load_latest(&self, lineage: &str) -> Result<Option<HandoffArtifact>, TrackerError> {
        let Some((_, path)) = self.scan(lineage)?.into_iter().next_back() else {
            return Ok(None);
        };
        let json = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&json) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => Err(TrackerError::HandoffCorrupt {
                path,
                reason: e.to_string(),
            }),
        }
    }

    /// The retained history for a lineage, oldest first.
    ///
    /// This is a history view, not a bootstrap: a malformed file here is
    /// skipped with a warning instead of failing the whole listing. Use
    /// [`load_latest`](Self::load_latest) when resuming.
    pub fn list(&self, lineage: &str) -> Result<Vec<HandoffArtifact>, TrackerError> {
        let mut artifacts = Vec::new();
        for (_, path) in self.scan(lineage)? {
            let json = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&json) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    warn!("Skipping malformed handoff at {}: {e}", path.display());
                }
            }
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-05T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample_context() -> ContextState {
        let mut state = ContextState::new("ss-handoff", t0());
        state.add(10_000, "file_read");
        state.add(2_000, "decision");
        state
    }

    fn sample_artifact() -> HandoffArtifact {
        build_at(
            &sample_context(),
            "Implemented the ledger and quota monitor.",
            vec![Objective {
                text: "X".into(),
                estimated_tokens: 5_000,
            }],
            vec!["Store quota in a rolling 5-hour window".into()],
            t0(),
        )
    }

    #[test]
    fn build_is_deterministic() {
        assert_eq!(sample_artifact(), sample_artifact());
        let artifact = sample_artifact();
        assert_eq!(artifact.session_id, "ss-handoff");
        assert!(artifact.current_state.contains("12000 tokens"));
    }

    #[test]
    fn persist_load_roundtrip_preserves_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path()).unwrap();

        let artifact = sample_artifact();
        store.persist("default", &artifact).unwrap();

        let loaded = store.load_latest("default").unwrap().unwrap();
        assert_eq!(loaded, artifact);
        assert_eq!(loaded.next_objectives[0].text, "X");
        assert_eq!(loaded.next_objectives[0].estimated_tokens, 5_000);
    }

    #[test]
    fn first_session_has_no_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path()).unwrap();
        assert!(store.load_latest("default").unwrap().is_none());
    }

    #[test]
    fn sequences_accumulate_as_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path()).unwrap();

        let first = sample_artifact();
        let mut second = sample_artifact();
        second.accomplished_summary = "Finished the compactor.".into();

        let p1 = store.persist("default", &first).unwrap();
        let p2 = store.persist("default", &second).unwrap();
        assert!(p1.ends_with("handoff-001.json"));
        assert!(p2.ends_with("handoff-002.json"));

        // Latest wins; history is retained in order.
        let latest = store.load_latest("default").unwrap().unwrap();
        assert_eq!(latest.accomplished_summary, "Finished the compactor.");
        let all = store.list("default").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], first);
    }

    #[test]
    fn lineages_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path()).unwrap();
        store.persist("alpha", &sample_artifact()).unwrap();
        assert!(store.load_latest("beta").unwrap().is_none());
    }

    #[test]
    fn truncated_artifact_is_corrupt_not_partial() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path()).unwrap();
        let path = store.persist("default", &sample_artifact()).unwrap();

        // Truncate the file mid-document.
        let json = std::fs::read(&path).unwrap();
        std::fs::write(&path, &json[..json.len() / 2]).unwrap();

        let err = store.load_latest("default").unwrap_err();
        match err {
            TrackerError::HandoffCorrupt { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected HandoffCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn list_skips_malformed_history_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path()).unwrap();
        let first_path = store.persist("default", &sample_artifact()).unwrap();
        store.persist("default", &sample_artifact()).unwrap();

        std::fs::write(&first_path, "{not json").unwrap();
        let all = store.list("default").unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path()).unwrap();
        store.persist("default", &sample_artifact()).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("default"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn rendered_prompt_covers_every_section() {
        let prompt = sample_artifact().render_prompt();
        assert!(prompt.contains("# Session handoff — ss-handoff"));
        assert!(prompt.contains("## Accomplished"));
        assert!(prompt.contains("Implemented the ledger"));
        assert!(prompt.contains("## Next objectives"));
        assert!(prompt.contains("- X (~5000 tokens)"));
        assert!(prompt.contains("## Key decisions"));
        assert!(prompt.contains("rolling 5-hour window"));
    }
}
