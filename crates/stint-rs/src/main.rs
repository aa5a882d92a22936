//! Track token budgets for a working session from the command line.
//!
//! All state lives under a single directory (default `.stint`): the quota
//! ledger shared across sessions, the current session's context state, and
//! the per-lineage handoff history.
//!
//! # Examples
//!
//! ```sh
//! # Record one token-consuming operation
//! stint record --amount 12000 --category file_read
//!
//! # Stream usage from an instrumentation hook (JSONL on stdin)
//! tail -f usage.jsonl | stint ingest
//!
//! # Composite status across both budgets
//! stint status
//! stint status --json
//!
//! # Reclaim context space (strategic is destructive and needs the ack)
//! stint compact --level soft
//! stint compact --level strategic --yes
//!
//! # End the session with a handoff, resume it in the next one
//! stint handoff --summary "Parser done" \
//!   --objective "Wire up the CLI=20000" --decision "Hand-rolled lexer"
//! stint resume
//! ```

use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process;
use stint_rs::context::generate_session_id;
use stint_rs::ledger::{JsonFileStore, LedgerStore, UsageLedger};
use stint_rs::prelude::*;
use tokio::io::AsyncBufReadExt;
use tracing::warn;

/// Track token budgets for a working session.
#[derive(Parser)]
#[command(name = "stint")]
struct Cli {
    /// Directory holding the ledger, session state, and handoffs.
    #[arg(long, default_value = ".stint")]
    state_dir: PathBuf,

    /// Rolling quota capacity in tokens.
    #[arg(long, default_value_t = 200_000)]
    quota_capacity: u64,

    /// Rolling quota window in hours.
    #[arg(long, default_value_t = 5)]
    quota_window_hours: i64,

    /// Context ceiling in tokens (a soft limit below the platform's hard
    /// window, to leave headroom).
    #[arg(long, default_value_t = 180_000)]
    context_capacity: u64,

    /// Session lineage the handoff history belongs to.
    #[arg(long, default_value = "default")]
    lineage: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one token-consuming operation.
    Record {
        /// Tokens consumed. Negative amounts are rejected and ignored.
        #[arg(long)]
        amount: i64,
        /// Category of the work (file_read, tool_result, decision, ...).
        #[arg(long)]
        category: String,
    },
    /// Read JSONL `{"amount": N, "category": "..."}` records from stdin.
    Ingest,
    /// Show the composite status across both budgets.
    Status {
        /// Emit machine-readable JSON instead of the human summary.
        #[arg(long)]
        json: bool,
    },
    /// Run a compaction pass against the current session.
    Compact {
        /// soft, strategic, or emergency.
        #[arg(long)]
        level: CompactionLevel,
        /// Confirmation ack required by the strategic level.
        #[arg(long)]
        yes: bool,
    },
    /// End the session: persist a handoff artifact for the successor.
    Handoff {
        /// What this session accomplished.
        #[arg(long)]
        summary: String,
        /// Next objective as "text=estimated_tokens". Repeatable.
        #[arg(long = "objective")]
        objectives: Vec<String>,
        /// A key decision worth carrying forward. Repeatable.
        #[arg(long = "decision")]
        decisions: Vec<String>,
    },
    /// Print the latest handoff as a bootstrap prompt.
    Resume {
        /// Proceed without context when the latest artifact is corrupt.
        #[arg(long)]
        ignore_corrupt: bool,
    },
}

// ── Usage ingestion boundary ───────────────────────────────────────

/// One line of the JSONL ingestion stream.
#[derive(Deserialize)]
struct UsageDelta {
    amount: i64,
    category: String,
}

// ── State directory plumbing ───────────────────────────────────────

struct StateDir {
    ledger: JsonFileStore,
    session_path: PathBuf,
    handoffs_root: PathBuf,
}

impl StateDir {
    fn new(root: &Path) -> Self {
        Self {
            ledger: JsonFileStore::new(root.join("quota-ledger.json")),
            session_path: root.join("session.json"),
            handoffs_root: root.join("handoffs"),
        }
    }

    fn load_session(&self) -> Result<ContextState, TrackerError> {
        if self.session_path.exists() {
            let json = std::fs::read_to_string(&self.session_path)?;
            Ok(serde_json::from_str(&json)?)
        } else {
            Ok(ContextState::new(generate_session_id(), Utc::now()))
        }
    }

    fn save_session(&self, state: &ContextState) -> Result<(), TrackerError> {
        if let Some(dir) = self.session_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.session_path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        std::fs::rename(&tmp, &self.session_path)?;
        Ok(())
    }

    /// Discard the session state (end of session).
    fn clear_session(&self) -> Result<(), TrackerError> {
        if self.session_path.exists() {
            std::fs::remove_file(&self.session_path)?;
        }
        Ok(())
    }
}

fn load_tracker(cli: &Cli, state: &StateDir) -> Result<SessionTracker, TrackerError> {
    let events = state.ledger.load()?;
    let quota = QuotaMonitor::with_ledger(
        QuotaConfig::new(
            cli.quota_capacity,
            TimeDelta::hours(cli.quota_window_hours),
        ),
        UsageLedger::from_events(events),
    );
    let context = ContextMonitor::with_state(
        ContextConfig::new(cli.context_capacity),
        state.load_session()?,
    );
    let tracker = SessionTracker::from_monitors(quota, context, CompactionPolicy::default())
        .with_sink(CompositeSink::new().with(LoggingSink).with(FnSink::new(
            |n: &Notification| {
                eprintln!("[{}] {}", n.severity, n.message);
            },
        )));
    Ok(tracker)
}

fn save_tracker(tracker: &SessionTracker, state: &StateDir) -> Result<(), TrackerError> {
    state.ledger.save(tracker.quota().ledger().events())?;
    state.save_session(tracker.context().usage())
}

/// Parse an `--objective "text=estimated_tokens"` argument. A missing or
/// unparsable estimate is 0, not an error.
fn parse_objective(raw: &str) -> Objective {
    match raw.rsplit_once('=') {
        Some((text, tokens)) => match tokens.trim().parse() {
            Ok(estimated_tokens) => Objective {
                text: text.trim().to_string(),
                estimated_tokens,
            },
            Err(_) => Objective {
                text: raw.trim().to_string(),
                estimated_tokens: 0,
            },
        },
        None => Objective {
            text: raw.trim().to_string(),
            estimated_tokens: 0,
        },
    }
}

// ── Commands ───────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<(), TrackerError> {
    let state = StateDir::new(&cli.state_dir);
    match &cli.command {
        Command::Record { amount, category } => {
            let mut tracker = load_tracker(&cli, &state)?;
            match tracker.record(*amount, category) {
                Ok(()) => {}
                // Rejected input is a logged no-op, not a failed run.
                Err(TrackerError::InvalidAmount { .. }) => {
                    eprintln!("ignored: negative amount {amount} for {category}");
                }
                Err(e) => return Err(e),
            }
            let status = tracker.status();
            save_tracker(&tracker, &state)?;
            println!("{}", status.quota.to_log_string());
            println!("{}", status.context.to_log_string());
        }

        Command::Ingest => {
            let mut tracker = load_tracker(&cli, &state)?;
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            let mut accepted: u64 = 0;
            let mut rejected: u64 = 0;
            while let Some(line) = lines.next_line().await? {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let delta: UsageDelta = match serde_json::from_str(&line) {
                    Ok(delta) => delta,
                    Err(e) => {
                        warn!("skipping malformed usage line: {e}");
                        rejected += 1;
                        continue;
                    }
                };
                match tracker.record(delta.amount, &delta.category) {
                    Ok(()) => accepted += 1,
                    Err(TrackerError::InvalidAmount { .. }) => rejected += 1,
                    Err(e) => return Err(e),
                }
            }
            save_tracker(&tracker, &state)?;
            println!("ingested {accepted} record(s), rejected {rejected}");
        }

        Command::Status { json } => {
            let mut tracker = load_tracker(&cli, &state)?;
            let now = Utc::now();
            let status = tracker.status_at(now);
            // Status can mutate state: a critical session with no handoff
            // auto-compacts during the pump.
            save_tracker(&tracker, &state)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", status.quota.to_log_string());
                println!("{}", status.context.to_log_string());
                println!("combined severity: {}", status.combined_severity);
                let rate = tracker.quota().burn_rate_at(now);
                if rate > 0.0 {
                    println!("burn rate: {rate:.0} tokens/min");
                }
                if let Some(at) = tracker.quota().projected_depletion_at(now) {
                    println!("projected quota depletion: {}", at.to_rfc3339());
                }
            }
        }

        Command::Compact { level, yes } => {
            let mut tracker = load_tracker(&cli, &state)?;
            let (plan, applied) = tracker.compact(*level, *yes);
            if applied {
                save_tracker(&tracker, &state)?;
                println!(
                    "compacted ({level}): saved {} tokens across {} item(s), {} preserved",
                    plan.tokens_saved,
                    plan.items_to_remove.len(),
                    plan.items_preserved,
                );
                println!("{}", tracker.status().context.to_log_string());
            } else {
                println!(
                    "refused: strategic compaction would remove {} tokens; \
                     re-run with --yes to confirm",
                    plan.tokens_saved,
                );
            }
        }

        Command::Handoff {
            summary,
            objectives,
            decisions,
        } => {
            let mut tracker = load_tracker(&cli, &state)?;
            let artifact = tracker.take_handoff(
                summary.clone(),
                objectives.iter().map(|o| parse_objective(o)).collect(),
                decisions.clone(),
            );
            let store = HandoffStore::new(&state.handoffs_root)?;
            let path = store.persist(&cli.lineage, &artifact)?;
            // The session ends here; its context state is not carried over.
            state.ledger.save(tracker.quota().ledger().events())?;
            state.clear_session()?;
            println!("handoff written to {}", path.display());
        }

        Command::Resume { ignore_corrupt } => {
            let store = HandoffStore::new(&state.handoffs_root)?;
            let artifact = match store.load_latest(&cli.lineage) {
                Ok(artifact) => artifact,
                Err(TrackerError::HandoffCorrupt { path, reason }) if *ignore_corrupt => {
                    warn!("proceeding without handoff: {} is corrupt ({reason})", path.display());
                    None
                }
                Err(e @ TrackerError::HandoffCorrupt { .. }) => {
                    eprintln!("{e}");
                    eprintln!("pass --ignore-corrupt to start without prior context");
                    process::exit(1);
                }
                Err(e) => return Err(e),
            };
            match artifact {
                Some(artifact) => print!("{}", artifact.render_prompt()),
                None => println!("no handoff found for lineage {:?}", cli.lineage),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stint=info,stint_rs=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
