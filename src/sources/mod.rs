//! Pluggable subdomain discovery sources.
//!
//! Every discovery technique implements the uniform [`SourceAdapter`] trait
//! so the engine can run them side by side:
//!   * active tools (`subfinder`, `amass`, ...) spawned as subprocesses
//!   * passive HTTP APIs (certificate transparency, passive DNS, archives)
//!   * wordlist / permutation DNS brute force
//!
//! An adapter only produces a lazy stream of raw names. The runner in this
//! module owns everything around it: preflight, the per-source timeout
//! budget, run cancellation, attribution, raw output capture and the manual
//! fallback entry written when a source does not finish cleanly.

pub mod active;
pub mod passive;
pub mod permutations;
pub mod wordlist;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::candidates::{CandidateSet, SourceId};
use crate::config::Config;
use crate::deadline::CancelFlag;
use crate::domain_utils::Target;
use crate::errors::{IoResultExt, Result, SweepError};
use crate::resolver::NameResolver;

pub use active::ActiveToolAdapter;
pub use passive::{PassiveApi, PassiveApiAdapter};
pub use wordlist::{WildcardFilter, WordlistBruteforceAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    ActiveTool,
    PassiveApi,
    WordlistBruteforce,
    /// Names fed back by the engine itself (resume file, redirect targets).
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// Static description of a source.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub kind: SourceKind,
    pub priority: Priority,
    pub timeout_budget: Duration,
}

impl SourceDescriptor {
    pub fn new(id: &str, kind: SourceKind, priority: Priority, timeout_budget: Duration) -> Self {
        Self {
            id: SourceId::new(id),
            kind,
            priority,
            timeout_budget,
        }
    }
}

/// Everything an adapter may use while running.
#[derive(Clone)]
pub struct SourceContext {
    pub target: Target,
    pub timeout_budget: Duration,
    pub resolver: Arc<dyn NameResolver>,
    pub http: reqwest::Client,
    pub wildcard: Arc<WildcardFilter>,
}

/// Lazy, finite stream of raw names. An `Err` item ends the source.
pub type NameStream = BoxStream<'static, Result<String>>;

/// Trait every discovery technique must implement.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Report `SourceUnavailable` before running (tool missing, empty wordlist).
    async fn preflight(&self) -> Result<()> {
        Ok(())
    }

    fn run(&self, ctx: SourceContext) -> NameStream;

    /// Shell command an operator can re-run by hand if this source fails.
    fn manual_command(&self, target: &Target) -> Option<String>;
}

/* -------------------------------------------------------------------------- */
/*                              Run bookkeeping                               */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SourceStatus {
    Completed,
    TimedOut,
    Unavailable,
    Failed,
    Cancelled,
}

/// Per-source outcome, reported in summary.json.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub id: String,
    pub kind: SourceKind,
    pub priority: Priority,
    pub status: SourceStatus,
    /// Lines produced by the source.
    pub emitted: u64,
    /// Lines that normalized to an in-scope name.
    pub accepted: u64,
    pub rejected: u64,
    /// Names this source was first to report.
    pub new_candidates: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Re-runnable command for an external operation that failed.
#[derive(Debug, Clone, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManualFallback {
    pub source: String,
    pub description: String,
    pub command: String,
    pub reason: String,
}

/// Everything one source run produced.
#[derive(Debug)]
pub struct SourceRun {
    pub report: SourceReport,
    pub raw: Vec<String>,
    pub fallback: Option<ManualFallback>,
}

/// Shared entry point into the candidate set; newly created names are
/// forwarded to the validation pipeline.
#[derive(Clone)]
pub struct Intake {
    set: Arc<CandidateSet>,
    new_names: Option<mpsc::UnboundedSender<String>>,
}

impl Intake {
    pub fn new(set: Arc<CandidateSet>, new_names: Option<mpsc::UnboundedSender<String>>) -> Self {
        Self { set, new_names }
    }

    pub fn set(&self) -> &Arc<CandidateSet> {
        &self.set
    }

    /// Ingest one raw name. Returns `Some(created)` when accepted.
    pub fn offer(&self, raw: &str, source: &SourceId) -> Option<bool> {
        let outcome = self.set.ingest(raw, source).ok()?;
        if outcome.created
            && let Some(tx) = &self.new_names
        {
            let _ = tx.send(outcome.name);
        }
        Some(outcome.created)
    }
}

fn describe(kind: SourceKind, id: &SourceId) -> String {
    match kind {
        SourceKind::ActiveTool => format!("Run {id} manually"),
        SourceKind::PassiveApi => format!("Query the {id} API manually"),
        SourceKind::WordlistBruteforce => format!("Re-run DNS brute force ({id})"),
        SourceKind::Internal => format!("Re-ingest {id} names"),
    }
}

/// Drive one adapter to completion under its budget and the run flag.
pub async fn run_source(
    adapter: Arc<dyn SourceAdapter>,
    ctx: SourceContext,
    intake: Intake,
    cancel: CancelFlag,
) -> SourceRun {
    let desc = adapter.descriptor().clone();
    let started = Instant::now();
    let mut report = SourceReport {
        id: desc.id.to_string(),
        kind: desc.kind,
        priority: desc.priority,
        status: SourceStatus::Completed,
        emitted: 0,
        accepted: 0,
        rejected: 0,
        new_candidates: 0,
        duration_ms: 0,
        error: None,
    };
    let mut raw = Vec::new();

    let failure: Option<(SourceStatus, SweepError)> = match adapter.preflight().await {
        Err(e) => Some((SourceStatus::Unavailable, e)),
        Ok(()) => {
            let budget = ctx.timeout_budget;
            let mut stream = adapter.run(ctx.clone());
            let timer = tokio::time::sleep(budget);
            tokio::pin!(timer);

            let end = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        break Some((
                            SourceStatus::Cancelled,
                            SweepError::source_failed(desc.id.as_str(), "run cancelled before completion"),
                        ));
                    }
                    _ = &mut timer => {
                        break Some((
                            SourceStatus::TimedOut,
                            SweepError::source_timeout(desc.id.as_str(), budget.as_secs()),
                        ));
                    }
                    item = stream.next() => match item {
                        Some(Ok(line)) => {
                            report.emitted += 1;
                            match intake.offer(&line, &desc.id) {
                                Some(created) => {
                                    report.accepted += 1;
                                    if created {
                                        report.new_candidates += 1;
                                    }
                                }
                                None => report.rejected += 1,
                            }
                            raw.push(line);
                        }
                        Some(Err(e)) => break Some((SourceStatus::Failed, e)),
                        None => break None,
                    }
                }
            };
            // Dropping the stream kills any child process.
            drop(stream);
            end
        }
    };

    report.duration_ms = started.elapsed().as_millis() as u64;
    let mut fallback = None;
    match failure {
        None => {
            info!(
                source = %desc.id,
                emitted = report.emitted,
                new = report.new_candidates,
                ms = report.duration_ms,
                "source completed"
            );
        }
        Some((status, err)) => {
            match status {
                SourceStatus::Unavailable | SourceStatus::Cancelled => {
                    debug!(source = %desc.id, error = %err, "source did not run to completion")
                }
                _ => warn!(source = %desc.id, error = %err, "source failed"),
            }
            report.status = status;
            report.error = Some(err.to_string());
            fallback = adapter
                .manual_command(&ctx.target)
                .map(|command| ManualFallback {
                    source: desc.id.to_string(),
                    description: describe(desc.kind, &desc.id),
                    command,
                    reason: err.to_string(),
                });
        }
    }

    SourceRun {
        report,
        raw,
        fallback,
    }
}

/* -------------------------------------------------------------------------- */
/*                               Source catalogue                             */
/* -------------------------------------------------------------------------- */

/// Build the first-wave adapters selected by configuration.
pub fn build_sources(config: &Config) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    let budget = |d: Duration| config.source_budget(d);

    if config.discovery.active {
        for tool in active::catalogue() {
            let d = tool.descriptor().timeout_budget;
            out.push(Arc::new(tool.with_budget(budget(d))));
        }
    }

    if config.discovery.passive {
        for api in PassiveApi::ALL {
            let adapter = PassiveApiAdapter::new(api, budget(api.default_budget()));
            out.push(Arc::new(adapter));
        }
    }

    if config.discovery.bruteforce {
        let words = match &config.discovery.wordlist {
            Some(path) => load_wordlist(path)?,
            None => wordlist::builtin_words(),
        };
        out.push(Arc::new(WordlistBruteforceAdapter::new(
            "bruteforce",
            words,
            config.discovery.bruteforce_concurrency,
            budget(wordlist::DEFAULT_BUDGET),
        )));
    }

    Ok(out)
}

/// Read a wordlist: one label per line, `#` comments and blanks skipped.
pub fn load_wordlist(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).with_path(path.display().to_string(), "read wordlist")?;
    Ok(parse_wordlist(&content))
}

pub fn parse_wordlist(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    content
        .lines()
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| seen.insert(l.clone()))
        .collect()
}
