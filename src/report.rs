//! Persisted artifacts and the machine-readable summary.
//!
//! Layout under `<output>/<target>/`:
//!
//! ```text
//! raw/<source>.txt        raw lines per source
//! subdomains.txt          every candidate
//! resolved.txt            names that resolved
//! live.txt                url status [title]
//! critical.txt            critical-pattern hits
//! results.json            attributed records
//! summary.json            run summary (schema: --generate-schema)
//! manual_commands.json    fallbacks for failed sources
//! manual_commands.sh      the same, as a runnable script
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregator::{CandidateRecord, RunReport};
use crate::concurrency::LimiterStats;
use crate::critical::CATALOGUE_VERSION;
use crate::deadline::CancelReason;
use crate::domain_utils::Target;
use crate::errors::{self, IoResultExt};
use crate::pipeline::{ValidationResult, ValidationStats};
use crate::progress::ProgressSnapshot;
use crate::sources::{ManualFallback, SourceReport};

pub const SUBDOMAINS_FILE: &str = "subdomains.txt";

/// Contents of `summary.json`.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub target: String,
    pub duration_seconds: f64,
    /// Candidates proposed by at least one discovery source.
    pub total_discovered: usize,
    /// Names that resolved.
    pub unique_validated: usize,
    pub critical_identified: usize,
    pub live_confirmed: usize,
    pub per_source_counts: BTreeMap<String, usize>,
    pub manual_fallback_commands: Vec<ManualFallback>,
    pub generated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub tool_version: String,
    pub catalogue_version: String,
    /// The run was cut short by the deadline or an interrupt.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_reason: Option<CancelReason>,
    pub probing_enabled: bool,
    pub rejected_candidates: BTreeMap<String, u64>,
    pub sources: Vec<SourceReport>,
    pub validation_stats: ValidationStats,
    pub concurrency: LimiterStats,
    pub phases: Vec<ProgressSnapshot>,
}

impl Summary {
    pub fn from_report(report: &RunReport) -> Self {
        let facts = &report.facts;
        Self {
            target: report.target.to_string(),
            duration_seconds: (facts.duration.as_millis() as f64) / 1000.0,
            total_discovered: report.total_discovered,
            unique_validated: report.resolved().count(),
            critical_identified: report.critical().count(),
            live_confirmed: report.live().count(),
            per_source_counts: report.per_source_counts.clone(),
            manual_fallback_commands: report.fallbacks.clone(),
            generated_at: Utc::now(),
            started_at: facts.started_at,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            catalogue_version: CATALOGUE_VERSION.to_string(),
            partial: facts.cancelled.is_some(),
            partial_reason: facts.cancelled,
            probing_enabled: facts.probing,
            rejected_candidates: report.rejections.clone(),
            sources: report.sources.clone(),
            validation_stats: report.stats(),
            concurrency: facts.concurrency.clone(),
            phases: facts.phases.clone(),
        }
    }

    /// JSON schema of `summary.json`.
    pub fn generate_json_schema() -> Result<String> {
        let schema = schemars::schema_for!(Summary);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// `results.json` document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultsDocument<'a> {
    target: &'a str,
    generated_at: DateTime<Utc>,
    candidates: &'a [CandidateRecord],
}

/// One `live.txt` line: `url status [title]`.
pub fn live_line(result: &ValidationResult) -> Option<String> {
    let status = result.http_status?;
    let url = result
        .url()
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://{}/", result.candidate));
    Some(match result.title.as_deref() {
        Some(title) => format!("{url} {status} [{title}]"),
        None => format!("{url} {status}"),
    })
}

/// Shell script reproducing every manual fallback.
pub fn manual_script(target: &Target, fallbacks: &[ManualFallback]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#!/bin/sh");
    let _ = writeln!(out, "# Manual fallback commands for {target}");
    if fallbacks.is_empty() {
        let _ = writeln!(out, "# Every source completed; nothing to re-run.");
    }
    for fb in fallbacks {
        let _ = writeln!(out);
        let _ = writeln!(out, "# {} ({})", fb.description, fb.reason.replace('\n', " "));
        let _ = writeln!(out, "{}", fb.command);
    }
    out
}

fn lines<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(item);
        out.push('\n');
    }
    out
}

/// Writes a [`RunReport`] into `<root>/<target>/`.
pub struct ReportWriter {
    dir: PathBuf,
    write_raw: bool,
}

impl ReportWriter {
    pub fn new(root: &Path, target: &Target, write_raw: bool) -> Self {
        Self {
            dir: target_dir(root, target),
            write_raw,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn put(&self, name: &str, contents: &str) -> errors::Result<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, contents).with_path(path.display().to_string(), "write")?;
        debug!(path = %path.display(), bytes = contents.len(), "wrote artifact");
        Ok(path)
    }

    /// Write every artifact; returns the summary that was persisted.
    pub fn write(&self, report: &RunReport) -> Result<Summary> {
        fs::create_dir_all(&self.dir).with_path(self.dir.display().to_string(), "create_dir")?;

        if self.write_raw && !report.raw.is_empty() {
            let raw_dir = self.dir.join("raw");
            fs::create_dir_all(&raw_dir).with_path(raw_dir.display().to_string(), "create_dir")?;
            for (source, raw) in &report.raw {
                self.put(
                    &format!("raw/{source}.txt"),
                    &lines(raw.iter().map(String::as_str)),
                )?;
            }
        }

        self.put(
            SUBDOMAINS_FILE,
            &lines(report.candidates.iter().map(|c| c.name.as_str())),
        )?;
        self.put(
            "resolved.txt",
            &lines(report.resolved().map(|r| r.candidate.as_str())),
        )?;
        let live: Vec<String> = report.live().filter_map(live_line).collect();
        self.put("live.txt", &lines(live.iter().map(String::as_str)))?;
        self.put(
            "critical.txt",
            &lines(report.critical().map(|r| r.candidate.as_str())),
        )?;

        let doc = ResultsDocument {
            target: report.target.as_str(),
            generated_at: Utc::now(),
            candidates: &report.candidates,
        };
        self.put("results.json", &serde_json::to_string_pretty(&doc)?)?;

        let summary = Summary::from_report(report);
        self.put("summary.json", &summary.to_json()?)?;

        self.put(
            "manual_commands.json",
            &serde_json::to_string_pretty(&report.fallbacks)?,
        )?;
        let script = self.put(
            "manual_commands.sh",
            &manual_script(&report.target, &report.fallbacks),
        )?;
        make_executable(&script)?;

        info!(dir = %self.dir.display(), "results written");
        Ok(summary)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> errors::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_path(path.display().to_string(), "chmod")
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> errors::Result<()> {
    Ok(())
}

pub fn target_dir(root: &Path, target: &Target) -> PathBuf {
    root.join(target.as_str())
}

/// Names from a previous run's `subdomains.txt`, if there is one.
pub fn read_previous(root: &Path, target: &Target) -> errors::Result<Vec<String>> {
    let path = target_dir(root, target).join(SUBDOMAINS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path).with_path(path.display().to_string(), "read")?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
