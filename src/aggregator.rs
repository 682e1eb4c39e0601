//! Final assembly of everything a run produced.
//!
//! The aggregator is the only owner of validation results. Bulk results are
//! recorded as they arrive; a critical hit for the same name replaces the
//! bulk entry. `finish` joins results with candidate attribution once every
//! phase has stopped.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;

use crate::candidates::CandidateSet;
use crate::concurrency::LimiterStats;
use crate::deadline::CancelReason;
use crate::domain_utils::Target;
use crate::pipeline::{ValidationResult, ValidationStats};
use crate::progress::ProgressSnapshot;
use crate::sources::{ManualFallback, SourceReport, SourceRun};

/// One candidate with its attribution and, if it got that far, its
/// validation outcome.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub name: String,
    pub sources: Vec<String>,
    pub first_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: BTreeMap<String, ValidationResult>,
    sources: Vec<SourceReport>,
    raw: BTreeMap<String, Vec<String>>,
    fallbacks: Vec<ManualFallback>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_source(&mut self, run: SourceRun) {
        let id = run.report.id.clone();
        if !run.raw.is_empty() {
            self.raw.entry(id).or_default().extend(run.raw);
        }
        if let Some(fb) = run.fallback {
            self.fallbacks.push(fb);
        }
        self.sources.push(run.report);
    }

    /// Bulk result; never overrides a critical one.
    pub fn record_validation(&mut self, result: ValidationResult) {
        match self.results.get(&result.candidate) {
            Some(existing) if existing.is_critical => {}
            _ => {
                self.results.insert(result.candidate.clone(), result);
            }
        }
    }

    /// Critical hit; replaces whatever was recorded for the name.
    pub fn record_critical(&mut self, result: ValidationResult) {
        debug_assert!(result.is_critical);
        self.results.insert(result.candidate.clone(), result);
    }

    pub fn result(&self, name: &str) -> Option<&ValidationResult> {
        self.results.get(name)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn finish(self, set: &CandidateSet, run: RunFacts) -> RunReport {
        let candidates: Vec<CandidateRecord> = set
            .snapshot()
            .into_iter()
            .map(|c| CandidateRecord {
                validation: self.results.get(&c.name).cloned(),
                sources: c.sources.iter().map(|s| s.to_string()).collect(),
                first_seen: c.first_seen,
                name: c.name,
            })
            .collect();

        let mut sources = self.sources;
        sources.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        let mut fallbacks = self.fallbacks;
        fallbacks.sort_by(|a, b| a.source.cmp(&b.source));

        RunReport {
            target: set.target().clone(),
            total_discovered: set.attributed_len(),
            per_source_counts: set.per_source_counts(),
            rejections: set.rejections(),
            candidates,
            results: self.results.into_values().collect(),
            sources,
            raw: self.raw,
            fallbacks,
            facts: run,
        }
    }
}

/// Run-level facts the aggregator does not observe itself.
#[derive(Debug, Clone)]
pub struct RunFacts {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub cancelled: Option<CancelReason>,
    pub concurrency: LimiterStats,
    pub phases: Vec<ProgressSnapshot>,
    pub probing: bool,
}

/// Everything persisted at the end of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub target: Target,
    /// Candidates proposed by at least one source.
    pub total_discovered: usize,
    pub per_source_counts: BTreeMap<String, usize>,
    pub rejections: BTreeMap<String, u64>,
    /// Every candidate, sorted by name.
    pub candidates: Vec<CandidateRecord>,
    /// Validation results, sorted by name.
    pub results: Vec<ValidationResult>,
    pub sources: Vec<SourceReport>,
    pub raw: BTreeMap<String, Vec<String>>,
    pub fallbacks: Vec<ManualFallback>,
    pub facts: RunFacts,
}

impl RunReport {
    pub fn is_partial(&self) -> bool {
        self.facts.cancelled.is_some()
    }

    pub fn resolved(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.resolved)
    }

    pub fn live(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_live)
    }

    pub fn critical(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_critical)
    }

    pub fn stats(&self) -> ValidationStats {
        ValidationStats::from_results(&self.results)
    }
}
