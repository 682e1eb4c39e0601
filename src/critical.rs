//! Mandatory final pass over high-value names.
//!
//! Every catalogue entry is validated against the target whether or not a
//! discovery source reported it. Entries that resolve are merged into the
//! candidate set (without attribution) and flagged critical; the rest are
//! dropped. Under a wildcard zone, entries answering only with wildcard
//! addresses are dropped as well.

use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::candidates::CandidateSet;
use crate::deadline::CancelFlag;
use crate::domain_utils::{Target, is_valid_label};
use crate::pipeline::{Batch, Pipeline, ValidationResult};
use crate::progress::{Phase, ProgressHandle};
use crate::sources::wordlist::is_wildcard_hit;

/// Bumped whenever the built-in lists below change.
pub const CATALOGUE_VERSION: &str = "1.0.0";

const BASE_LABELS: &[&str] = &[
    // applications and environments
    "app", "application", "apps", "staging", "stage", "stg", "prod", "production", "live", "dev",
    "development", "test", "testing", "qa", "uat", "demo", "beta", "alpha", "preview",
    // APIs
    "api", "api-v1", "api-v2", "api-v3", "api-v4", "apiv1", "apiv2", "apiv3", "apiv4", "rest",
    "restapi", "graphql", "grpc", "soap", "rpc", "webhook", "webhooks",
    // administration and access
    "admin", "administrator", "panel", "dashboard", "control", "manage", "management", "portal",
    "gateway", "secure", "security", "auth", "authentication", "login", "signin",
];

const NUMERIC_SUFFIXES: &[&str] = &["1", "2", "01"];

const ENV_SUFFIXES: &[&str] = &["-dev", "-staging", "-test", "-prod"];

fn owned(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

/// Ordered base labels times optional suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalPatternCatalogue {
    bases: Vec<String>,
    numeric_suffixes: Vec<String>,
    env_suffixes: Vec<String>,
}

impl Default for CriticalPatternCatalogue {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CriticalPatternCatalogue {
    pub fn builtin() -> Self {
        Self {
            bases: owned(BASE_LABELS),
            numeric_suffixes: owned(NUMERIC_SUFFIXES),
            env_suffixes: owned(ENV_SUFFIXES),
        }
    }

    /// A catalogue of bare labels with no suffix expansion.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bases: labels.into_iter().map(Into::into).collect(),
            numeric_suffixes: Vec::new(),
            env_suffixes: Vec::new(),
        }
    }

    /// Fully qualified names to test, in catalogue order, without duplicates.
    pub fn expand(&self, target: &Target) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for base in &self.bases {
            let variants = std::iter::once(base.clone())
                .chain(self.numeric_suffixes.iter().map(|s| format!("{base}{s}")))
                .chain(self.env_suffixes.iter().map(|s| format!("{base}{s}")));
            for label in variants {
                if !label.split('.').all(is_valid_label) {
                    continue;
                }
                let name = target.child(&label);
                if seen.insert(name.clone()) {
                    out.push(name);
                }
            }
        }
        out
    }
}

/// Outcome of the critical pass.
#[derive(Debug, Default)]
pub struct CriticalPass {
    /// Resolving entries only, each flagged critical.
    pub hits: Vec<ValidationResult>,
    pub tested: usize,
    pub cancelled: bool,
}

/// Validate every catalogue entry and merge resolving ones into `set`.
///
/// `wildcard` is the target's wildcard fingerprint, if any.
pub async fn run_critical_pass(
    catalogue: &CriticalPatternCatalogue,
    pipeline: Arc<Pipeline>,
    set: &CandidateSet,
    wildcard: Option<&BTreeSet<IpAddr>>,
    progress: ProgressHandle,
    cancel: CancelFlag,
) -> CriticalPass {
    let names = catalogue.expand(set.target());
    let tested = names.len();
    info!(entries = tested, version = CATALOGUE_VERSION, "critical pass started");

    let Batch { results, cancelled } = pipeline
        .run_batch(names, true, Phase::Critical, progress, cancel)
        .await;
    let completed = results.len();

    let resolved = results.iter().filter(|r| r.resolved).count();
    let mut hits: Vec<_> = results
        .into_iter()
        .filter(|r| r.resolved && !is_wildcard_hit(&r.addresses, wildcard))
        .collect();
    if hits.len() < resolved {
        debug!(suppressed = resolved - hits.len(), "wildcard answers dropped from critical pass");
    }
    hits.retain(|r| set.insert_unattributed(&r.candidate).is_ok());
    hits.sort_by(|a, b| a.candidate.cmp(&b.candidate));

    info!(
        tested,
        completed,
        hits = hits.len(),
        cancelled,
        "critical pass finished"
    );
    CriticalPass {
        hits,
        tested,
        cancelled,
    }
}
