//! Resolution and probing of candidates.
//!
//! `validate` is one unit of work: DNS (retried on transient failure), then an
//! optional HTTP probe. The bulk driver fans units out on a `JoinSet`, each
//! holding a permit from the [`AdaptiveLimiter`], and keeps accepting new
//! names from discovery until the channel closes or the run is cancelled.

use std::collections::{BTreeSet, VecDeque};
use std::fmt::Display;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::candidates::{CandidateSet, SourceId};
use crate::concurrency::AdaptiveLimiter;
use crate::deadline::CancelFlag;
use crate::domain_utils::extract_host;
use crate::probe::{HttpProber, ProbeError};
use crate::progress::{Phase, ProgressHandle};
use crate::resolver::{NameResolver, ResolveFailure};
use crate::retry::{DnsRetryPolicy, RetryConfig, RetryExecutor, Transient};

/// Source id given to in-scope hosts first seen in a redirect chain.
pub const REDIRECT_SOURCE: &str = "redirect";

fn display_opt<T: Display, S: Serializer>(value: &Option<T>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => s.collect_str(v),
        None => s.serialize_none(),
    }
}

/// Outcome of validating one candidate. Immutable once built.
#[derive(Debug, Clone, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub candidate: String,
    pub resolved: bool,
    pub addresses: BTreeSet<IpAddr>,
    pub cnames: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub redirect_chain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub is_live: bool,
    pub is_critical: bool,
    pub dns_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display_opt")]
    #[schemars(with = "Option<String>")]
    pub dns_error: Option<ResolveFailure>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display_opt")]
    #[schemars(with = "Option<String>")]
    pub probe_error: Option<ProbeError>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    /// URL used in `live.txt`: the last URL reached, else the first tried.
    pub fn url(&self) -> Option<&str> {
        self.final_url
            .as_deref()
            .or_else(|| self.redirect_chain.first().map(String::as_str))
    }

    fn transient_dns_failure(&self) -> bool {
        self.dns_error.as_ref().is_some_and(|e| e.is_transient())
    }
}

/// Aggregate validation counters for the summary.
#[derive(Debug, Clone, Default, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStats {
    pub resolved: u64,
    /// Permanent negatives: NXDOMAIN or no address records.
    pub nxdomain: u64,
    /// Transient failures that survived every retry.
    pub dns_failures: u64,
    pub probe_timeouts: u64,
    pub probe_errors: u64,
    pub live: u64,
}

impl ValidationStats {
    pub fn record(&mut self, r: &ValidationResult) {
        if r.resolved {
            self.resolved += 1;
        }
        match &r.dns_error {
            Some(ResolveFailure::NxDomain | ResolveFailure::NoRecords) => self.nxdomain += 1,
            Some(_) => self.dns_failures += 1,
            None => {}
        }
        match &r.probe_error {
            Some(ProbeError::Timeout) => self.probe_timeouts += 1,
            Some(ProbeError::Request(_)) => self.probe_errors += 1,
            None => {}
        }
        if r.is_live {
            self.live += 1;
        }
    }

    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ValidationResult>) -> Self {
        let mut stats = Self::default();
        for r in results {
            stats.record(r);
        }
        stats
    }
}

/// Results of one driven batch.
#[derive(Debug, Default)]
pub struct Batch {
    pub results: Vec<ValidationResult>,
    /// The run flag fired before every scheduled unit finished.
    pub cancelled: bool,
}

/// Shared validation machinery: resolver, optional prober, retry and gate.
pub struct Pipeline {
    resolver: Arc<dyn NameResolver>,
    prober: Option<Arc<dyn HttpProber>>,
    retry: RetryExecutor,
    limiter: Arc<AdaptiveLimiter>,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn NameResolver>,
        prober: Option<Arc<dyn HttpProber>>,
        retry: RetryConfig,
        limiter: Arc<AdaptiveLimiter>,
    ) -> Self {
        Self {
            resolver,
            prober,
            retry: RetryExecutor::new(retry),
            limiter,
        }
    }

    pub fn limiter(&self) -> &Arc<AdaptiveLimiter> {
        &self.limiter
    }

    pub fn probing(&self) -> bool {
        self.prober.is_some()
    }

    /// Resolve, then probe if the name resolved. Not gated.
    pub async fn validate(&self, name: &str, critical: bool) -> ValidationResult {
        let resolver = &self.resolver;
        let dns = self
            .retry
            .execute_counted(|| resolver.lookup(name), DnsRetryPolicy)
            .await;

        let mut result = ValidationResult {
            candidate: name.to_string(),
            resolved: false,
            addresses: BTreeSet::new(),
            cnames: Vec::new(),
            http_status: None,
            title: None,
            redirect_chain: Vec::new(),
            final_url: None,
            is_live: false,
            is_critical: critical,
            dns_attempts: dns.attempts,
            dns_error: None,
            probe_error: None,
            validated_at: Utc::now(),
        };

        match dns.result {
            Ok(answer) => {
                result.resolved = !answer.addresses.is_empty();
                result.addresses = answer.addresses;
                result.cnames = answer.cnames;
                if !result.resolved {
                    result.dns_error = Some(ResolveFailure::NoRecords);
                }
            }
            Err(failure) => {
                trace!(name, attempts = dns.attempts, error = %failure, "unresolved");
                result.dns_error = Some(failure);
            }
        }

        if result.resolved
            && let Some(prober) = &self.prober
        {
            let outcome = prober.probe(name).await;
            result.http_status = outcome.status;
            result.title = outcome.title;
            result.redirect_chain = outcome.redirect_chain;
            result.final_url = outcome.final_url;
            result.probe_error = outcome.error;
        }

        result.is_live = result.resolved && result.http_status.is_some();
        result.validated_at = Utc::now();
        result
    }

    /// Validate names arriving on `incoming` until it closes. In-scope hosts
    /// found in redirect chains are added to `set` and validated too.
    pub async fn run_bulk(
        self: Arc<Self>,
        incoming: mpsc::UnboundedReceiver<String>,
        set: Arc<CandidateSet>,
        progress: ProgressHandle,
        cancel: CancelFlag,
    ) -> Batch {
        self.drive(
            Some(incoming),
            Vec::new(),
            Some(set),
            false,
            Phase::Validation,
            progress,
            cancel,
        )
        .await
    }

    /// Validate a fixed list of names.
    pub async fn run_batch(
        self: Arc<Self>,
        names: Vec<String>,
        critical: bool,
        phase: Phase,
        progress: ProgressHandle,
        cancel: CancelFlag,
    ) -> Batch {
        self.drive(None, names, None, critical, phase, progress, cancel)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        self: Arc<Self>,
        mut incoming: Option<mpsc::UnboundedReceiver<String>>,
        initial: Vec<String>,
        feedback: Option<Arc<CandidateSet>>,
        critical: bool,
        phase: Phase,
        progress: ProgressHandle,
        cancel: CancelFlag,
    ) -> Batch {
        let redirect = SourceId::new(REDIRECT_SOURCE);
        let mut pending: VecDeque<String> = initial.into();
        progress.add_total(phase, pending.len() as u64);

        let mut tasks: JoinSet<ValidationResult> = JoinSet::new();
        let mut batch = Batch::default();

        loop {
            if incoming.is_none() && pending.is_empty() && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    let dropped = pending.len() + tasks.len();
                    tasks.abort_all();
                    debug!(phase = phase.as_str(), dropped, "validation cancelled");
                    batch.cancelled = true;
                    break;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    progress.advance(phase, 1);
                    let result = match joined {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "validation task failed");
                            continue;
                        }
                    };
                    if let Some(set) = &feedback {
                        let hosts = result
                            .redirect_chain
                            .iter()
                            .chain(result.final_url.iter())
                            .filter_map(|u| extract_host(u));
                        for host in hosts {
                            if let Ok(outcome) = set.ingest(&host, &redirect)
                                && outcome.created
                            {
                                debug!(name = %outcome.name, from = %result.candidate, "redirect target scheduled");
                                progress.add_total(phase, 1);
                                pending.push_back(outcome.name);
                            }
                        }
                    }
                    batch.results.push(result);
                }

                name = recv(&mut incoming), if incoming.is_some() => match name {
                    Some(name) => {
                        progress.add_total(phase, 1);
                        pending.push_back(name);
                    }
                    None => incoming = None,
                },

                permit = self.limiter.acquire(), if !pending.is_empty() => {
                    let Some(name) = pending.pop_front() else {
                        drop(permit);
                        continue;
                    };
                    let this = Arc::clone(&self);
                    tasks.spawn(async move {
                        let result = this.validate(&name, critical).await;
                        permit.complete(result.transient_dns_failure());
                        result
                    });
                }
            }
        }

        batch
    }
}

async fn recv(rx: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyConfig;
    use crate::domain_utils::Target;
    use crate::probe::{ProbeOutcome, StaticProber};
    use crate::resolver::StaticResolver;
    use crate::retry::RetryConfigBuilder;
    use std::time::Duration;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfigBuilder::new()
            .max_attempts(2)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter(false)
            .build()
    }

    fn limiter(initial: usize, ceiling: usize) -> Arc<AdaptiveLimiter> {
        AdaptiveLimiter::new(ConcurrencyConfig {
            initial,
            floor: 1,
            ceiling,
            ..ConcurrencyConfig::default()
        })
    }

    fn pipeline(resolver: StaticResolver, prober: Option<StaticProber>) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::new(resolver),
            prober.map(|p| Arc::new(p) as Arc<dyn HttpProber>),
            fast_retry(),
            limiter(4, 8),
        ))
    }

    #[tokio::test]
    async fn resolved_and_probed_is_live() {
        let p = pipeline(
            StaticResolver::new()
                .with_record("api.example.com", &[ip("10.0.0.1")])
                .with_cname("api.example.com", &["edge.cdn.net"]),
            Some(StaticProber::new().with_response("api.example.com", 200, Some("API"))),
        );
        let r = p.validate("api.example.com", false).await;
        assert!(r.resolved && r.is_live && !r.is_critical);
        assert_eq!(r.http_status, Some(200));
        assert_eq!(r.title.as_deref(), Some("API"));
        assert_eq!(r.cnames, vec!["edge.cdn.net"]);
        assert_eq!(r.dns_attempts, 1);
    }

    #[tokio::test]
    async fn nxdomain_is_not_retried_and_transient_is() {
        let p = pipeline(
            StaticResolver::new().with_failure("flaky.example.com", ResolveFailure::Timeout),
            None,
        );
        let nx = p.validate("gone.example.com", false).await;
        assert!(!nx.resolved && !nx.is_live);
        assert_eq!(nx.dns_error, Some(ResolveFailure::NxDomain));
        assert_eq!(nx.dns_attempts, 1);

        let flaky = p.validate("flaky.example.com", false).await;
        assert_eq!(flaky.dns_error, Some(ResolveFailure::Timeout));
        assert_eq!(flaky.dns_attempts, 3);
        assert!(flaky.transient_dns_failure());
    }

    #[tokio::test]
    async fn probe_failure_is_resolved_but_not_live() {
        let p = pipeline(
            StaticResolver::new().with_record("mail.example.com", &[ip("10.0.0.2")]),
            Some(StaticProber::new().with_outcome(
                "mail.example.com",
                ProbeOutcome::failed(ProbeError::Timeout),
            )),
        );
        let r = p.validate("mail.example.com", false).await;
        assert!(r.resolved && !r.is_live);
        let stats = ValidationStats::from_results([&r]);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.probe_timeouts, 1);
        assert_eq!(stats.live, 0);
    }

    #[tokio::test]
    async fn bulk_drains_channel_and_follows_redirects() {
        let target = Target::parse("example.com").unwrap();
        let set = Arc::new(CandidateSet::new(target));
        let redirecting = ProbeOutcome {
            status: Some(200),
            title: None,
            redirect_chain: vec![
                "https://www.example.com/".into(),
                "https://login.example.com/sso".into(),
                "https://idp.other.net/".into(),
            ],
            final_url: Some("https://idp.other.net/".into()),
            error: None,
        };
        let p = pipeline(
            StaticResolver::new()
                .with_record("www.example.com", &[ip("10.0.0.1")])
                .with_record("login.example.com", &[ip("10.0.0.3")]),
            Some(StaticProber::new()
                .with_outcome("www.example.com", redirecting)
                .with_response("login.example.com", 200, Some("Sign in"))),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        for n in ["www.example.com", "dead.example.com"] {
            set.ingest(n, &SourceId::new("scripted")).unwrap();
            tx.send(n.to_string()).unwrap();
        }
        drop(tx);

        let batch = p
            .run_bulk(rx, Arc::clone(&set), ProgressHandle::disabled(), CancelFlag::never())
            .await;
        assert!(!batch.cancelled);
        let mut names: Vec<_> = batch.results.iter().map(|r| r.candidate.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["dead.example.com", "login.example.com", "www.example.com"]);
        let login = set.get("login.example.com").unwrap();
        assert!(login.sources.contains(&SourceId::new(REDIRECT_SOURCE)));
        assert!(!set.contains("idp.other.net"));
    }

    #[tokio::test]
    async fn batch_never_exceeds_limit() {
        let mut resolver = StaticResolver::new().with_latency(Duration::from_millis(5));
        let names: Vec<String> = (0..40).map(|i| format!("h{i}.example.com")).collect();
        for n in &names {
            resolver = resolver.with_record(n, &[ip("10.1.1.1")]);
        }
        let lim = limiter(3, 3);
        let p = Arc::new(Pipeline::new(Arc::new(resolver), None, fast_retry(), Arc::clone(&lim)));
        let batch = p
            .run_batch(names, true, Phase::Critical, ProgressHandle::disabled(), CancelFlag::never())
            .await;
        assert_eq!(batch.results.len(), 40);
        assert!(batch.results.iter().all(|r| r.is_critical && r.resolved));
        assert!(lim.stats().peak_in_flight <= 3);
        assert_eq!(lim.in_flight(), 0);
    }
}
