/*!
DNS resolution for candidate validation.

This module centralizes:
- the `NameResolver` seam used by the pipeline, the wordlist adapter and the
  critical pass
- a trust-dns-resolver backed implementation (A/AAAA with CNAME capture)
- a moka-backed caching layer so each name is answered once per run
- an in-memory zone for offline runs and tests

Failures are classified so callers can tell a permanent NXDOMAIN from a
transient timeout / SERVFAIL that is worth retrying.
*/

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use thiserror::Error;
use tracing::{debug, warn};
use trust_dns_resolver::{
    TokioAsyncResolver,
    config::{LookupIpStrategy, ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::{op::ResponseCode, rr::RData},
};

use crate::retry::Transient;

/// Positive DNS answer for one name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsAnswer {
    pub addresses: BTreeSet<IpAddr>,
    /// CNAME chain in answer order, without trailing dots.
    pub cnames: Vec<String>,
}

/// Why a lookup produced no addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveFailure {
    #[error("NXDOMAIN")]
    NxDomain,
    #[error("no A/AAAA records")]
    NoRecords,
    #[error("timeout")]
    Timeout,
    #[error("SERVFAIL")]
    ServFail,
    #[error("{0}")]
    Other(String),
}

impl ResolveFailure {
    /// Short label used in results and statistics.
    pub fn label(&self) -> &'static str {
        match self {
            ResolveFailure::NxDomain => "nxdomain",
            ResolveFailure::NoRecords => "no-records",
            ResolveFailure::Timeout => "timeout",
            ResolveFailure::ServFail => "servfail",
            ResolveFailure::Other(_) => "error",
        }
    }
}

impl Transient for ResolveFailure {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ResolveFailure::Timeout | ResolveFailure::ServFail | ResolveFailure::Other(_)
        )
    }
}

impl From<&ResolveError> for ResolveFailure {
    fn from(err: &ResolveError) -> Self {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
                ResponseCode::NXDomain => ResolveFailure::NxDomain,
                ResponseCode::ServFail => ResolveFailure::ServFail,
                _ => ResolveFailure::NoRecords,
            },
            ResolveErrorKind::Timeout => ResolveFailure::Timeout,
            _ => ResolveFailure::Other(err.to_string()),
        }
    }
}

/// Anything that can turn a host name into addresses.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<DnsAnswer, ResolveFailure>;
}

/// Resolver backed by trust-dns, using the system configuration when readable.
pub struct TrustDnsResolver {
    inner: TokioAsyncResolver,
}

impl TrustDnsResolver {
    /// Build a resolver with a per-query timeout. Retries are left to the
    /// pipeline so that attempts can be counted.
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "could not read system resolver config, using public resolvers");
                (ResolverConfig::cloudflare(), ResolverOpts::default())
            }
        };
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.ndots = 0;
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        opts.cache_size = 0;
        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl NameResolver for TrustDnsResolver {
    async fn lookup(&self, name: &str) -> Result<DnsAnswer, ResolveFailure> {
        let fqdn = format!("{}.", name.trim_end_matches('.'));
        match self.inner.lookup_ip(fqdn.as_str()).await {
            Ok(lookup) => {
                let addresses: BTreeSet<IpAddr> = lookup.iter().collect();
                let cnames = lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .filter_map(|r| match r.data() {
                        Some(RData::CNAME(c)) => {
                            Some(c.0.to_utf8().trim_end_matches('.').to_string())
                        }
                        _ => None,
                    })
                    .collect();
                if addresses.is_empty() {
                    return Err(ResolveFailure::NoRecords);
                }
                Ok(DnsAnswer { addresses, cnames })
            }
            Err(e) => {
                let failure = ResolveFailure::from(&e);
                debug!(name, failure = failure.label(), "lookup failed");
                Err(failure)
            }
        }
    }
}

/// Caches final answers (including NXDOMAIN) for the lifetime of a run.
///
/// Concurrent lookups of one name share a single upstream query. Transient
/// failures are handed to every waiter but never cached.
pub struct CachingResolver {
    inner: Arc<dyn NameResolver>,
    cache: Cache<String, Result<DnsAnswer, ResolveFailure>>,
}

impl CachingResolver {
    pub fn new(inner: Arc<dyn NameResolver>, capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::builder().max_capacity(capacity).build(),
        }
    }
}

#[async_trait]
impl NameResolver for CachingResolver {
    async fn lookup(&self, name: &str) -> Result<DnsAnswer, ResolveFailure> {
        let settled = self
            .cache
            .try_get_with(name.to_string(), async {
                match self.inner.lookup(name).await {
                    Err(f) if f.is_transient() => Err(f),
                    outcome => Ok(outcome),
                }
            })
            .await;
        match settled {
            Ok(outcome) => outcome,
            Err(transient) => Err(ResolveFailure::clone(&transient)),
        }
    }
}

/// In-memory zone: fixed records, optional wildcard and artificial latency.
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<IpAddr>>,
    cnames: HashMap<String, Vec<String>>,
    failures: HashMap<String, ResolveFailure>,
    wildcard: Option<(String, Vec<IpAddr>)>,
    latency: Duration,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, name: &str, addrs: &[IpAddr]) -> Self {
        self.records.insert(name.to_string(), addrs.to_vec());
        self
    }

    pub fn with_cname(mut self, name: &str, chain: &[&str]) -> Self {
        self.cnames
            .insert(name.to_string(), chain.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Every name without an explicit record under `suffix` answers with `addrs`.
    pub fn with_wildcard(mut self, suffix: &str, addrs: &[IpAddr]) -> Self {
        self.wildcard = Some((suffix.to_string(), addrs.to_vec()));
        self
    }

    /// Force a specific failure for `name`.
    pub fn with_failure(mut self, name: &str, failure: ResolveFailure) -> Self {
        self.failures.insert(name.to_string(), failure);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn lookup(&self, name: &str) -> Result<DnsAnswer, ResolveFailure> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(f) = self.failures.get(name) {
            return Err(f.clone());
        }
        let addrs = match self.records.get(name) {
            Some(a) => a.clone(),
            None => match &self.wildcard {
                Some((suffix, a)) if name.ends_with(&format!(".{suffix}")) => a.clone(),
                _ => return Err(ResolveFailure::NxDomain),
            },
        };
        Ok(DnsAnswer {
            addresses: addrs.into_iter().collect(),
            cnames: self.cnames.get(name).cloned().unwrap_or_default(),
        })
    }
}
