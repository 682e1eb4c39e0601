//! DNS brute force over a wordlist, with wildcard suppression.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{NameStream, Priority, SourceAdapter, SourceContext, SourceDescriptor, SourceKind};
use crate::domain_utils::{Target, is_valid_label};
use crate::errors::{Result, SweepError};
use crate::resolver::NameResolver;

pub const DEFAULT_BUDGET: Duration = Duration::from_secs(600);

/// Number of random labels probed to fingerprint a wildcard zone.
const WILDCARD_PROBES: usize = 2;

const BUILTIN: &[&str] = &[
    // infrastructure
    "www", "mail", "email", "smtp", "pop", "imap", "mx", "mx1", "mx2", "exchange", "webmail",
    "ftp", "sftp", "files", "upload", "download", "cdn", "static", "assets", "media", "img",
    "vpn", "remote", "proxy", "gateway", "firewall", "lb", "ns", "ns1", "ns2", "ns3", "dns",
    "db", "database", "mysql", "postgres", "mongo", "redis", "cache", "elastic",
    // cloud / delivery
    "aws", "azure", "gcp", "cloud", "k8s", "kubernetes", "docker", "registry", "rancher",
    "jenkins", "ci", "cd", "build", "deploy", "gitlab", "github", "git", "sonar", "nexus",
    "prometheus", "grafana", "kibana", "elasticsearch", "logstash", "splunk", "monitor", "status",
    // business
    "sales", "marketing", "support", "help", "helpdesk", "service", "customer", "crm", "erp",
    "billing", "payment", "pay", "shop", "store", "cart", "checkout", "blog", "news", "press",
    "community", "forum", "chat", "docs", "wiki", "kb", "faq", "careers", "jobs", "hr",
    "intranet", "extranet", "internal", "corp", "sso", "id", "accounts", "account", "my",
    "m", "mobile", "web", "www2", "old", "new", "legacy", "backup", "archive", "origin",
    // geographic
    "us", "eu", "asia", "uk", "de", "fr", "jp", "au", "ca", "east", "west", "global",
];

pub fn builtin_words() -> Vec<String> {
    BUILTIN.iter().map(|w| w.to_string()).collect()
}

/// Resolves `<word>.<target>` for every word; only resolving names are emitted.
pub struct WordlistBruteforceAdapter {
    descriptor: SourceDescriptor,
    words: Arc<Vec<String>>,
    concurrency: usize,
}

impl WordlistBruteforceAdapter {
    pub fn new(id: &str, words: Vec<String>, concurrency: usize, budget: Duration) -> Self {
        let words: Vec<String> = words
            .into_iter()
            .filter(|w| w.split('.').all(is_valid_label))
            .collect();
        Self {
            descriptor: SourceDescriptor::new(
                id,
                SourceKind::WordlistBruteforce,
                Priority::Medium,
                budget,
            ),
            words: Arc::new(words),
            concurrency: concurrency.max(1),
        }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

fn random_label() -> String {
    let mut rng = rand::rng();
    let suffix: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("zz{suffix}")
}

/// Addresses answered for random labels, or `None` when the zone has no wildcard.
pub async fn detect_wildcard(resolver: &dyn NameResolver, target: &Target) -> Option<BTreeSet<IpAddr>> {
    let mut addrs = BTreeSet::new();
    for _ in 0..WILDCARD_PROBES {
        if let Ok(answer) = resolver.lookup(&target.child(&random_label())).await {
            addrs.extend(answer.addresses);
        }
    }
    if addrs.is_empty() {
        None
    } else {
        info!(domain = %target, addresses = addrs.len(), "wildcard DNS detected");
        Some(addrs)
    }
}

/// A hit whose every address belongs to the wildcard set is noise.
pub fn is_wildcard_hit(addresses: &BTreeSet<IpAddr>, wildcard: Option<&BTreeSet<IpAddr>>) -> bool {
    match wildcard {
        Some(w) => !addresses.is_empty() && addresses.is_subset(w),
        None => false,
    }
}

/// Wildcard fingerprint of one run's target, taken on first use and shared
/// by the brute-force waves and the critical pass.
#[derive(Debug, Default)]
pub struct WildcardFilter {
    fingerprint: OnceCell<Option<BTreeSet<IpAddr>>>,
}

impl WildcardFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fingerprint(
        &self,
        resolver: &dyn NameResolver,
        target: &Target,
    ) -> Option<&BTreeSet<IpAddr>> {
        self.fingerprint
            .get_or_init(|| detect_wildcard(resolver, target))
            .await
            .as_ref()
    }
}

#[async_trait]
impl SourceAdapter for WordlistBruteforceAdapter {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn preflight(&self) -> Result<()> {
        if self.words.is_empty() {
            return Err(SweepError::source_unavailable(
                self.descriptor.id.as_str(),
                "wordlist is empty",
            ));
        }
        Ok(())
    }

    fn run(&self, ctx: SourceContext) -> NameStream {
        let words = Arc::clone(&self.words);
        let concurrency = self.concurrency;
        let id = self.descriptor.id.to_string();
        let resolver = Arc::clone(&ctx.resolver);
        let target = ctx.target.clone();
        let filter = Arc::clone(&ctx.wildcard);

        stream::once(async move {
            let wildcard = filter.fingerprint(resolver.as_ref(), &target).await.cloned();
            (resolver, target, wildcard)
        })
        .flat_map(move |(resolver, target, wildcard)| {
            debug!(source = %id, words = words.len(), "starting brute force");
            let wildcard = Arc::new(wildcard);
            let names: Vec<String> = words.iter().map(|w| target.child(w)).collect();
            stream::iter(names)
                .map(move |name| {
                    let resolver = Arc::clone(&resolver);
                    async move {
                        let res = resolver.lookup(&name).await;
                        (name, res)
                    }
                })
                .buffer_unordered(concurrency)
                .filter_map(move |(name, res)| {
                    let wildcard = Arc::clone(&wildcard);
                    async move {
                        match res {
                            Ok(answer) if !is_wildcard_hit(&answer.addresses, (*wildcard).as_ref()) => {
                                Some(Ok(name))
                            }
                            _ => None,
                        }
                    }
                })
        })
        .boxed()
    }

    fn manual_command(&self, target: &Target) -> Option<String> {
        Some(format!(
            "while read w; do dig +short \"$w.{target}\" | grep -q . && echo \"$w.{target}\"; done < wordlist.txt"
        ))
    }
}
