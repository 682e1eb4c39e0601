//! Library entry point: one discovery + validation run for one target.
//!
//! ```text
//! sources ──► CandidateSet ──► bulk pipeline ──┐
//!    (permutation wave)                        ├─► critical pass ─► RunReport
//! progress ◄── every stage ────────────────────┘
//! ```
//!
//! The engine itself never prints and never touches the filesystem; the
//! binary writes the returned [`RunReport`] with
//! [`ReportWriter`](crate::report::ReportWriter).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::aggregator::{ResultAggregator, RunFacts, RunReport};
use crate::candidates::{CandidateSet, SourceId};
use crate::concurrency::AdaptiveLimiter;
use crate::config::Config;
use crate::critical::{CriticalPatternCatalogue, run_critical_pass};
use crate::deadline::{CancelFlag, DeadlineWatch, cancellation};
use crate::domain_utils::Target;
use crate::errors::{Result, SweepError};
use crate::pipeline::{Batch, Pipeline};
use crate::probe::{HttpProber, ProbeSettings, ReqwestProber};
use crate::progress::{Phase, ProgressHandle, ProgressReporter, ProgressSnapshot};
use crate::resolver::{CachingResolver, NameResolver, TrustDnsResolver};
use crate::retry::RetryConfigBuilder;
use crate::sources::{
    self, Intake, SourceAdapter, SourceContext, SourceRun, WildcardFilter,
    WordlistBruteforceAdapter, permutations,
};

/// Source id for names carried over from a previous run.
pub const RESUME_SOURCE: &str = "resume";

/// Collaborators left unset fall back to the real implementations derived
/// from the [`Config`].
pub struct EngineBuilder {
    config: Config,
    sources: Option<Vec<Arc<dyn SourceAdapter>>>,
    resolver: Option<Arc<dyn NameResolver>>,
    prober: Option<Arc<dyn HttpProber>>,
    http: Option<reqwest::Client>,
    catalogue: CriticalPatternCatalogue,
    seed: Vec<String>,
    listen_ctrl_c: bool,
}

impl EngineBuilder {
    pub fn sources(mut self, sources: Vec<Arc<dyn SourceAdapter>>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn HttpProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn catalogue(mut self, catalogue: CriticalPatternCatalogue) -> Self {
        self.catalogue = catalogue;
        self
    }

    /// Names from an earlier run, ingested under the `resume` source.
    pub fn seed(mut self, names: Vec<String>) -> Self {
        self.seed = names;
        self
    }

    pub fn listen_ctrl_c(mut self, listen: bool) -> Self {
        self.listen_ctrl_c = listen;
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let net = &config.network;
        let http = match self.http {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(net.api_timeout)
                .user_agent(net.user_agent.clone())
                .build()
                .map_err(|e| SweepError::internal_with("failed to build HTTP client", e))?,
        };

        let sources = match self.sources {
            Some(s) => s,
            None => sources::build_sources(&config)?,
        };

        let inner: Arc<dyn NameResolver> = match self.resolver {
            Some(r) => r,
            None => Arc::new(TrustDnsResolver::new(net.dns_timeout)),
        };
        let resolver: Arc<dyn NameResolver> =
            Arc::new(CachingResolver::new(inner, net.dns_cache_capacity));

        let prober: Option<Arc<dyn HttpProber>> = if !config.run.probe {
            None
        } else if let Some(p) = self.prober {
            Some(p)
        } else {
            let prober = ReqwestProber::new(ProbeSettings {
                timeout: net.probe_timeout,
                max_redirects: net.max_redirects,
                max_body_bytes: net.max_body_bytes,
                user_agent: net.user_agent.clone(),
            })
            .map_err(|e| SweepError::internal_with("failed to build HTTP prober", e))?;
            Some(Arc::new(prober) as Arc<dyn HttpProber>)
        };

        Ok(Engine {
            config,
            sources,
            resolver,
            prober,
            http,
            catalogue: self.catalogue,
            seed: self.seed,
            listen_ctrl_c: self.listen_ctrl_c,
            progress: Arc::new(watch::channel(Vec::new()).0),
        })
    }
}

pub struct Engine {
    config: Config,
    sources: Vec<Arc<dyn SourceAdapter>>,
    resolver: Arc<dyn NameResolver>,
    prober: Option<Arc<dyn HttpProber>>,
    http: reqwest::Client,
    catalogue: CriticalPatternCatalogue,
    seed: Vec<String>,
    listen_ctrl_c: bool,
    progress: Arc<watch::Sender<Vec<ProgressSnapshot>>>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            sources: None,
            resolver: None,
            prober: None,
            http: None,
            catalogue: CriticalPatternCatalogue::builtin(),
            seed: Vec::new(),
            listen_ctrl_c: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Live per-phase snapshots while [`run`](Self::run) executes.
    pub fn subscribe_progress(&self) -> watch::Receiver<Vec<ProgressSnapshot>> {
        self.progress.subscribe()
    }

    /// Run every phase against `target`. Cancellation (deadline or Ctrl-C)
    /// is not an error: the report comes back marked partial.
    pub async fn run(&self, target: Target) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let grace = self.config.run.shutdown_grace;

        let (canceller, cancel) = cancellation();
        let _watch = DeadlineWatch::spawn(canceller, self.config.run.deadline, self.listen_ctrl_c);
        let reporter =
            ProgressReporter::spawn_into(self.config.run.progress_interval, Arc::clone(&self.progress));
        let progress = reporter.handle();

        let set = Arc::new(CandidateSet::new(target.clone()));
        let wildcard = Arc::new(WildcardFilter::new());
        let limiter = AdaptiveLimiter::new(self.config.concurrency.clone());
        let retry = RetryConfigBuilder::new()
            .max_attempts(self.config.network.dns_retries)
            .initial_delay(self.config.network.dns_retry_delay)
            .build();
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&self.resolver),
            self.prober.clone(),
            retry,
            Arc::clone(&limiter),
        ));

        info!(
            domain = %target,
            sources = self.sources.len(),
            probing = pipeline.probing(),
            deadline_secs = self.config.run.deadline.map(|d| d.as_secs()),
            "run started"
        );

        let mut aggregator = ResultAggregator::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let intake = Intake::new(Arc::clone(&set), Some(tx));

        if !self.seed.is_empty() {
            let resume = SourceId::new(RESUME_SOURCE);
            let accepted = self
                .seed
                .iter()
                .filter(|name| intake.offer(name, &resume).is_some())
                .count();
            info!(names = accepted, "resumed candidates from previous run");
        }

        // Bulk validation consumes names while discovery is still running.
        progress.start(Phase::Validation);
        let mut bulk: JoinSet<Batch> = JoinSet::new();
        bulk.spawn(Arc::clone(&pipeline).run_bulk(
            rx,
            Arc::clone(&set),
            progress.clone(),
            cancel.clone(),
        ));

        progress.start(Phase::Discovery);
        let ctx = |adapter: &Arc<dyn SourceAdapter>| SourceContext {
            target: target.clone(),
            timeout_budget: adapter.descriptor().timeout_budget,
            resolver: Arc::clone(&self.resolver),
            http: self.http.clone(),
            wildcard: Arc::clone(&wildcard),
        };
        for run in self
            .discover(&self.sources, &ctx, &intake, &progress, &cancel, grace)
            .await
        {
            aggregator.record_source(run);
        }

        if self.config.discovery.permutations
            && !cancel.is_cancelled()
            && let Some(adapter) = self.permutation_source(&set)
        {
            let wave = vec![adapter];
            for run in self
                .discover(&wave, &ctx, &intake, &progress, &cancel, grace)
                .await
            {
                aggregator.record_source(run);
            }
        }
        progress.finish(Phase::Discovery);

        // Closing the channel lets the bulk loop finish once it drains.
        drop(intake);
        for batch in drain(&mut bulk, &cancel, grace).await {
            for result in batch.results {
                aggregator.record_validation(result);
            }
        }
        progress.finish(Phase::Validation);

        if cancel.is_cancelled() {
            warn!("run cancelled, critical pass skipped");
        } else {
            progress.start(Phase::Critical);
            let fingerprint = wildcard.fingerprint(self.resolver.as_ref(), &target).await;
            let pass = run_critical_pass(
                &self.catalogue,
                Arc::clone(&pipeline),
                &set,
                fingerprint,
                progress.clone(),
                cancel.clone(),
            )
            .await;
            for hit in pass.hits {
                aggregator.record_critical(hit);
            }
            progress.finish(Phase::Critical);
        }

        let phases = reporter.finish().await;
        let facts = RunFacts {
            started_at,
            duration: clock.elapsed(),
            cancelled: cancel.reason(),
            concurrency: limiter.stats(),
            phases,
            probing: pipeline.probing(),
        };
        let report = aggregator.finish(&set, facts);

        info!(
            domain = %target,
            discovered = report.total_discovered,
            validated = report.resolved().count(),
            live = report.live().count(),
            critical = report.critical().count(),
            partial = report.is_partial(),
            secs = report.facts.duration.as_secs_f64(),
            "run finished"
        );
        Ok(report)
    }

    /// Run one wave of sources side by side.
    async fn discover<F>(
        &self,
        wave: &[Arc<dyn SourceAdapter>],
        ctx: &F,
        intake: &Intake,
        progress: &ProgressHandle,
        cancel: &CancelFlag,
        grace: Duration,
    ) -> Vec<SourceRun>
    where
        F: Fn(&Arc<dyn SourceAdapter>) -> SourceContext,
    {
        progress.add_total(Phase::Discovery, wave.len() as u64);
        let mut tasks = JoinSet::new();
        for adapter in wave {
            let context = ctx(adapter);
            let adapter = Arc::clone(adapter);
            let intake = intake.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            tasks.spawn(async move {
                let run = sources::run_source(adapter, context, intake, cancel).await;
                progress.advance(Phase::Discovery, 1);
                run
            });
        }
        drain(&mut tasks, cancel, grace).await
    }

    fn permutation_source(&self, set: &CandidateSet) -> Option<Arc<dyn SourceAdapter>> {
        let known: Vec<String> = set.snapshot().into_iter().map(|c| c.name).collect();
        let labels = permutations::generate(
            known.iter().map(String::as_str),
            set.target(),
            self.config.discovery.max_permutations,
        );
        if labels.is_empty() {
            debug!("nothing to permute");
            return None;
        }
        info!(guesses = labels.len(), "permutation wave scheduled");
        let budget = self.config.source_budget(sources::wordlist::DEFAULT_BUDGET);
        Some(Arc::new(WordlistBruteforceAdapter::new(
            permutations::SOURCE_ID,
            labels,
            self.config.discovery.bruteforce_concurrency,
            budget,
        )))
    }
}

/// Join every task; once the run is cancelled, stragglers get `grace` to
/// unwind before they are aborted.
async fn drain<T: 'static>(tasks: &mut JoinSet<T>, cancel: &CancelFlag, grace: Duration) -> Vec<T> {
    let mut out = Vec::new();
    let expiry = async {
        cancel.cancelled().await;
        tokio::time::sleep(grace).await;
    };
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok(value)) => out.push(value),
                Some(Err(e)) => warn!(error = %e, "task ended abnormally"),
                None => break,
            },
            _ = &mut expiry => {
                warn!(remaining = tasks.len(), "shutdown grace elapsed, aborting tasks");
                tasks.abort_all();
                while let Some(joined) = tasks.join_next().await {
                    if let Ok(value) = joined {
                        out.push(value);
                    }
                }
                break;
            }
        }
    }
    out
}
