//! End-to-end engine runs against in-process sources, resolver and prober.
//!
//! Nothing here touches the network: every collaborator is scripted.

use std::fs;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{StreamExt, stream};

use subsweep::config::Config;
use subsweep::critical::CriticalPatternCatalogue;
use subsweep::deadline::CancelReason;
use subsweep::domain_utils::Target;
use subsweep::engine::Engine;
use subsweep::errors::{Result, SweepError};
use subsweep::probe::StaticProber;
use subsweep::progress::{Phase, PhaseState};
use subsweep::report::ReportWriter;
use subsweep::resolver::StaticResolver;
use subsweep::sources::{
    NameStream, Priority, SourceAdapter, SourceContext, SourceDescriptor, SourceKind, SourceStatus,
};

struct Scripted {
    desc: SourceDescriptor,
    names: Vec<String>,
    hang: bool,
}

impl Scripted {
    fn new(id: &str, names: &[&str]) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            desc: SourceDescriptor::new(id, SourceKind::PassiveApi, Priority::High, Duration::from_secs(60)),
            names: names.iter().map(|s| s.to_string()).collect(),
            hang: false,
        })
    }

    fn hanging(id: &str, names: &[&str]) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            desc: SourceDescriptor::new(id, SourceKind::ActiveTool, Priority::Critical, Duration::from_secs(600)),
            names: names.iter().map(|s| s.to_string()).collect(),
            hang: true,
        })
    }
}

#[async_trait]
impl SourceAdapter for Scripted {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.desc
    }

    fn run(&self, _ctx: SourceContext) -> NameStream {
        let head = stream::iter(self.names.clone().into_iter().map(Ok::<_, SweepError>));
        if self.hang {
            head.chain(stream::pending()).boxed()
        } else {
            head.boxed()
        }
    }

    fn manual_command(&self, target: &Target) -> Option<String> {
        Some(format!("{} -d {target}", self.desc.id))
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn quick_config() -> Config {
    let mut config = Config::default();
    config.network.dns_retry_delay = Duration::from_millis(1);
    config.run.probe = false;
    config.run.progress_interval = Duration::from_millis(50);
    config.run.shutdown_grace = Duration::from_millis(200);
    config
}

fn target() -> Target {
    Target::parse("example.com").unwrap()
}

fn scenario_resolver() -> StaticResolver {
    StaticResolver::new()
        .with_record("api.example.com", &[ip("10.0.0.1")])
        .with_record("www.example.com", &[ip("10.0.0.2")])
        .with_record("staging.example.com", &[ip("10.0.0.3")])
}

async fn scenario() -> Result<subsweep::RunReport> {
    let engine = Engine::builder(quick_config())
        .sources(vec![
            Scripted::new("one", &["api.example.com"]),
            Scripted::new("two", &["api.example.com", "WWW.example.com."]),
            Scripted::new("three", &[]),
        ])
        .resolver(Arc::new(scenario_resolver()))
        .catalogue(CriticalPatternCatalogue::from_labels(["staging", "admin"]))
        .build()?;
    engine.run(target()).await
}

#[tokio::test]
async fn example_scenario_reproduces() {
    let report = scenario().await.unwrap();

    assert_eq!(report.total_discovered, 2);
    assert_eq!(report.critical().count(), 1);
    let names: Vec<_> = report.candidates.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["api.example.com", "staging.example.com", "www.example.com"]);

    let api = &report.candidates[0];
    assert_eq!(api.sources, vec!["one", "two"]);
    let www = &report.candidates[2];
    assert_eq!(www.sources, vec!["two"]);
    let staging = &report.candidates[1];
    assert!(staging.sources.is_empty());
    assert!(staging.validation.as_ref().unwrap().is_critical);

    assert!(!report.candidates.iter().any(|c| c.name == "admin.example.com"));
    assert_eq!(report.per_source_counts["one"], 1);
    assert_eq!(report.per_source_counts["two"], 2);
    assert!(!report.is_partial());
    assert!(report.sources.iter().all(|s| s.status == SourceStatus::Completed));
}

#[tokio::test]
async fn merge_is_idempotent_across_sources() {
    let names = ["a.example.com", "b.example.com", "c.example.com"];
    let sources: Vec<_> = (0..5)
        .map(|i| Scripted::new(&format!("s{i}"), &names))
        .collect();
    let engine = Engine::builder(quick_config())
        .sources(sources)
        .resolver(Arc::new(StaticResolver::new()))
        .catalogue(CriticalPatternCatalogue::from_labels(Vec::<String>::new()))
        .build()
        .unwrap();

    let report = engine.run(target()).await.unwrap();
    assert_eq!(report.total_discovered, 3);
    for c in &report.candidates {
        assert_eq!(c.sources.len(), 5, "{} attributed to {:?}", c.name, c.sources);
    }
    // Each name is validated once regardless of how many sources reported it.
    assert_eq!(report.results.len(), 3);
}

#[tokio::test]
async fn invalid_names_never_reach_output_files() {
    let engine = Engine::builder(quick_config())
        .sources(vec![Scripted::new(
            "noisy",
            &[
                "bad_name!.example.com",
                "www.example.com",
                "example.com",
                "www.other.org",
                "*.example.com",
            ],
        )])
        .resolver(Arc::new(scenario_resolver()))
        .catalogue(CriticalPatternCatalogue::from_labels(["staging"]))
        .build()
        .unwrap();
    let report = engine.run(target()).await.unwrap();
    assert_eq!(report.total_discovered, 1);
    let rejected: u64 = report.rejections.values().sum();
    assert!(rejected >= 3);

    let tmp = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(tmp.path(), &report.target, true);
    writer.write(&report).unwrap();

    let mut stack = vec![writer.dir().to_path_buf()];
    let mut files = 0;
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            files += 1;
            let content = fs::read_to_string(&path).unwrap();
            assert!(
                !content.contains("bad_name!"),
                "{} leaked an invalid name",
                path.display()
            );
        }
    }
    assert!(files >= 8);
}

#[tokio::test]
async fn critical_names_are_tested_with_no_sources() {
    let engine = Engine::builder(quick_config())
        .sources(vec![])
        .resolver(Arc::new(
            StaticResolver::new()
                .with_record("admin.example.com", &[ip("10.1.0.1")])
                .with_record("api-staging.example.com", &[ip("10.1.0.2")]),
        ))
        .build()
        .unwrap();

    let report = engine.run(target()).await.unwrap();
    assert_eq!(report.total_discovered, 0);
    let critical: Vec<_> = report.critical().map(|r| r.candidate.as_str()).collect();
    assert_eq!(critical, vec!["admin.example.com", "api-staging.example.com"]);

    let phase = report
        .facts
        .phases
        .iter()
        .find(|p| p.phase_name == Phase::Critical)
        .unwrap();
    assert_eq!(phase.state, PhaseState::Completed);
    assert_eq!(
        phase.total as usize,
        CriticalPatternCatalogue::builtin().expand(&target()).len()
    );
}

#[tokio::test]
async fn wildcard_zone_flags_only_real_critical_records() {
    let engine = Engine::builder(quick_config())
        .sources(vec![])
        .resolver(Arc::new(
            StaticResolver::new()
                .with_wildcard("example.com", &[ip("10.9.9.9")])
                .with_record("admin.example.com", &[ip("10.0.0.7")]),
        ))
        .catalogue(CriticalPatternCatalogue::from_labels(["admin", "staging", "portal", "api"]))
        .build()
        .unwrap();

    let report = engine.run(target()).await.unwrap();
    let critical: Vec<_> = report.critical().map(|r| r.candidate.as_str()).collect();
    assert_eq!(critical, vec!["admin.example.com"]);
    let names: Vec<_> = report.candidates.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["admin.example.com"]);
}

#[test]
fn zero_progress_interval_is_a_configuration_error() {
    let mut config = quick_config();
    config.run.progress_interval = Duration::ZERO;
    let built = Engine::builder(config)
        .sources(vec![])
        .resolver(Arc::new(StaticResolver::new()))
        .build();
    assert!(matches!(built, Err(SweepError::Configuration { .. })));
}

#[tokio::test]
async fn in_flight_never_exceeds_ceiling() {
    let mut config = quick_config();
    config.concurrency.floor = 1;
    config.concurrency.initial = 4;
    config.concurrency.ceiling = 4;

    let names: Vec<String> = (0..60).map(|i| format!("host{i}.example.com")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut resolver = StaticResolver::new().with_latency(Duration::from_millis(5));
    for n in &names {
        resolver = resolver.with_record(n, &[ip("10.2.0.1")]);
    }

    let engine = Engine::builder(config)
        .sources(vec![Scripted::new("bulk", &refs)])
        .resolver(Arc::new(resolver))
        .catalogue(CriticalPatternCatalogue::from_labels(["admin", "staging"]))
        .build()
        .unwrap();
    let report = engine.run(target()).await.unwrap();

    assert_eq!(report.resolved().count(), 60);
    let stats = &report.facts.concurrency;
    assert!(stats.peak_in_flight <= 4, "peak {}", stats.peak_in_flight);
    assert!(stats.peak_in_flight >= 2);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn deadline_returns_partial_results_in_time() {
    let mut config = quick_config();
    config.run.deadline = Some(Duration::from_millis(300));

    let engine = Engine::builder(config)
        .sources(vec![
            Scripted::hanging("stuck", &["api.example.com"]),
            Scripted::new("quick", &["www.example.com"]),
        ])
        .resolver(Arc::new(scenario_resolver()))
        .build()
        .unwrap();

    let started = Instant::now();
    let report = engine.run(target()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    assert!(report.is_partial());
    assert_eq!(report.facts.cancelled, Some(CancelReason::Deadline));
    assert_eq!(report.total_discovered, 2);
    let stuck = report.sources.iter().find(|s| s.id == "stuck").unwrap();
    assert_ne!(stuck.status, SourceStatus::Completed);
    assert!(report.fallbacks.iter().any(|f| f.source == "stuck"));
    assert_eq!(report.critical().count(), 0);
}

#[tokio::test]
async fn probing_marks_live_hosts_and_progress_is_published() {
    let mut config = quick_config();
    config.run.probe = true;

    let prober = StaticProber::new().with_response("www.example.com", 200, Some("Home"));
    let engine = Engine::builder(config)
        .sources(vec![Scripted::new("web", &["www.example.com", "api.example.com"])])
        .resolver(Arc::new(scenario_resolver()))
        .prober(Arc::new(prober))
        .catalogue(CriticalPatternCatalogue::from_labels(Vec::<String>::new()))
        .build()
        .unwrap();
    let progress = engine.subscribe_progress();

    let report = engine.run(target()).await.unwrap();
    let live: Vec<_> = report.live().map(|r| r.candidate.as_str()).collect();
    assert_eq!(live, vec!["www.example.com"]);
    let api = report.results.iter().find(|r| r.candidate == "api.example.com").unwrap();
    assert!(api.resolved && !api.is_live);
    assert!(api.probe_error.is_some());

    let last = progress.borrow().clone();
    assert!(!last.is_empty());
    assert!(
        last.iter()
            .filter(|s| s.phase_name != Phase::Critical)
            .all(|s| s.state == PhaseState::Completed)
    );
}

#[tokio::test]
async fn resumed_names_are_revalidated() {
    let engine = Engine::builder(quick_config())
        .sources(vec![Scripted::new("fresh", &["www.example.com"])])
        .resolver(Arc::new(scenario_resolver()))
        .catalogue(CriticalPatternCatalogue::from_labels(Vec::<String>::new()))
        .seed(vec!["api.example.com".into(), "not a name".into()])
        .build()
        .unwrap();
    let report = engine.run(target()).await.unwrap();

    let api = report.candidates.iter().find(|c| c.name == "api.example.com").unwrap();
    assert_eq!(api.sources, vec!["resume"]);
    assert!(api.validation.as_ref().unwrap().resolved);
    assert_eq!(report.total_discovered, 2);
}
