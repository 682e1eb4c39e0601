//! Performance benchmarks for subsweep's hot parsing paths.
//!
//! Every raw line any source emits goes through host extraction,
//! normalization and a candidate-set merge, so these dominate ingestion
//! cost on large passive datasets.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use subsweep::candidates::{CandidateSet, SourceId, normalize};
use subsweep::critical::CriticalPatternCatalogue;
use subsweep::domain_utils::{Target, extract_host};
use subsweep::sources::parse_wordlist;
use subsweep::sources::permutations;

/// Raw lines shaped like real source output.
const SAMPLE_LINES: &[&str] = &[
    "www.example.com",
    "API.Example.com.",
    "https://portal.example.com:8443/login?next=/",
    "*.cdn.example.com",
    "mail.example.com,mx1.example.com",
    "bad_name!.example.com",
    "www.other.org",
    "  dev-01.staging.example.com  ",
    "example.com",
];

fn generate_lines(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| match i % 4 {
            0 => format!("host{i}.example.com"),
            1 => format!("HOST{}.Example.com.", i / 2),
            2 => format!("https://svc{i}.eu.example.com/path"),
            _ => format!("noise{i}.other.net"),
        })
        .collect()
}

fn target() -> Target {
    Target::parse("example.com").unwrap()
}

fn bench_extract_host(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_host");

    group.bench_function("sample_lines", |b| {
        b.iter(|| {
            for line in SAMPLE_LINES {
                black_box(extract_host(black_box(line)));
            }
        })
    });

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let target = target();
    let mut group = c.benchmark_group("normalize");

    group.bench_function("sample_lines", |b| {
        b.iter(|| {
            for line in SAMPLE_LINES {
                let _ = black_box(normalize(black_box(line), &target));
            }
        })
    });

    group.finish();
}

fn bench_ingest_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_throughput");

    for size in [1_000usize, 10_000, 50_000] {
        let lines = generate_lines(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("single_source", size), &lines, |b, lines| {
            let source = SourceId::new("bench");
            b.iter(|| {
                let set = CandidateSet::new(target());
                for line in lines {
                    let _ = set.ingest(line, &source);
                }
                black_box(set.len())
            })
        });
    }

    let lines = generate_lines(10_000);
    group.throughput(Throughput::Elements(lines.len() as u64 * 4));
    group.bench_function("four_overlapping_sources", |b| {
        let ids: Vec<SourceId> = (0..4).map(|i| SourceId::new(&format!("s{i}"))).collect();
        b.iter(|| {
            let set = CandidateSet::new(target());
            for id in &ids {
                for line in &lines {
                    let _ = set.ingest(line, id);
                }
            }
            black_box(set.attributed_len())
        })
    });

    group.finish();
}

fn bench_expansion(c: &mut Criterion) {
    let target = target();
    let mut group = c.benchmark_group("expansion");

    group.bench_function("critical_catalogue", |b| {
        let catalogue = CriticalPatternCatalogue::builtin();
        b.iter(|| black_box(catalogue.expand(&target)))
    });

    let known: Vec<String> = (0..200).map(|i| format!("svc{i}.example.com")).collect();
    group.bench_function("permutations_200_known", |b| {
        b.iter(|| {
            black_box(permutations::generate(
                known.iter().map(String::as_str),
                &target,
                5_000,
            ))
        })
    });

    let wordlist: String = (0..20_000).map(|i| format!("word{}\n", i % 15_000)).collect();
    group.throughput(Throughput::Bytes(wordlist.len() as u64));
    group.bench_function("parse_wordlist_20k", |b| {
        b.iter(|| black_box(parse_wordlist(black_box(&wordlist))))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_extract_host,
    bench_normalize,
    bench_ingest_throughput,
    bench_expansion
);
criterion_main!(benches);
